//! Deaddrop bus client: the message-delivery substrate consumed by the
//! coordination runtime.
//!
//! The bus provides namespaces, identities, direct inboxes, fan-out rooms,
//! invites, and a subscribe/notify primitive. This crate defines the
//! [`Deaddrop`] trait plus three adapters:
//!
//! | Adapter      | Backing               | Push? | Invites        |
//! |--------------|-----------------------|-------|----------------|
//! | [`MemoryBus`] | in-process state      | yes   | `data:` URLs   |
//! | [`LocalBus`]  | shared JSON file      | no    | `local://` URLs |
//! | [`RemoteBus`] | HTTP server (reqwest) | yes   | `https://` URLs |

pub mod invite;
pub mod local;
pub mod memory;
pub mod remote;
mod state;
pub mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use sc_domain::error::Result;

pub use invite::{
    append_coordination_params, encode_data_invite, is_data_invite, parse_data_invite,
    query_params,
};
pub use local::LocalBus;
pub use memory::MemoryBus;
pub use remote::RemoteBus;
pub use types::{
    ClaimedInvite, Envelope, IdentityGrant, NamespaceGrant, RoomGrant, SubscribeOutcome,
};

/// The deaddrop bus surface the coordination runtime consumes.
///
/// Per `(sender identity → recipient inbox)` pair the bus preserves
/// submission order; `mid`s are the canonical order cursor.
#[async_trait]
pub trait Deaddrop: Send + Sync + std::fmt::Debug {
    async fn create_namespace(&self, display_name: &str) -> Result<NamespaceGrant>;

    async fn create_identity(
        &self,
        ns: &str,
        display_name: &str,
        ns_secret: &str,
    ) -> Result<IdentityGrant>;

    async fn create_room(
        &self,
        ns: &str,
        creator_secret: &str,
        display_name: &str,
    ) -> Result<RoomGrant>;

    async fn add_room_member(
        &self,
        ns: &str,
        room_id: &str,
        identity_id: &str,
        secret: &str,
    ) -> Result<()>;

    /// Create an invite URL a worker can later claim for `identity_id`.
    async fn create_invite(
        &self,
        ns: &str,
        identity_id: &str,
        identity_secret: &str,
        ns_secret: &str,
        display_name: &str,
    ) -> Result<String>;

    /// Claim an invite URL, yielding the credentials it grants.
    async fn claim_invite(&self, invite_url: &str) -> Result<ClaimedInvite>;

    /// Send to a direct inbox. Returns the assigned `mid`.
    async fn send_message(
        &self,
        ns: &str,
        from_secret: &str,
        to_id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String>;

    /// Post to a room. Returns the assigned `mid`.
    async fn send_room_message(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String>;

    /// Fetch inbox messages strictly after `after_mid` (all when `None`),
    /// oldest first.
    async fn get_inbox(
        &self,
        ns: &str,
        identity_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>>;

    /// Fetch room messages strictly after `after_mid`, oldest first.
    async fn get_room_messages(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>>;

    /// Block until one of the topics has a message newer than its cursor, or
    /// the timeout elapses. Topics are `"inbox:<identity>"` / `"room:<id>"`
    /// mapped to the caller's last-seen mid.
    async fn subscribe(
        &self,
        ns: &str,
        secret: &str,
        topics: &BTreeMap<String, Option<String>>,
        timeout: Duration,
    ) -> Result<SubscribeOutcome>;

    /// Whether this backend delivers cross-process wakeups. Push-less
    /// backends are polled instead of subscribed.
    fn supports_push(&self) -> bool;

    /// Human-readable backend location (server URL or backing path).
    fn location(&self) -> String;
}
