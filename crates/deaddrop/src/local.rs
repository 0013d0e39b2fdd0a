//! File-backed bus adapter for multi-process local coordination.
//!
//! The entire bus state is a single JSON document at a caller-supplied
//! path. Every operation loads, mutates, and atomically rewrites it
//! (write-to-temp-then-rename). There is no cross-process wakeup, so
//! consumers poll; `supports_push` is false.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use sc_domain::error::{Error, Result};

use crate::invite;
use crate::state::{BusState, StoredInvite};
use crate::types::{
    ClaimedInvite, Envelope, IdentityGrant, NamespaceGrant, RoomGrant, SubscribeOutcome,
};
use crate::Deaddrop;

/// A deaddrop backed by a shared JSON file.
#[derive(Debug)]
pub struct LocalBus {
    path: PathBuf,
    // Serialises load-mutate-save cycles within this process. Cross-process
    // writers are protected only by the atomic rename.
    guard: Mutex<()>,
}

impl LocalBus {
    /// Create a new backing store (or open an existing one) at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            write_atomic(&path, &BusState::default())?;
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    /// Open an existing backing store; fails if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "no local deaddrop store at {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BusState> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut BusState) -> Result<T>) -> Result<T> {
        let _guard = self.guard.lock();
        let mut state = self.load()?;
        let out = f(&mut state)?;
        write_atomic(&self.path, &state)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&BusState) -> Result<T>) -> Result<T> {
        let _guard = self.guard.lock();
        let state = self.load()?;
        f(&state)
    }
}

fn write_atomic(path: &Path, state: &BusState) -> Result<()> {
    let json = serde_json::to_string(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Deaddrop for LocalBus {
    async fn create_namespace(&self, display_name: &str) -> Result<NamespaceGrant> {
        self.mutate(|state| Ok(state.create_namespace(display_name)))
    }

    async fn create_identity(
        &self,
        ns: &str,
        display_name: &str,
        ns_secret: &str,
    ) -> Result<IdentityGrant> {
        self.mutate(|state| state.create_identity(ns, display_name, ns_secret))
    }

    async fn create_room(
        &self,
        ns: &str,
        creator_secret: &str,
        display_name: &str,
    ) -> Result<RoomGrant> {
        self.mutate(|state| state.create_room(ns, creator_secret, display_name))
    }

    async fn add_room_member(
        &self,
        ns: &str,
        room_id: &str,
        identity_id: &str,
        secret: &str,
    ) -> Result<()> {
        self.mutate(|state| state.add_room_member(ns, room_id, identity_id, secret))
    }

    async fn create_invite(
        &self,
        ns: &str,
        identity_id: &str,
        identity_secret: &str,
        ns_secret: &str,
        display_name: &str,
    ) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        let key = &Uuid::new_v4().simple().to_string()[..8];
        self.mutate(|state| {
            state.store_invite(
                token.clone(),
                StoredInvite {
                    ns_id: ns.to_owned(),
                    ns_secret: ns_secret.to_owned(),
                    identity_id: identity_id.to_owned(),
                    identity_secret: identity_secret.to_owned(),
                    display_name: display_name.to_owned(),
                },
            );
            Ok(())
        })?;
        Ok(format!(
            "local://{}/join/{token}#{key}",
            self.path.display()
        ))
    }

    async fn claim_invite(&self, invite_url: &str) -> Result<ClaimedInvite> {
        if invite::is_data_invite(invite_url) {
            return invite::parse_data_invite(invite_url);
        }
        if !invite_url.starts_with("local://") {
            return Err(Error::UnsupportedInvite(
                invite_url.chars().take(50).collect(),
            ));
        }
        let token = invite::join_token(invite_url).ok_or_else(|| {
            Error::UnsupportedLocalInvite(format!(
                "no join token in {}",
                invite_url.chars().take(50).collect::<String>()
            ))
        })?;

        let stored = self.read(|state| state.claim_token(token))?;
        let (room_id, coordinator_id) = invite::query_params(invite_url);
        Ok(ClaimedInvite {
            identity_id: stored.identity_id,
            identity_secret: stored.identity_secret,
            ns_id: stored.ns_id,
            ns_secret: stored.ns_secret,
            room_id,
            coordinator_id,
            display_name: Some(stored.display_name),
        })
    }

    async fn send_message(
        &self,
        ns: &str,
        from_secret: &str,
        to_id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        self.mutate(|state| state.send_message(ns, from_secret, to_id, body, content_type))
    }

    async fn send_room_message(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        self.mutate(|state| {
            state.send_room_message(ns, room_id, secret, body, content_type)
        })
    }

    async fn get_inbox(
        &self,
        ns: &str,
        identity_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.read(|state| state.get_inbox(ns, identity_id, secret, after_mid))
    }

    async fn get_room_messages(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.read(|state| state.get_room_messages(ns, room_id, secret, after_mid))
    }

    /// No cross-process events exist for a plain file; callers should poll.
    /// This degrades to a single immediate check.
    async fn subscribe(
        &self,
        ns: &str,
        _secret: &str,
        topics: &BTreeMap<String, Option<String>>,
        _timeout: Duration,
    ) -> Result<SubscribeOutcome> {
        let events = self.read(|state| Ok(state.topics_with_news(ns, topics)))?;
        Ok(SubscribeOutcome {
            timed_out: events.is_empty(),
            events,
        })
    }

    fn supports_push(&self) -> bool {
        false
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
