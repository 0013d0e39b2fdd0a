//! In-process bus adapter.
//!
//! State lives behind a mutex; `subscribe` is served by a
//! [`tokio::sync::Notify`] poked on every send, so push-style waits work
//! within a single process. Invites are self-contained `data:` URLs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use sc_domain::error::{Error, Result};

use crate::invite;
use crate::state::BusState;
use crate::types::{
    ClaimedInvite, Envelope, IdentityGrant, NamespaceGrant, RoomGrant, SubscribeOutcome,
};
use crate::Deaddrop;

/// An in-memory deaddrop, primarily for tests and single-process setups.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Deaddrop for MemoryBus {
    async fn create_namespace(&self, display_name: &str) -> Result<NamespaceGrant> {
        Ok(self.state.lock().create_namespace(display_name))
    }

    async fn create_identity(
        &self,
        ns: &str,
        display_name: &str,
        ns_secret: &str,
    ) -> Result<IdentityGrant> {
        self.state.lock().create_identity(ns, display_name, ns_secret)
    }

    async fn create_room(
        &self,
        ns: &str,
        creator_secret: &str,
        display_name: &str,
    ) -> Result<RoomGrant> {
        self.state.lock().create_room(ns, creator_secret, display_name)
    }

    async fn add_room_member(
        &self,
        ns: &str,
        room_id: &str,
        identity_id: &str,
        secret: &str,
    ) -> Result<()> {
        self.state
            .lock()
            .add_room_member(ns, room_id, identity_id, secret)
    }

    async fn create_invite(
        &self,
        ns: &str,
        identity_id: &str,
        identity_secret: &str,
        ns_secret: &str,
        display_name: &str,
    ) -> Result<String> {
        // No shared store to claim from, so the invite carries everything.
        invite::encode_data_invite(&ClaimedInvite {
            identity_id: identity_id.to_owned(),
            identity_secret: identity_secret.to_owned(),
            ns_id: ns.to_owned(),
            ns_secret: ns_secret.to_owned(),
            room_id: None,
            coordinator_id: None,
            display_name: Some(display_name.to_owned()),
        })
    }

    async fn claim_invite(&self, invite_url: &str) -> Result<ClaimedInvite> {
        if !invite::is_data_invite(invite_url) {
            return Err(Error::UnsupportedInvite(
                invite_url.chars().take(50).collect(),
            ));
        }
        invite::parse_data_invite(invite_url)
    }

    async fn send_message(
        &self,
        ns: &str,
        from_secret: &str,
        to_id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let mid = self
            .state
            .lock()
            .send_message(ns, from_secret, to_id, body, content_type)?;
        self.notify.notify_waiters();
        Ok(mid)
    }

    async fn send_room_message(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let mid = self
            .state
            .lock()
            .send_room_message(ns, room_id, secret, body, content_type)?;
        self.notify.notify_waiters();
        Ok(mid)
    }

    async fn get_inbox(
        &self,
        ns: &str,
        identity_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.state.lock().get_inbox(ns, identity_id, secret, after_mid)
    }

    async fn get_room_messages(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.state
            .lock()
            .get_room_messages(ns, room_id, secret, after_mid)
    }

    async fn subscribe(
        &self,
        ns: &str,
        _secret: &str,
        topics: &BTreeMap<String, Option<String>>,
        timeout: Duration,
    ) -> Result<SubscribeOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before checking, so a send landing
            // between check and wait still wakes us.
            let notified = self.notify.notified();

            let events = self.state.lock().topics_with_news(ns, topics);
            if !events.is_empty() {
                return Ok(SubscribeOutcome {
                    timed_out: false,
                    events,
                });
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(SubscribeOutcome {
                        timed_out: true,
                        events: Vec::new(),
                    });
                }
            }
        }
    }

    fn supports_push(&self) -> bool {
        true
    }

    fn location(&self) -> String {
        "memory".to_owned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(bus: &MemoryBus) -> (NamespaceGrant, IdentityGrant, IdentityGrant) {
        let ns = bus.create_namespace("test").await.unwrap();
        let a = bus.create_identity(&ns.ns_id, "A", &ns.ns_secret).await.unwrap();
        let b = bus.create_identity(&ns.ns_id, "B", &ns.ns_secret).await.unwrap();
        (ns, a, b)
    }

    #[tokio::test]
    async fn invite_roundtrip_is_self_contained() {
        let bus = MemoryBus::new();
        let (ns, a, _) = seeded(&bus).await;

        let url = bus
            .create_invite(&ns.ns_id, &a.id, &a.secret, &ns.ns_secret, "Worker A")
            .await
            .unwrap();
        let claimed = bus.claim_invite(&url).await.unwrap();
        assert_eq!(claimed.identity_id, a.id);
        assert_eq!(claimed.ns_id, ns.ns_id);
        assert_eq!(claimed.display_name.as_deref(), Some("Worker A"));
    }

    #[tokio::test]
    async fn url_invites_are_unsupported() {
        let bus = MemoryBus::new();
        let err = bus
            .claim_invite("https://drop.example/join/tok#key")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedInvite");
    }

    #[tokio::test]
    async fn subscribe_wakes_on_send() {
        let bus = MemoryBus::new();
        let (ns, a, b) = seeded(&bus).await;

        let mut topics = BTreeMap::new();
        topics.insert(format!("inbox:{}", b.id), None);

        let waiter = {
            let bus = bus.clone();
            let ns_id = ns.ns_id.clone();
            let secret = b.secret.clone();
            tokio::spawn(async move {
                bus.subscribe(&ns_id, &secret, &topics, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.send_message(&ns.ns_id, &a.secret, &b.id, "wake", "text/plain")
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.events.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_times_out_quietly() {
        let bus = MemoryBus::new();
        let (ns, _, b) = seeded(&bus).await;

        let mut topics = BTreeMap::new();
        topics.insert(format!("inbox:{}", b.id), None);

        let outcome = bus
            .subscribe(&ns.ns_id, &b.secret, &topics, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.events.is_empty());
    }
}
