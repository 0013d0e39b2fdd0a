//! Pure bus state shared by the in-memory and file-backed adapters.
//!
//! All mutation goes through methods here so the two local adapters differ
//! only in where the state lives (process memory vs. a JSON file).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sc_domain::error::{Error, Result};

use crate::types::{Envelope, IdentityGrant, NamespaceGrant, RoomGrant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IdentityState {
    pub secret: String,
    pub display_name: String,
    pub inbox: Vec<Envelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RoomState {
    pub display_name: String,
    pub members: BTreeSet<String>,
    pub messages: Vec<Envelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NamespaceState {
    pub secret: String,
    pub display_name: String,
    pub identities: HashMap<String, IdentityState>,
    pub rooms: HashMap<String, RoomState>,
}

/// An invite created but not yet materialised into a URL payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredInvite {
    pub ns_id: String,
    pub ns_secret: String,
    pub identity_id: String,
    pub identity_secret: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct BusState {
    counter: u64,
    namespaces: HashMap<String, NamespaceState>,
    invites: HashMap<String, StoredInvite>,
}

impl BusState {
    /// Next message id. Zero-padded so lexicographic order equals
    /// submission order.
    fn next_mid(&mut self) -> String {
        self.counter += 1;
        format!("m{:012}", self.counter)
    }

    fn namespace(&self, ns: &str) -> Result<&NamespaceState> {
        self.namespaces
            .get(ns)
            .ok_or_else(|| Error::NotFound(format!("namespace {ns}")))
    }

    fn namespace_mut(&mut self, ns: &str) -> Result<&mut NamespaceState> {
        self.namespaces
            .get_mut(ns)
            .ok_or_else(|| Error::NotFound(format!("namespace {ns}")))
    }

    /// Resolve a sender identity id from its secret.
    fn identity_by_secret<'a>(
        ns: &'a NamespaceState,
        secret: &str,
    ) -> Result<(&'a str, &'a IdentityState)> {
        ns.identities
            .iter()
            .find(|(_, identity)| identity.secret == secret)
            .map(|(id, identity)| (id.as_str(), identity))
            .ok_or_else(|| Error::Auth("unknown identity secret".into()))
    }

    // ── provisioning ─────────────────────────────────────────────────

    pub fn create_namespace(&mut self, display_name: &str) -> NamespaceGrant {
        let ns_id = format!("ns-{}", Uuid::new_v4().simple());
        let ns_secret = Uuid::new_v4().simple().to_string();
        self.namespaces.insert(
            ns_id.clone(),
            NamespaceState {
                secret: ns_secret.clone(),
                display_name: display_name.to_owned(),
                identities: HashMap::new(),
                rooms: HashMap::new(),
            },
        );
        NamespaceGrant {
            ns_id,
            ns_secret,
            display_name: display_name.to_owned(),
        }
    }

    pub fn create_identity(
        &mut self,
        ns: &str,
        display_name: &str,
        ns_secret: &str,
    ) -> Result<IdentityGrant> {
        let namespace = self.namespace_mut(ns)?;
        if namespace.secret != ns_secret {
            return Err(Error::Auth("bad namespace secret".into()));
        }
        let id = format!("id-{}", Uuid::new_v4().simple());
        let secret = Uuid::new_v4().simple().to_string();
        namespace.identities.insert(
            id.clone(),
            IdentityState {
                secret: secret.clone(),
                display_name: display_name.to_owned(),
                inbox: Vec::new(),
            },
        );
        Ok(IdentityGrant {
            id,
            secret,
            display_name: display_name.to_owned(),
        })
    }

    pub fn create_room(
        &mut self,
        ns: &str,
        creator_secret: &str,
        display_name: &str,
    ) -> Result<RoomGrant> {
        let namespace = self.namespace_mut(ns)?;
        let creator_id = {
            let (id, _) = Self::identity_by_secret(namespace, creator_secret)?;
            id.to_owned()
        };
        let room_id = format!("room-{}", Uuid::new_v4().simple());
        let mut members = BTreeSet::new();
        members.insert(creator_id);
        namespace.rooms.insert(
            room_id.clone(),
            RoomState {
                display_name: display_name.to_owned(),
                members,
                messages: Vec::new(),
            },
        );
        Ok(RoomGrant {
            room_id,
            display_name: display_name.to_owned(),
        })
    }

    /// `secret` may be the namespace secret or the secret of an existing
    /// room member.
    pub fn add_room_member(
        &mut self,
        ns: &str,
        room_id: &str,
        identity_id: &str,
        secret: &str,
    ) -> Result<()> {
        let namespace = self.namespace_mut(ns)?;
        if !namespace.identities.contains_key(identity_id) {
            return Err(Error::NotFound(format!("identity {identity_id}")));
        }

        let authorized = namespace.secret == secret
            || namespace
                .rooms
                .get(room_id)
                .map(|room| {
                    room.members.iter().any(|member| {
                        namespace
                            .identities
                            .get(member)
                            .is_some_and(|i| i.secret == secret)
                    })
                })
                .unwrap_or(false);
        if !authorized {
            return Err(Error::Auth("not authorized to add room members".into()));
        }

        let room = namespace
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;
        room.members.insert(identity_id.to_owned());
        Ok(())
    }

    // ── invites ──────────────────────────────────────────────────────

    pub fn store_invite(&mut self, token: String, invite: StoredInvite) {
        self.invites.insert(token, invite);
    }

    /// Invites stay claimable so a restarted worker can reconnect with the
    /// same URL.
    pub fn claim_token(&self, token: &str) -> Result<StoredInvite> {
        self.invites
            .get(token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("invite token {token}")))
    }

    // ── messaging ────────────────────────────────────────────────────

    pub fn send_message(
        &mut self,
        ns: &str,
        from_secret: &str,
        to_id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let mid = self.next_mid();
        let namespace = self.namespace_mut(ns)?;
        let from_id = {
            let (id, _) = Self::identity_by_secret(namespace, from_secret)?;
            id.to_owned()
        };
        let envelope = Envelope {
            mid: mid.clone(),
            from_id,
            content_type: content_type.to_owned(),
            body: body.to_owned(),
            created_at: Utc::now(),
        };
        let recipient = namespace
            .identities
            .get_mut(to_id)
            .ok_or_else(|| Error::NotFound(format!("identity {to_id}")))?;
        recipient.inbox.push(envelope);
        Ok(mid)
    }

    pub fn send_room_message(
        &mut self,
        ns: &str,
        room_id: &str,
        secret: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let mid = self.next_mid();
        let namespace = self.namespace_mut(ns)?;
        let from_id = {
            let (id, _) = Self::identity_by_secret(namespace, secret)?;
            id.to_owned()
        };
        let room = namespace
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;
        if !room.members.contains(&from_id) {
            return Err(Error::Auth(format!("{from_id} is not a member of {room_id}")));
        }
        room.messages.push(Envelope {
            mid: mid.clone(),
            from_id,
            content_type: content_type.to_owned(),
            body: body.to_owned(),
            created_at: Utc::now(),
        });
        Ok(mid)
    }

    pub fn get_inbox(
        &self,
        ns: &str,
        identity_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        let namespace = self.namespace(ns)?;
        let identity = namespace
            .identities
            .get(identity_id)
            .ok_or_else(|| Error::NotFound(format!("identity {identity_id}")))?;
        if identity.secret != secret {
            return Err(Error::Auth("bad identity secret".into()));
        }
        Ok(after(&identity.inbox, after_mid))
    }

    pub fn get_room_messages(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        let namespace = self.namespace(ns)?;
        let (reader_id, _) = Self::identity_by_secret(namespace, secret)?;
        let room = namespace
            .rooms
            .get(room_id)
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;
        if !room.members.contains(reader_id) {
            return Err(Error::Auth(format!("{reader_id} is not a member of {room_id}")));
        }
        Ok(after(&room.messages, after_mid))
    }

    /// Topics (`inbox:<id>` / `room:<id>`) that hold a message newer than
    /// the supplied cursor.
    pub fn topics_with_news(
        &self,
        ns: &str,
        topics: &BTreeMap<String, Option<String>>,
    ) -> Vec<String> {
        let Ok(namespace) = self.namespace(ns) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for (topic, cursor) in topics {
            let newest = if let Some(identity_id) = topic.strip_prefix("inbox:") {
                namespace
                    .identities
                    .get(identity_id)
                    .and_then(|i| i.inbox.last())
            } else if let Some(room_id) = topic.strip_prefix("room:") {
                namespace.rooms.get(room_id).and_then(|r| r.messages.last())
            } else {
                None
            };
            if let Some(envelope) = newest {
                let is_new = match cursor {
                    Some(cursor) => envelope.mid.as_str() > cursor.as_str(),
                    None => true,
                };
                if is_new {
                    events.push(topic.clone());
                }
            }
        }
        events
    }
}

fn after(messages: &[Envelope], after_mid: Option<&str>) -> Vec<Envelope> {
    match after_mid {
        Some(cursor) => messages
            .iter()
            .filter(|e| e.mid.as_str() > cursor)
            .cloned()
            .collect(),
        None => messages.to_vec(),
    }
}
