//! Pending-permission queue.
//!
//! Permission requests that no human answered immediately are queued here
//! keyed by `request_id`, manually grantable out-of-band. A pending entry
//! moves to exactly one of granted / denied / expired, all terminal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use sc_protocol::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Granted,
    Denied,
    Expired,
}

/// A permission request awaiting (or past) resolution.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPermission {
    pub request_id: String,
    pub agent_id: String,
    pub action: String,
    pub resource: String,
    pub context: String,
    pub received_at: DateTime<Utc>,
    pub status: PendingStatus,
}

pub struct PendingPermissions {
    entries: RwLock<HashMap<String, PendingPermission>>,
    ttl: Duration,
}

impl PendingPermissions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Queue a request. Re-delivery of an already-known `request_id` is a
    /// no-op (the bus is at-least-once).
    pub fn register(
        &self,
        request_id: &str,
        agent_id: &str,
        action: &str,
        resource: &str,
        context: &str,
    ) -> PendingPermission {
        let mut entries = self.entries.write();
        entries
            .entry(request_id.to_owned())
            .or_insert_with(|| PendingPermission {
                request_id: request_id.to_owned(),
                agent_id: agent_id.to_owned(),
                action: action.to_owned(),
                resource: resource.to_owned(),
                context: context.to_owned(),
                received_at: Utc::now(),
                status: PendingStatus::Pending,
            })
            .clone()
    }

    pub fn get(&self, request_id: &str) -> Option<PendingPermission> {
        self.entries.read().get(request_id).cloned()
    }

    /// Still-unanswered requests, oldest first.
    pub fn list_pending(&self) -> Vec<PendingPermission> {
        let mut pending: Vec<PendingPermission> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.status == PendingStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        pending
    }

    /// Resolve a pending entry with the given decision. Returns the
    /// resolved record, or `None` when the id is unknown or already
    /// terminal.
    pub fn resolve(&self, request_id: &str, decision: Decision) -> Option<PendingPermission> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(request_id)?;
        if entry.status != PendingStatus::Pending {
            return None;
        }
        entry.status = match decision {
            Decision::Allow | Decision::AlwaysTool | Decision::AlwaysGroup => {
                PendingStatus::Granted
            }
            Decision::Deny | Decision::Timeout => PendingStatus::Denied,
        };
        Some(entry.clone())
    }

    /// Expire and prune pending entries older than the TTL. Returns the
    /// expired request ids.
    pub fn prune_expired(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let mut expired = Vec::new();
        let mut entries = self.entries.write();
        entries.retain(|request_id, entry| {
            let stale = entry.status == PendingStatus::Pending && entry.received_at < cutoff;
            if stale {
                entry.status = PendingStatus::Expired;
                expired.push(request_id.clone());
            }
            !stale
        });
        expired
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
