//! Wire types shared by every bus adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delivered message as stored in an inbox or room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub mid: String,
    /// Sender identity. Some bus builds emit this field as `from`.
    #[serde(alias = "from")]
    pub from_id: String,
    pub content_type: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Credentials for a freshly created namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceGrant {
    pub ns_id: String,
    pub ns_secret: String,
    pub display_name: String,
}

/// Credentials for a freshly created identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityGrant {
    pub id: String,
    pub secret: String,
    pub display_name: String,
}

/// Handle for a freshly created room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomGrant {
    pub room_id: String,
    pub display_name: String,
}

/// Everything an invite grants once claimed.
///
/// Field aliases accept the long-form names some bus builds emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedInvite {
    pub identity_id: String,
    pub identity_secret: String,
    #[serde(alias = "namespace_id", alias = "ns")]
    pub ns_id: String,
    #[serde(alias = "namespace_secret")]
    pub ns_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Result of a `subscribe` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeOutcome {
    /// True when the timeout elapsed with no new messages.
    #[serde(default)]
    pub timed_out: bool,
    /// Topic keys that have messages newer than the supplied cursor.
    #[serde(default)]
    pub events: Vec<String>,
}
