//! Message types exchanged between coordinators, workers, and humans.
//!
//! Every message carries an explicit `type` tag on the wire. Decoding is
//! schema-tolerant: unknown fields are ignored and absent optional fields
//! get defaults, but an absent or unrecognised tag is refused at the
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sc_domain::error::{Error, Result};

/// Outcome a worker reports for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Complete,
    Failed,
    Blocked,
    Partial,
    Terminated,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Partial => "partial",
            Self::Terminated => "terminated",
        }
    }
}

/// Coordinator's answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    AlwaysTool,
    AlwaysGroup,
    Timeout,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::AlwaysTool => "always_tool",
            Self::AlwaysGroup => "always_group",
            Self::Timeout => "timeout",
        }
    }
}

/// A coordination protocol message.
///
/// The `type` tag dispatches decoding; each variant mirrors one message of
/// the coordination protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationMessage {
    /// Coordinator → worker: assign a task.
    TaskAssign {
        task_id: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        context: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<DateTime<Utc>>,
    },

    /// Worker → coordinator: task received.
    TaskAck {
        task_id: String,
        agent_id: String,
        #[serde(default = "Utc::now")]
        acknowledged_at: DateTime<Utc>,
    },

    /// Worker → room: progress update.
    Progress {
        task_id: String,
        agent_id: String,
        /// Fraction complete in `[0, 1]`, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default)]
        message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Worker → coordinator: task outcome.
    Result {
        task_id: String,
        agent_id: String,
        #[serde(default)]
        status: TaskStatus,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Worker → coordinator: request to perform a gated action.
    PermissionRequest {
        request_id: String,
        #[serde(default)]
        task_id: String,
        agent_id: String,
        action: String,
        resource: String,
        /// Human-readable explanation shown to the granting side.
        #[serde(default)]
        context: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Coordinator → worker: verdict for a pending permission request.
    PermissionResponse {
        request_id: String,
        decision: Decision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Worker → room: available for work.
    Idle {
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_task_id: Option<String>,
        #[serde(default = "Utc::now")]
        available_since: DateTime<Utc>,
    },

    /// Worker → coordinator: a question that blocks the task.
    Question {
        question_id: String,
        #[serde(default)]
        task_id: String,
        agent_id: String,
        #[serde(default)]
        question: String,
        /// Optional predefined answer options.
        #[serde(default)]
        options: Vec<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Coordinator → worker: answer to a question.
    Answer {
        question_id: String,
        #[serde(default)]
        task_id: String,
        #[serde(default)]
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Coordinator → worker: shut down.
    Terminate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

/// Every tag the decoder accepts.
const KNOWN_TYPES: &[&str] = &[
    "task_assign",
    "task_ack",
    "progress",
    "result",
    "permission_request",
    "permission_response",
    "idle",
    "question",
    "answer",
    "terminate",
];

impl CoordinationMessage {
    /// The wire tag of this message.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::TaskAssign { .. } => "task_assign",
            Self::TaskAck { .. } => "task_ack",
            Self::Progress { .. } => "progress",
            Self::Result { .. } => "result",
            Self::PermissionRequest { .. } => "permission_request",
            Self::PermissionResponse { .. } => "permission_response",
            Self::Idle { .. } => "idle",
            Self::Question { .. } => "question",
            Self::Answer { .. } => "answer",
            Self::Terminate { .. } => "terminate",
        }
    }

    /// Serialize to the canonical JSON wire form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON string, dispatching on the `type` tag.
    pub fn decode(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        Self::from_value(value)
    }

    /// Decode from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(Error::MissingType)?;
        if !KNOWN_TYPES.contains(&tag) {
            return Err(Error::UnknownMessageType(tag.to_owned()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: CoordinationMessage) {
        let encoded = msg.encode().unwrap();
        let decoded = CoordinationMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_all_variants() {
        let now = Utc::now();
        roundtrip(CoordinationMessage::TaskAssign {
            task_id: "t1".into(),
            description: "count things".into(),
            context: Map::new(),
            deadline: None,
        });
        roundtrip(CoordinationMessage::TaskAck {
            task_id: "t1".into(),
            agent_id: "w-001".into(),
            acknowledged_at: now,
        });
        roundtrip(CoordinationMessage::Progress {
            task_id: "t1".into(),
            agent_id: "w-001".into(),
            progress: Some(0.33),
            message: "step 1/3".into(),
            timestamp: now,
        });
        roundtrip(CoordinationMessage::Result {
            task_id: "t1".into(),
            agent_id: "w-001".into(),
            status: TaskStatus::Complete,
            data: Map::new(),
            summary: "done".into(),
            error: None,
            timestamp: now,
        });
        roundtrip(CoordinationMessage::PermissionRequest {
            request_id: "w-001-perm-abcd1234".into(),
            task_id: "t1".into(),
            agent_id: "w-001".into(),
            action: "shell".into(),
            resource: "rm -rf /tmp/x".into(),
            context: "cleanup".into(),
            timestamp: now,
        });
        roundtrip(CoordinationMessage::PermissionResponse {
            request_id: "w-001-perm-abcd1234".into(),
            decision: Decision::Allow,
            reason: Some("ok".into()),
            timestamp: now,
        });
        roundtrip(CoordinationMessage::Idle {
            agent_id: "w-001".into(),
            completed_task_id: Some("t1".into()),
            available_since: now,
        });
        roundtrip(CoordinationMessage::Question {
            question_id: "q1".into(),
            task_id: "t1".into(),
            agent_id: "w-001".into(),
            question: "which branch?".into(),
            options: vec!["main".into(), "dev".into()],
            timestamp: now,
        });
        roundtrip(CoordinationMessage::Answer {
            question_id: "q1".into(),
            task_id: "t1".into(),
            answer: "main".into(),
            context: None,
            timestamp: now,
        });
        roundtrip(CoordinationMessage::Terminate {
            reason: Some("session over".into()),
            timestamp: now,
        });
    }

    #[test]
    fn tags_match_wire_names() {
        let msg = CoordinationMessage::Idle {
            agent_id: "w".into(),
            completed_task_id: None,
            available_since: Utc::now(),
        };
        let json = msg.encode().unwrap();
        assert!(json.contains("\"type\":\"idle\""));
        assert_eq!(msg.message_type(), "idle");
    }

    #[test]
    fn missing_type_is_refused() {
        let err = CoordinationMessage::decode(r#"{"task_id": "t1"}"#).unwrap_err();
        assert_eq!(err.kind(), "MissingType");
    }

    #[test]
    fn unknown_type_is_refused() {
        let err =
            CoordinationMessage::decode(r#"{"type": "launch_missiles"}"#).unwrap_err();
        assert_eq!(err.kind(), "UnknownMessageType");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = CoordinationMessage::decode(
            r#"{"type": "idle", "agent_id": "w-001", "shiny_new_field": 42}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            CoordinationMessage::Idle { ref agent_id, .. } if agent_id == "w-001"
        ));
    }

    #[test]
    fn absent_optionals_get_defaults() {
        let msg = CoordinationMessage::decode(
            r#"{"type": "result", "task_id": "t1", "agent_id": "w-001"}"#,
        )
        .unwrap();
        match msg {
            CoordinationMessage::Result {
                status,
                summary,
                error,
                ..
            } => {
                assert_eq!(status, TaskStatus::Complete);
                assert!(summary.is_empty());
                assert!(error.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decision_wire_values() {
        assert_eq!(
            serde_json::to_string(&Decision::AlwaysTool).unwrap(),
            "\"always_tool\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Terminated).unwrap(),
            "\"terminated\""
        );
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let msg = CoordinationMessage::Terminate {
            reason: None,
            timestamp: Utc::now(),
        };
        let json = msg.encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
