use serde::Serialize;

/// Structured trace events emitted across all coordination crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MessageSent {
        to: String,
        msg_type: String,
        compressed: bool,
        bytes: usize,
    },
    BroadcastSent {
        room_id: String,
        msg_type: String,
        bytes: usize,
    },
    MessageSkipped {
        mid: String,
        reason: String,
    },
    AgentSpawned {
        agent_id: String,
        identity_id: String,
    },
    AgentStateChanged {
        agent_id: String,
        state: String,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
    },
    TaskResult {
        task_id: String,
        agent_id: String,
        status: String,
    },
    PermissionQueued {
        request_id: String,
        agent_id: String,
        action: String,
    },
    PermissionResolved {
        request_id: String,
        decision: String,
    },
    WorkerAnnounced {
        agent_id: String,
    },
    SessionFlushed {
        session_id: String,
        new_messages: usize,
        new_usage: usize,
    },
    ContextRotated {
        session_id: String,
        archive: String,
    },
    ContextCompacted {
        session_id: String,
        message_count: usize,
    },
    SessionMigrated {
        session_dir: String,
        messages: usize,
        sub_agents: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "silica_event");
    }
}
