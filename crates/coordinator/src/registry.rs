//! Agent registry — lifecycle state derived from observed messages.
//!
//! Workers never write here. The coordinator feeds every received
//! coordination message through [`AgentRegistry::observe`], which upserts
//! records and applies the lifecycle transitions:
//!
//! ```text
//! idle → Idle    task_ack → Working    progress → Working (touch)
//! result → Idle (terminated → Dead)    silence past the window → Dead
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sc_coordination::ReceivedMessage;
use sc_domain::trace::TraceEvent;
use sc_protocol::{CoordinationMessage, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Spawning,
    Idle,
    Assigned,
    Working,
    Terminating,
    Dead,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Idle => "idle",
            Self::Assigned => "assigned",
            Self::Working => "working",
            Self::Terminating => "terminating",
            Self::Dead => "dead",
        }
    }
}

/// One registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable slug inside the session (e.g. `w-001`).
    pub agent_id: String,
    pub identity_id: String,
    pub display_name: String,
    pub workspace_name: String,
    pub state: AgentState,
    pub last_seen: DateTime<Utc>,
    pub current_task_id: Option<String>,
    pub last_task_status: Option<TaskStatus>,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        agent_id: &str,
        identity_id: &str,
        display_name: &str,
        workspace_name: &str,
    ) -> AgentRecord {
        let record = AgentRecord {
            agent_id: agent_id.to_owned(),
            identity_id: identity_id.to_owned(),
            display_name: display_name.to_owned(),
            workspace_name: workspace_name.to_owned(),
            state: AgentState::Spawning,
            last_seen: Utc::now(),
            current_task_id: None,
            last_task_status: None,
        };
        self.agents
            .write()
            .insert(agent_id.to_owned(), record.clone());
        record
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn by_identity(&self, identity_id: &str) -> Option<AgentRecord> {
        self.agents
            .read()
            .values()
            .find(|record| record.identity_id == identity_id)
            .cloned()
    }

    /// All records, sorted by agent id.
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.agents.read().values().cloned().collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    /// Force a state (used when the coordinator itself acts, e.g. on
    /// assignment or termination). Returns false on unknown agent.
    pub fn update_state(&self, agent_id: &str, state: AgentState) -> bool {
        let mut agents = self.agents.write();
        let Some(record) = agents.get_mut(agent_id) else {
            return false;
        };
        record.state = state;
        record.last_seen = Utc::now();
        TraceEvent::AgentStateChanged {
            agent_id: agent_id.to_owned(),
            state: state.as_str().to_owned(),
        }
        .emit();
        true
    }

    pub fn set_current_task(&self, agent_id: &str, task_id: Option<String>) -> bool {
        let mut agents = self.agents.write();
        match agents.get_mut(agent_id) {
            Some(record) => {
                record.current_task_id = task_id;
                true
            }
            None => false,
        }
    }

    /// Apply one observed message to the registry.
    ///
    /// Unknown agent ids are upserted with the sender identity: after a
    /// coordinator restart the registry is rebuilt entirely from traffic
    /// (worker identities outlive the coordinator process).
    pub fn observe(&self, received: &ReceivedMessage) {
        let Some(agent_id) = message_agent_id(&received.message) else {
            return;
        };

        let mut agents = self.agents.write();
        let record = agents.entry(agent_id.to_owned()).or_insert_with(|| AgentRecord {
            agent_id: agent_id.to_owned(),
            identity_id: received.from_id.clone(),
            display_name: agent_id.to_owned(),
            workspace_name: String::new(),
            state: AgentState::Spawning,
            last_seen: Utc::now(),
            current_task_id: None,
            last_task_status: None,
        });
        record.last_seen = Utc::now();
        // Direct messages always carry the authoritative sender identity.
        if !received.is_room_message {
            record.identity_id = received.from_id.clone();
        }

        let new_state = match &received.message {
            CoordinationMessage::Idle { .. } => {
                record.current_task_id = None;
                Some(AgentState::Idle)
            }
            CoordinationMessage::TaskAck { task_id, .. } => {
                record.current_task_id = Some(task_id.clone());
                Some(AgentState::Working)
            }
            CoordinationMessage::Progress { .. } => Some(AgentState::Working),
            CoordinationMessage::Result { status, .. } => {
                record.current_task_id = None;
                record.last_task_status = Some(*status);
                if *status == TaskStatus::Terminated {
                    Some(AgentState::Dead)
                } else {
                    Some(AgentState::Idle)
                }
            }
            // Permission and question traffic proves liveness but does not
            // change lifecycle state.
            CoordinationMessage::PermissionRequest { .. }
            | CoordinationMessage::Question { .. } => None,
            _ => None,
        };

        if let Some(state) = new_state {
            if record.state != state {
                record.state = state;
                TraceEvent::AgentStateChanged {
                    agent_id: agent_id.to_owned(),
                    state: state.as_str().to_owned(),
                }
                .emit();
            }
        }
    }

    /// Mark agents silent for longer than `window` as dead. Returns the
    /// affected agent ids.
    pub fn sweep_stale(&self, window: Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let mut swept = Vec::new();
        let mut agents = self.agents.write();
        for record in agents.values_mut() {
            if record.state != AgentState::Dead && record.last_seen < cutoff {
                record.state = AgentState::Dead;
                swept.push(record.agent_id.clone());
                TraceEvent::AgentStateChanged {
                    agent_id: record.agent_id.clone(),
                    state: AgentState::Dead.as_str().to_owned(),
                }
                .emit();
            }
        }
        swept
    }
}

/// The agent id a message speaks for, if any.
fn message_agent_id(message: &CoordinationMessage) -> Option<&str> {
    match message {
        CoordinationMessage::TaskAck { agent_id, .. }
        | CoordinationMessage::Progress { agent_id, .. }
        | CoordinationMessage::Result { agent_id, .. }
        | CoordinationMessage::PermissionRequest { agent_id, .. }
        | CoordinationMessage::Idle { agent_id, .. }
        | CoordinationMessage::Question { agent_id, .. } => Some(agent_id),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
