//! Coordinator session: namespace provisioning, durable state, spawning,
//! tasking, and permission granting.
//!
//! Minimal state (`ns_id`, secrets, `room_id`) is persisted to a per-user
//! coordination directory so a restarted coordinator can resume the same
//! namespace and keep talking to workers whose identities outlive the
//! process. The registry is not persisted — it is rebuilt from observed
//! traffic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use sc_coordination::{CoordinationContext, ReceivedMessage};
use sc_deaddrop::{append_coordination_params, Deaddrop};
use sc_domain::config::CoordinationConfig;
use sc_domain::error::{Error, Result};
use sc_domain::trace::TraceEvent;
use sc_protocol::{CoordinationMessage, Decision};

use crate::permissions::PendingPermissions;
use crate::registry::{AgentRecord, AgentRegistry, AgentState};

/// Durable session state, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub ns_id: String,
    pub ns_secret: String,
    pub coordinator_id: String,
    pub coordinator_secret: String,
    pub room_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Result of spawning a worker: its registry record plus the invite URL to
/// hand to the new process.
#[derive(Debug, Clone)]
pub struct SpawnedAgent {
    pub record: AgentRecord,
    pub invite_url: String,
}

pub struct CoordinationSession {
    bus: Arc<dyn Deaddrop>,
    state: SessionState,
    state_path: PathBuf,
    context: CoordinationContext,
    registry: AgentRegistry,
    permissions: PendingPermissions,
    config: CoordinationConfig,
}

impl CoordinationSession {
    /// Provision a fresh namespace, coordinator identity, and coordination
    /// room, and persist the session state under `state_dir`.
    pub async fn create(
        bus: Arc<dyn Deaddrop>,
        display_name: &str,
        state_dir: &Path,
        config: CoordinationConfig,
    ) -> Result<Self> {
        let ns = bus.create_namespace(display_name).await?;
        let coordinator = bus
            .create_identity(&ns.ns_id, "Coordinator", &ns.ns_secret)
            .await?;
        let room = bus
            .create_room(&ns.ns_id, &coordinator.secret, "Coordination")
            .await?;

        let state = SessionState {
            ns_id: ns.ns_id,
            ns_secret: ns.ns_secret,
            coordinator_id: coordinator.id,
            coordinator_secret: coordinator.secret,
            room_id: room.room_id,
            display_name: display_name.to_owned(),
            created_at: Utc::now(),
        };

        std::fs::create_dir_all(state_dir)?;
        let state_path = state_dir.join(format!("{}.json", state.ns_id));
        write_state(&state_path, &state)?;

        tracing::info!(
            ns_id = %state.ns_id,
            room_id = %state.room_id,
            state_path = %state_path.display(),
            "coordination session created"
        );
        Ok(Self::assemble(bus, state, state_path, config))
    }

    /// Reload a previously persisted session; worker identities and the
    /// room live on the bus and keep working across coordinator restarts.
    pub async fn resume(
        bus: Arc<dyn Deaddrop>,
        state_path: &Path,
        config: CoordinationConfig,
    ) -> Result<Self> {
        let raw = std::fs::read_to_string(state_path)?;
        let state: SessionState = serde_json::from_str(&raw)?;
        tracing::info!(
            ns_id = %state.ns_id,
            room_id = %state.room_id,
            "coordination session resumed"
        );
        Ok(Self::assemble(bus, state, state_path.to_path_buf(), config))
    }

    fn assemble(
        bus: Arc<dyn Deaddrop>,
        state: SessionState,
        state_path: PathBuf,
        config: CoordinationConfig,
    ) -> Self {
        let context = CoordinationContext::new(
            bus.clone(),
            state.ns_id.clone(),
            state.ns_secret.clone(),
            state.coordinator_id.clone(),
            state.coordinator_secret.clone(),
            Some(state.room_id.clone()),
            None,
        )
        .with_config(&config);

        let registry = AgentRegistry::new();
        registry.register("coordinator", &state.coordinator_id, &state.display_name, "");
        registry.update_state("coordinator", AgentState::Idle);

        let permissions = PendingPermissions::new(config.pending_permission_ttl);
        Self {
            bus,
            state,
            state_path,
            context,
            registry,
            permissions,
            config,
        }
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn context(&self) -> &CoordinationContext {
        &self.context
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> &PendingPermissions {
        &self.permissions
    }

    // ── agent provisioning ───────────────────────────────────────────

    /// Create a worker identity, add it to the coordination room, and
    /// build its invite URL (bus-native, with `room` / `coordinator`
    /// appended).
    pub async fn spawn_agent(
        &self,
        agent_id: &str,
        display_name: &str,
        workspace_name: &str,
    ) -> Result<SpawnedAgent> {
        let identity = self
            .bus
            .create_identity(&self.state.ns_id, display_name, &self.state.ns_secret)
            .await?;
        self.bus
            .add_room_member(
                &self.state.ns_id,
                &self.state.room_id,
                &identity.id,
                &self.state.ns_secret,
            )
            .await?;
        let invite_url = self
            .bus
            .create_invite(
                &self.state.ns_id,
                &identity.id,
                &identity.secret,
                &self.state.ns_secret,
                display_name,
            )
            .await?;
        let invite_url = append_coordination_params(
            &invite_url,
            &self.state.room_id,
            &self.state.coordinator_id,
        )?;

        let record =
            self.registry
                .register(agent_id, &identity.id, display_name, workspace_name);
        TraceEvent::AgentSpawned {
            agent_id: agent_id.to_owned(),
            identity_id: identity.id,
        }
        .emit();

        Ok(SpawnedAgent { record, invite_url })
    }

    // ── tasking ──────────────────────────────────────────────────────

    /// Send a `task_assign` to the agent's inbox and mark it assigned.
    pub async fn assign_task(
        &self,
        agent_id: &str,
        task_id: &str,
        description: &str,
        context: Map<String, serde_json::Value>,
    ) -> Result<()> {
        let record = self
            .registry
            .get(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;

        self.context
            .send(
                &record.identity_id,
                &CoordinationMessage::TaskAssign {
                    task_id: task_id.to_owned(),
                    description: description.to_owned(),
                    context,
                    deadline: None,
                },
                true,
            )
            .await?;

        self.registry.update_state(agent_id, AgentState::Assigned);
        self.registry
            .set_current_task(agent_id, Some(task_id.to_owned()));
        TraceEvent::TaskAssigned {
            task_id: task_id.to_owned(),
            agent_id: agent_id.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Ask an agent to shut down.
    pub async fn terminate_agent(&self, agent_id: &str, reason: Option<String>) -> Result<()> {
        let record = self
            .registry
            .get(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        self.context
            .send(
                &record.identity_id,
                &CoordinationMessage::Terminate {
                    reason,
                    timestamp: Utc::now(),
                },
                true,
            )
            .await?;
        self.registry
            .update_state(agent_id, AgentState::Terminating);
        Ok(())
    }

    // ── observation loop ─────────────────────────────────────────────

    /// Wait for traffic, then drive the registry and permission queue from
    /// every message seen. Returns the messages for the caller's own
    /// handling (rendering, auto-replies).
    pub async fn process_messages(&self, timeout: Duration) -> Result<Vec<ReceivedMessage>> {
        let messages = self.context.wait_for_messages(timeout, true).await?;
        for message in &messages {
            self.observe(message);
        }
        Ok(messages)
    }

    /// Apply one received message to coordinator state.
    pub fn observe(&self, received: &ReceivedMessage) {
        self.registry.observe(received);
        match &received.message {
            CoordinationMessage::PermissionRequest {
                request_id,
                agent_id,
                action,
                resource,
                context,
                ..
            } => {
                self.permissions
                    .register(request_id, agent_id, action, resource, context);
                TraceEvent::PermissionQueued {
                    request_id: request_id.clone(),
                    agent_id: agent_id.clone(),
                    action: action.clone(),
                }
                .emit();
            }
            CoordinationMessage::Result {
                task_id,
                agent_id,
                status,
                ..
            } => {
                TraceEvent::TaskResult {
                    task_id: task_id.clone(),
                    agent_id: agent_id.clone(),
                    status: status.as_str().to_owned(),
                }
                .emit();
            }
            _ => {}
        }
    }

    // ── permissions ──────────────────────────────────────────────────

    /// Answer a queued permission request: send the `permission_response`
    /// to the requesting worker's inbox and mark the entry resolved.
    /// Returns false when the request id is unknown or already resolved.
    pub async fn grant_permission(
        &self,
        request_id: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<bool> {
        let Some(entry) = self.permissions.get(request_id) else {
            return Ok(false);
        };
        if entry.status != crate::permissions::PendingStatus::Pending {
            return Ok(false);
        }
        let record = self
            .registry
            .get(&entry.agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {}", entry.agent_id)))?;

        self.context
            .send(
                &record.identity_id,
                &CoordinationMessage::PermissionResponse {
                    request_id: request_id.to_owned(),
                    decision,
                    reason,
                    timestamp: Utc::now(),
                },
                true,
            )
            .await?;

        self.permissions.resolve(request_id, decision);
        TraceEvent::PermissionResolved {
            request_id: request_id.to_owned(),
            decision: decision.as_str().to_owned(),
        }
        .emit();
        Ok(true)
    }

    /// Periodic housekeeping: expire stale permissions, mark silent agents
    /// dead.
    pub fn housekeeping(&self) -> (Vec<String>, Vec<String>) {
        let expired = self.permissions.prune_expired();
        let dead = self.registry.sweep_stale(self.config.staleness_window);
        (expired, dead)
    }
}

fn write_state(path: &Path, state: &SessionState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
