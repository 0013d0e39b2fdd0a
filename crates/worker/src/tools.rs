//! Coordination tools a worker invokes between turns.
//!
//! One [`WorkerTools`] handle per process, passed explicitly to whatever
//! needs it — there is no global context. Local state is deliberately
//! minimal: the current task id, peers observed in the room, rooms this
//! worker created or joined, and a stash of inbox messages consumed while
//! a permission round-trip was blocking.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use sc_coordination::{CoordinationContext, ReceivedMessage};
use sc_deaddrop::Envelope;
use sc_domain::config::CoordinationConfig;
use sc_domain::error::{Error, Result};
use sc_protocol::{CoordinationMessage, TaskStatus, PEER_CONTENT_TYPE};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
struct PeerRoom {
    display_name: String,
    last_mid: Option<String>,
}

pub struct WorkerTools {
    context: Arc<CoordinationContext>,
    agent_id: String,
    current_task: Mutex<Option<String>>,
    /// Non-permission messages consumed during a permission wait; drained
    /// by the next `check_inbox`.
    pub(crate) stash: Mutex<Vec<ReceivedMessage>>,
    /// agent_id → identity_id for workers seen in the room.
    peers: Mutex<BTreeMap<String, String>>,
    /// Collaboration rooms this worker created or joined.
    rooms: Mutex<BTreeMap<String, PeerRoom>>,
    pub(crate) permission_poll_interval: std::time::Duration,
    pub(crate) queue_on_timeout: bool,
}

impl WorkerTools {
    pub fn new(
        context: Arc<CoordinationContext>,
        agent_id: impl Into<String>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            context,
            agent_id: agent_id.into(),
            current_task: Mutex::new(None),
            stash: Mutex::new(Vec::new()),
            peers: Mutex::new(BTreeMap::new()),
            rooms: Mutex::new(BTreeMap::new()),
            permission_poll_interval: config.permission_poll_interval,
            queue_on_timeout: config.queue_on_timeout,
        }
    }

    pub fn context(&self) -> &Arc<CoordinationContext> {
        &self.context
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn current_task(&self) -> Option<String> {
        self.current_task.lock().clone()
    }

    pub fn set_current_task(&self, task_id: Option<String>) {
        *self.current_task.lock() = task_id;
    }

    // ── inbox ────────────────────────────────────────────────────────

    /// Direct inbox only, non-blocking. Surfaces messages stashed during a
    /// permission wait first, so nothing is lost to the RPC.
    pub async fn check_inbox(&self) -> Result<Vec<ReceivedMessage>> {
        let mut messages: Vec<ReceivedMessage> = self.stash.lock().drain(..).collect();
        messages.extend(self.context.receive(false, true).await?);
        Ok(messages)
    }

    pub(crate) fn drain_stash(&self) -> Vec<ReceivedMessage> {
        self.stash.lock().drain(..).collect()
    }

    // ── coordinator-bound messages ───────────────────────────────────

    /// Acknowledge a task; sets it as the current task.
    pub async fn send_ack(&self, task_id: &str) -> Result<()> {
        self.set_current_task(Some(task_id.to_owned()));
        self.context
            .send_to_coordinator(
                &CoordinationMessage::TaskAck {
                    task_id: task_id.to_owned(),
                    agent_id: self.agent_id.clone(),
                    acknowledged_at: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        Ok(())
    }

    /// Report the task outcome; clears the current task.
    pub async fn send_result(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &str,
        data: Map<String, Value>,
        error: Option<String>,
    ) -> Result<()> {
        self.context
            .send_to_coordinator(
                &CoordinationMessage::Result {
                    task_id: task_id.to_owned(),
                    agent_id: self.agent_id.clone(),
                    status,
                    data,
                    summary: summary.to_owned(),
                    error,
                    timestamp: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        self.set_current_task(None);
        Ok(())
    }

    /// Report progress straight to the coordinator's inbox (room
    /// broadcasts go through [`broadcast_status`](Self::broadcast_status)).
    pub async fn send_progress(&self, message: &str, progress: Option<f64>) -> Result<()> {
        self.context
            .send_to_coordinator(
                &CoordinationMessage::Progress {
                    task_id: self.current_task().unwrap_or_default(),
                    agent_id: self.agent_id.clone(),
                    progress,
                    message: message.to_owned(),
                    timestamp: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        Ok(())
    }

    /// Ask the coordinator a blocking question.
    pub async fn send_question(
        &self,
        question_id: &str,
        question: &str,
        options: Vec<String>,
    ) -> Result<()> {
        self.context
            .send_to_coordinator(
                &CoordinationMessage::Question {
                    question_id: question_id.to_owned(),
                    task_id: self.current_task().unwrap_or_default(),
                    agent_id: self.agent_id.clone(),
                    question: question.to_owned(),
                    options,
                    timestamp: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        Ok(())
    }

    // ── room-bound messages ──────────────────────────────────────────

    /// Broadcast a progress update for the current task.
    pub async fn broadcast_status(&self, message: &str, progress: Option<f64>) -> Result<()> {
        self.context
            .broadcast(
                &CoordinationMessage::Progress {
                    task_id: self.current_task().unwrap_or_default(),
                    agent_id: self.agent_id.clone(),
                    progress,
                    message: message.to_owned(),
                    timestamp: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        Ok(())
    }

    /// Broadcast availability; clears the current task.
    pub async fn mark_idle(&self, completed_task_id: Option<String>) -> Result<()> {
        self.context
            .broadcast(
                &CoordinationMessage::Idle {
                    agent_id: self.agent_id.clone(),
                    completed_task_id,
                    available_since: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        self.set_current_task(None);
        Ok(())
    }

    // ── peer messaging ───────────────────────────────────────────────

    /// Record peers announced in room traffic. Fed by the agent loop.
    pub fn observe_peers(&self, messages: &[ReceivedMessage]) {
        let mut peers = self.peers.lock();
        for received in messages {
            if !received.is_room_message {
                continue;
            }
            let agent_id = match &received.message {
                CoordinationMessage::Idle { agent_id, .. }
                | CoordinationMessage::Progress { agent_id, .. }
                | CoordinationMessage::Result { agent_id, .. } => agent_id,
                _ => continue,
            };
            if agent_id != &self.agent_id {
                peers.insert(agent_id.clone(), received.from_id.clone());
            }
        }
    }

    /// Workers observed in the coordination room, as
    /// `(agent_id, identity_id)` pairs.
    pub fn list_workers(&self) -> Vec<(String, String)> {
        self.peers
            .lock()
            .iter()
            .map(|(agent, identity)| (agent.clone(), identity.clone()))
            .collect()
    }

    /// Send an opaque peer payload to another worker's inbox. Peer traffic
    /// uses its own content type and never enters the coordination codec.
    pub async fn send_to_worker(&self, identity_id: &str, payload: &str) -> Result<String> {
        self.context
            .bus()
            .send_message(
                self.context.ns_id(),
                self.context.identity_secret(),
                identity_id,
                payload,
                PEER_CONTENT_TYPE,
            )
            .await
    }

    /// Create a side room for worker-to-worker collaboration.
    pub async fn create_collaboration_room(&self, display_name: &str) -> Result<String> {
        let room = self
            .context
            .bus()
            .create_room(
                self.context.ns_id(),
                self.context.identity_secret(),
                display_name,
            )
            .await?;
        self.rooms.lock().insert(
            room.room_id.clone(),
            PeerRoom {
                display_name: display_name.to_owned(),
                last_mid: None,
            },
        );
        Ok(room.room_id)
    }

    /// Add another worker to a collaboration room we belong to.
    pub async fn invite_to_room(&self, room_id: &str, identity_id: &str) -> Result<()> {
        if !self.rooms.lock().contains_key(room_id) {
            return Err(Error::NotFound(format!("not a member of room {room_id}")));
        }
        self.context
            .bus()
            .add_room_member(
                self.context.ns_id(),
                room_id,
                identity_id,
                self.context.identity_secret(),
            )
            .await
    }

    /// Note a room someone else invited us into.
    pub fn track_room(&self, room_id: &str, display_name: &str) {
        self.rooms.lock().entry(room_id.to_owned()).or_insert(PeerRoom {
            display_name: display_name.to_owned(),
            last_mid: None,
        });
    }

    pub async fn send_to_room(&self, room_id: &str, payload: &str) -> Result<String> {
        self.context
            .bus()
            .send_room_message(
                self.context.ns_id(),
                room_id,
                self.context.identity_secret(),
                payload,
                PEER_CONTENT_TYPE,
            )
            .await
    }

    /// Rooms this worker created or was invited into, as
    /// `(room_id, display_name)` pairs.
    pub fn list_my_rooms(&self) -> Vec<(String, String)> {
        self.rooms
            .lock()
            .iter()
            .map(|(id, room)| (id.clone(), room.display_name.clone()))
            .collect()
    }

    /// New raw envelopes from a collaboration room since the last call.
    pub async fn get_room_messages(&self, room_id: &str) -> Result<Vec<Envelope>> {
        let cursor = self
            .rooms
            .lock()
            .get(room_id)
            .and_then(|room| room.last_mid.clone());
        let envelopes = self
            .context
            .bus()
            .get_room_messages(
                self.context.ns_id(),
                room_id,
                self.context.identity_secret(),
                cursor.as_deref(),
            )
            .await?;
        if let Some(last) = envelopes.last() {
            if let Some(room) = self.rooms.lock().get_mut(room_id) {
                room.last_mid = Some(last.mid.clone());
            }
        }
        Ok(envelopes)
    }
}
