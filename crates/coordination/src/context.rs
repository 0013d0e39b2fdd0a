//! Coordination transport context.
//!
//! Combines deaddrop operations with protocol serialization and
//! compression, tracking per-stream delivery cursors so every message is
//! surfaced at most once. Malformed inbound messages are skipped with the
//! cursor advanced (they can never livelock the consumer); transport
//! failures leave the cursor untouched so the next fetch sees the same
//! messages again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sc_deaddrop::{ClaimedInvite, Deaddrop, Envelope};
use sc_domain::config::CoordinationConfig;
use sc_domain::error::{Error, Result};
use sc_domain::trace::TraceEvent;
use sc_protocol::{
    compress, compression_param, content_type_for, decompress, is_coordination,
    CoordinationMessage,
};

use crate::retry::RetryPolicy;

/// A received coordination message with bus metadata.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: CoordinationMessage,
    pub from_id: String,
    pub mid: String,
    pub is_room_message: bool,
}

#[derive(Debug, Clone, Default)]
struct Cursors {
    inbox: Option<String>,
    room: Option<String>,
}

/// One identity's connection to a coordination namespace.
pub struct CoordinationContext {
    bus: Arc<dyn Deaddrop>,
    ns_id: String,
    ns_secret: String,
    identity_id: String,
    identity_secret: String,
    room_id: Option<String>,
    coordinator_id: Option<String>,
    cursors: Mutex<Cursors>,
    retry: RetryPolicy,
    compression_threshold: usize,
    poll_interval: Duration,
}

impl CoordinationContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn Deaddrop>,
        ns_id: impl Into<String>,
        ns_secret: impl Into<String>,
        identity_id: impl Into<String>,
        identity_secret: impl Into<String>,
        room_id: Option<String>,
        coordinator_id: Option<String>,
    ) -> Self {
        let cfg = CoordinationConfig::default();
        Self {
            bus,
            ns_id: ns_id.into(),
            ns_secret: ns_secret.into(),
            identity_id: identity_id.into(),
            identity_secret: identity_secret.into(),
            room_id,
            coordinator_id,
            cursors: Mutex::new(Cursors::default()),
            retry: RetryPolicy::from_config(&cfg.retry),
            compression_threshold: cfg.compression_threshold,
            poll_interval: cfg.poll_interval,
        }
    }

    /// Build a context from a claimed invite (worker side).
    pub fn from_claim(bus: Arc<dyn Deaddrop>, claim: &ClaimedInvite) -> Self {
        Self::new(
            bus,
            claim.ns_id.clone(),
            claim.ns_secret.clone(),
            claim.identity_id.clone(),
            claim.identity_secret.clone(),
            claim.room_id.clone(),
            claim.coordinator_id.clone(),
        )
    }

    /// Override the tunables taken from [`CoordinationConfig`].
    pub fn with_config(mut self, cfg: &CoordinationConfig) -> Self {
        self.retry = RetryPolicy::from_config(&cfg.retry);
        self.compression_threshold = cfg.compression_threshold;
        self.poll_interval = cfg.poll_interval;
        self
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn bus(&self) -> &Arc<dyn Deaddrop> {
        &self.bus
    }

    pub fn ns_id(&self) -> &str {
        &self.ns_id
    }

    pub fn ns_secret(&self) -> &str {
        &self.ns_secret
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn identity_secret(&self) -> &str {
        &self.identity_secret
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn coordinator_id(&self) -> Option<&str> {
        self.coordinator_id.as_deref()
    }

    // ── sending ──────────────────────────────────────────────────────

    /// Send a coordination message to a specific identity's inbox.
    pub async fn send(
        &self,
        to_id: &str,
        message: &CoordinationMessage,
        retry: bool,
    ) -> Result<String> {
        let encoded = message.encode()?;
        let (body, compression) = compress(&encoded, self.compression_threshold);
        let content_type = content_type_for(compression);

        let op = || {
            self.bus.send_message(
                &self.ns_id,
                &self.identity_secret,
                to_id,
                &body,
                &content_type,
            )
        };
        let mid = if retry {
            self.retry.run("send_message", op).await?
        } else {
            op().await?
        };

        TraceEvent::MessageSent {
            to: to_id.to_owned(),
            msg_type: message.message_type().to_owned(),
            compressed: compression.as_param().is_some(),
            bytes: body.len(),
        }
        .emit();
        Ok(mid)
    }

    /// Send to the coordinator's inbox (convenience for workers).
    pub async fn send_to_coordinator(
        &self,
        message: &CoordinationMessage,
        retry: bool,
    ) -> Result<String> {
        let coordinator_id = self
            .coordinator_id
            .clone()
            .ok_or(Error::NoCoordinator)?;
        self.send(&coordinator_id, message, retry).await
    }

    /// Broadcast to the coordination room.
    pub async fn broadcast(
        &self,
        message: &CoordinationMessage,
        retry: bool,
    ) -> Result<String> {
        let room_id = self.room_id.clone().ok_or(Error::NoRoom)?;
        let encoded = message.encode()?;
        let (body, compression) = compress(&encoded, self.compression_threshold);
        let content_type = content_type_for(compression);

        let op = || {
            self.bus.send_room_message(
                &self.ns_id,
                &room_id,
                &self.identity_secret,
                &body,
                &content_type,
            )
        };
        let mid = if retry {
            self.retry.run("send_room_message", op).await?
        } else {
            op().await?
        };

        TraceEvent::BroadcastSent {
            room_id: room_id.clone(),
            msg_type: message.message_type().to_owned(),
            bytes: body.len(),
        }
        .emit();
        Ok(mid)
    }

    // ── receiving ────────────────────────────────────────────────────

    /// Fetch new messages since the cursors, newest first.
    ///
    /// With `retry`, a fetch that still fails after retries degrades to an
    /// empty batch for that stream — the cursor is preserved, so nothing is
    /// lost. Without `retry`, transport errors surface to the caller.
    pub async fn receive(
        &self,
        include_room: bool,
        retry: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        let mut out = Vec::new();

        let inbox_cursor = self.cursors.lock().inbox.clone();
        let fetch_inbox = || {
            self.bus.get_inbox(
                &self.ns_id,
                &self.identity_id,
                &self.identity_secret,
                inbox_cursor.as_deref(),
            )
        };
        let envelopes = if retry {
            match self.retry.run("get_inbox", fetch_inbox).await {
                Ok(envelopes) => envelopes,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to get inbox messages, continuing with empty");
                    Vec::new()
                }
            }
        } else {
            fetch_inbox().await?
        };
        for envelope in envelopes {
            self.consume(envelope, false, &mut out);
        }

        if include_room {
            if let Some(room_id) = self.room_id.clone() {
                let room_cursor = self.cursors.lock().room.clone();
                let fetch_room = || {
                    self.bus.get_room_messages(
                        &self.ns_id,
                        &room_id,
                        &self.identity_secret,
                        room_cursor.as_deref(),
                    )
                };
                let envelopes = if retry {
                    match self.retry.run("get_room_messages", fetch_room).await {
                        Ok(envelopes) => envelopes,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to get room messages, continuing with empty");
                            Vec::new()
                        }
                    }
                } else {
                    fetch_room().await?
                };
                for envelope in envelopes {
                    self.consume(envelope, true, &mut out);
                }
            }
        }

        out.reverse();
        Ok(out)
    }

    /// Non-blocking poll for new messages.
    pub async fn poll(&self, include_room: bool) -> Result<Vec<ReceivedMessage>> {
        self.receive(include_room, true).await
    }

    /// Block until new messages arrive or `timeout` elapses.
    ///
    /// Push-capable backends use a server-side subscribe keyed by our
    /// cursors; push-less backends are polled at a short interval.
    pub async fn wait_for_messages(
        &self,
        timeout: Duration,
        include_room: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        if self.bus.supports_push() {
            self.wait_subscribe(timeout, include_room).await
        } else {
            self.wait_poll(timeout, include_room).await
        }
    }

    async fn wait_subscribe(
        &self,
        timeout: Duration,
        include_room: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        let cursors = self.cursors.lock().clone();
        let mut topics = BTreeMap::new();
        topics.insert(format!("inbox:{}", self.identity_id), cursors.inbox);
        if include_room {
            if let Some(room_id) = &self.room_id {
                topics.insert(format!("room:{room_id}"), cursors.room);
            }
        }

        let timeout = timeout.clamp(Duration::from_secs(1), Duration::from_secs(60));
        match self
            .bus
            .subscribe(&self.ns_id, &self.identity_secret, &topics, timeout)
            .await
        {
            Ok(outcome) if outcome.timed_out => Ok(Vec::new()),
            Ok(_) => self.receive(include_room, true).await,
            Err(e) => {
                tracing::warn!(error = %e, "subscribe failed, falling back to immediate fetch");
                self.receive(include_room, true).await
            }
        }
    }

    async fn wait_poll(
        &self,
        timeout: Duration,
        include_room: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.receive(include_room, true).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    // ── parsing ──────────────────────────────────────────────────────

    /// Parse one envelope, pushing a message on success. The cursor is
    /// advanced either way: an unparseable message is skipped, never
    /// retried forever.
    fn consume(&self, envelope: Envelope, is_room: bool, out: &mut Vec<ReceivedMessage>) {
        match Self::parse_envelope(&envelope) {
            Ok(Some(message)) => out.push(ReceivedMessage {
                message,
                from_id: envelope.from_id.clone(),
                mid: envelope.mid.clone(),
                is_room_message: is_room,
            }),
            Ok(None) => {
                // Foreign content type — not ours to decode.
            }
            Err(e) => {
                tracing::warn!(
                    mid = %envelope.mid,
                    from = %envelope.from_id,
                    error = %e,
                    "failed to parse coordination message, skipping"
                );
                TraceEvent::MessageSkipped {
                    mid: envelope.mid.clone(),
                    reason: e.kind().to_owned(),
                }
                .emit();
            }
        }
        let mut cursors = self.cursors.lock();
        if is_room {
            cursors.room = Some(envelope.mid);
        } else {
            cursors.inbox = Some(envelope.mid);
        }
    }

    fn parse_envelope(envelope: &Envelope) -> Result<Option<CoordinationMessage>> {
        if !is_coordination(&envelope.content_type) {
            return Ok(None);
        }
        let compression = compression_param(&envelope.content_type)?;
        let decompressed = decompress(&envelope.body, compression)?;
        Ok(Some(CoordinationMessage::decode(&decompressed)?))
    }
}
