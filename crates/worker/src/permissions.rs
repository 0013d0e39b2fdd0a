//! Worker-side permission RPC.
//!
//! Instead of prompting locally, a coordinated worker sends a
//! `permission_request` to the coordinator and blocks until the matching
//! `permission_response` arrives or the deadline passes. Timeouts fail
//! closed (deny). With `queue_on_timeout`, the request stays grantable in
//! the coordinator's queue and a late response is surfaced by the next
//! inbox check.

use std::time::Duration;

use uuid::Uuid;

use sc_domain::error::Result;
use sc_protocol::{CoordinationMessage, Decision};

use crate::tools::WorkerTools;

/// What the sandbox should do with the gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionVerdict {
    Allow,
    Deny,
    /// Allow and remember for this tool.
    AlwaysTool,
    /// Allow and remember for the tool's group.
    AlwaysGroup,
    /// No answer before the deadline; treated as deny.
    Timeout,
}

impl PermissionVerdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AlwaysTool | Self::AlwaysGroup)
    }

    fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Allow => Self::Allow,
            Decision::Deny => Self::Deny,
            Decision::AlwaysTool => Self::AlwaysTool,
            Decision::AlwaysGroup => Self::AlwaysGroup,
            // Anything unexpected fails closed.
            Decision::Timeout => Self::Deny,
        }
    }
}

impl WorkerTools {
    /// Synchronous permission RPC: send, then block until the matching
    /// response or the deadline. Responses addressed to other requests are
    /// ignored; unrelated messages are stashed for the agent loop.
    pub async fn request_permission(
        &self,
        action: &str,
        resource: &str,
        context_text: &str,
        timeout: Duration,
    ) -> Result<PermissionVerdict> {
        let request_id = self.new_request_id();
        tracing::info!(%request_id, action, resource, "requesting permission");

        if let Err(e) = self
            .send_permission_request(&request_id, action, resource, context_text)
            .await
        {
            // Could not even ask: fail closed.
            tracing::error!(error = %e, "failed to send permission request, denying");
            return Ok(PermissionVerdict::Deny);
        }

        self.await_permission_response(&request_id, timeout).await
    }

    /// Fire-and-forget variant: send the request and return its id. The
    /// caller inspects the inbox later for a matching response.
    pub async fn request_permission_async(
        &self,
        action: &str,
        resource: &str,
        context_text: &str,
    ) -> Result<String> {
        let request_id = self.new_request_id();
        self.send_permission_request(&request_id, action, resource, context_text)
            .await?;
        Ok(request_id)
    }

    async fn send_permission_request(
        &self,
        request_id: &str,
        action: &str,
        resource: &str,
        context_text: &str,
    ) -> Result<()> {
        self.context()
            .send_to_coordinator(
                &CoordinationMessage::PermissionRequest {
                    request_id: request_id.to_owned(),
                    task_id: self.current_task().unwrap_or_default(),
                    agent_id: self.agent_id().to_owned(),
                    action: action.to_owned(),
                    resource: resource.to_owned(),
                    context: context_text.to_owned(),
                    timestamp: chrono::Utc::now(),
                },
                true,
            )
            .await?;
        Ok(())
    }

    async fn await_permission_response(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<PermissionVerdict> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.permission_poll_interval.min(deadline - now);

            // Permission responses are direct messages; the room is not
            // consulted here.
            let messages = match self.context().wait_for_messages(wait, false).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "error polling for permission response");
                    continue;
                }
            };

            for received in messages {
                match &received.message {
                    CoordinationMessage::PermissionResponse {
                        request_id: response_id,
                        decision,
                        reason,
                        ..
                    } => {
                        if response_id == request_id {
                            tracing::info!(
                                request_id,
                                decision = decision.as_str(),
                                reason = reason.as_deref().unwrap_or(""),
                                "permission response received"
                            );
                            return Ok(PermissionVerdict::from_decision(*decision));
                        }
                        // A response for some other request; never act on it.
                        tracing::debug!(
                            got = %response_id,
                            want = %request_id,
                            "ignoring permission response for different request"
                        );
                    }
                    _ => {
                        // Not ours to consume: hand it to the agent loop.
                        self.stash.lock().push(received);
                    }
                }
            }
        }

        tracing::warn!(
            request_id,
            timeout_s = timeout.as_secs(),
            queued = self.queue_on_timeout,
            "permission request timed out"
        );
        Ok(PermissionVerdict::Timeout)
    }

    fn new_request_id(&self) -> String {
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        format!("{}-perm-{suffix}", self.agent_id())
    }
}
