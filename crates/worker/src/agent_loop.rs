//! The worker task loop.
//!
//! ```text
//! IDLE ──task_assign──▶ ASSIGNED ──ack──▶ WORKING ──progress*──▶ WORKING
//!                                                └─result──▶ IDLE
//!                                                └─(terminate)──▶ DEAD
//! ```
//!
//! The loop waits on inbox + room, acknowledges assignments, hands the
//! task to a [`TaskExecutor`] (the LLM agent in production; anything
//! implementing the trait in tests), reports the outcome, and
//! re-announces idle. A `terminate` at any point produces a
//! `result{status=terminated}` and ends the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use sc_domain::error::Result;
use sc_protocol::{CoordinationMessage, TaskStatus};

use crate::tools::WorkerTools;

/// Outcome of executing one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub summary: String,
    pub data: Map<String, Value>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn complete(summary: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Complete,
            summary: summary.into(),
            data: Map::new(),
            error: None,
        }
    }

    pub fn failed(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            summary: summary.into(),
            data: Map::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes one task on behalf of the worker. The production executor
/// drives the LLM agent; tests and the CLI's scripted mode implement this
/// directly.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        tools: &WorkerTools,
        task_id: &str,
        description: &str,
        context: &Map<String, Value>,
    ) -> Result<TaskOutcome>;
}

pub struct WorkerLoop {
    tools: Arc<WorkerTools>,
    executor: Arc<dyn TaskExecutor>,
    wait_timeout: Duration,
}

impl WorkerLoop {
    pub fn new(tools: Arc<WorkerTools>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            tools,
            executor,
            wait_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Serve tasks until terminated (by message or by `shutdown`).
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let mut messages = self.tools.drain_stash();
            if messages.is_empty() {
                let waited = tokio::select! {
                    result = self
                        .tools
                        .context()
                        .wait_for_messages(self.wait_timeout, true) => result,
                    _ = shutdown.cancelled() => {
                        tracing::info!("worker loop shutdown requested");
                        return Ok(());
                    }
                };
                match waited {
                    Ok(received) => messages = received,
                    Err(e) => {
                        tracing::warn!(error = %e, "wait_for_messages failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                }
            }

            self.tools.observe_peers(&messages);

            // Oldest first: assignments are served in arrival order.
            for received in messages.into_iter().rev() {
                match received.message {
                    CoordinationMessage::TaskAssign {
                        task_id,
                        description,
                        context,
                        ..
                    } => {
                        self.handle_task(&task_id, &description, &context).await;
                    }
                    CoordinationMessage::Terminate { reason, .. } => {
                        self.handle_terminate(reason).await;
                        return Ok(());
                    }
                    other => {
                        tracing::debug!(
                            msg_type = other.message_type(),
                            from = %received.from_id,
                            "worker loop ignoring message"
                        );
                    }
                }
            }
        }
    }

    async fn handle_task(&self, task_id: &str, description: &str, context: &Map<String, Value>) {
        tracing::info!(task_id, "task received");
        if let Err(e) = self.tools.send_ack(task_id).await {
            tracing::warn!(task_id, error = %e, "could not ack task");
        }

        let outcome = match self
            .executor
            .execute(&self.tools, task_id, description, context)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(task_id, error = %e, "task execution failed");
                TaskOutcome::failed("task execution failed", e.to_string())
            }
        };

        let status = outcome.status;
        if let Err(e) = self
            .tools
            .send_result(
                task_id,
                outcome.status,
                &outcome.summary,
                outcome.data,
                outcome.error,
            )
            .await
        {
            tracing::warn!(task_id, error = %e, "could not send result");
        }
        tracing::info!(task_id, status = status.as_str(), "task finished");

        if let Err(e) = self.tools.mark_idle(Some(task_id.to_owned())).await {
            tracing::warn!(error = %e, "could not re-announce idle");
        }
    }

    async fn handle_terminate(&self, reason: Option<String>) {
        let reason_text = reason.unwrap_or_else(|| "coordinator request".to_owned());
        tracing::info!(reason = %reason_text, "terminate received");

        let task_id = self.tools.current_task().unwrap_or_default();
        if let Err(e) = self
            .tools
            .send_result(
                &task_id,
                TaskStatus::Terminated,
                &format!("Terminated: {reason_text}"),
                Map::new(),
                None,
            )
            .await
        {
            tracing::warn!(error = %e, "could not report termination");
        }
    }
}
