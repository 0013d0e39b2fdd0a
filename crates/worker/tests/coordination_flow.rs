//! Full coordinator ↔ worker flows over an in-memory bus: task dispatch,
//! permission round-trips, and termination.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use sc_coordinator::{AgentState, CoordinationSession, PendingStatus};
use sc_coordination::ReceivedMessage;
use sc_deaddrop::{Deaddrop, MemoryBus};
use sc_domain::config::{CoordinationConfig, WorkerEnv};
use sc_domain::error::Result;
use sc_protocol::{CoordinationMessage, Decision, TaskStatus};
use sc_worker::{
    claim_and_connect, PermissionVerdict, TaskExecutor, TaskOutcome, WorkerLoop, WorkerTools,
};

struct Harness {
    _state_dir: tempfile::TempDir,
    session: CoordinationSession,
    tools: Arc<WorkerTools>,
}

async fn harness() -> Harness {
    let bus: Arc<dyn Deaddrop> = Arc::new(MemoryBus::new());
    let state_dir = tempfile::tempdir().unwrap();
    let config = CoordinationConfig::default();

    let session = CoordinationSession::create(
        bus.clone(),
        "Flow Test",
        state_dir.path(),
        config.clone(),
    )
    .await
    .unwrap();

    let spawned = session
        .spawn_agent("w-001", "Worker One", "workspace-a")
        .await
        .unwrap();

    let env = WorkerEnv {
        invite_url: Some(spawned.invite_url.clone()),
        server_url: None,
        agent_id: Some("w-001".into()),
    };
    let worker = claim_and_connect(bus, &spawned.invite_url, &env, &config)
        .await
        .unwrap();
    assert_eq!(worker.agent_id, "w-001");
    assert_eq!(worker.room_id.as_deref(), Some(session.state().room_id.as_str()));
    assert_eq!(
        worker.coordinator_id.as_deref(),
        Some(session.state().coordinator_id.as_str())
    );

    let tools = Arc::new(WorkerTools::new(
        worker.context.clone(),
        worker.agent_id.clone(),
        &config,
    ));

    Harness {
        _state_dir: state_dir,
        session,
        tools,
    }
}

/// Pump the coordinator until `pred` holds, collecting every message seen.
async fn pump_until<F>(
    session: &CoordinationSession,
    seen: &mut Vec<ReceivedMessage>,
    timeout: Duration,
    pred: F,
) -> bool
where
    F: Fn(&CoordinationSession, &[ReceivedMessage]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if pred(session, seen) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        let messages = session
            .process_messages(Duration::from_millis(500))
            .await
            .unwrap();
        seen.extend(messages);
    }
}

/// Broadcasts three progress steps, then completes.
struct CountingExecutor;

#[async_trait]
impl TaskExecutor for CountingExecutor {
    async fn execute(
        &self,
        tools: &WorkerTools,
        _task_id: &str,
        _description: &str,
        _context: &Map<String, Value>,
    ) -> Result<TaskOutcome> {
        for step in 1..=3u32 {
            tools
                .broadcast_status(&format!("step {step}/3"), Some(step as f64 / 3.0))
                .await?;
        }
        Ok(TaskOutcome::complete("done"))
    }
}

#[tokio::test]
async fn s1_happy_path_drives_registry_to_idle() {
    let h = harness().await;
    let mut seen = Vec::new();

    // The worker announced idle during bootstrap.
    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(10), |s, _| {
            s.registry()
                .get("w-001")
                .is_some_and(|r| r.state == AgentState::Idle)
        })
        .await
    );

    let worker_loop =
        WorkerLoop::new(h.tools.clone(), Arc::new(CountingExecutor))
            .with_wait_timeout(Duration::from_secs(1));
    let shutdown = CancellationToken::new();
    let loop_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker_loop.run(shutdown).await })
    };

    h.session
        .assign_task("w-001", "t1", "count", Map::new())
        .await
        .unwrap();

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(10), |s, _| {
            s.registry().get("w-001").is_some_and(|r| {
                r.state == AgentState::Idle
                    && r.current_task_id.is_none()
                    && r.last_task_status == Some(TaskStatus::Complete)
            })
        })
        .await,
        "registry never settled: {:?}",
        h.session.registry().get("w-001")
    );

    // The coordinator saw ack ≺ progress* ≺ result for t1, and all three
    // progress fractions.
    let progress: Vec<f64> = seen
        .iter()
        .filter_map(|m| match &m.message {
            CoordinationMessage::Progress { task_id, progress, .. } if task_id == "t1" => {
                *progress
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    assert!((progress[0] - 1.0 / 3.0).abs() < 1e-9);
    assert!((progress[2] - 1.0).abs() < 1e-9);

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn s2_permission_grant_reaches_the_blocked_worker() {
    let h = harness().await;
    let mut seen = Vec::new();

    let requester = {
        let tools = h.tools.clone();
        tokio::spawn(async move {
            tools
                .request_permission(
                    "shell",
                    "rm -rf /tmp/x",
                    "cleanup before rebuild",
                    Duration::from_secs(5),
                )
                .await
        })
    };

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(5), |s, _| {
            !s.permissions().list_pending().is_empty()
        })
        .await
    );
    let pending = h.session.permissions().list_pending().remove(0);
    assert!(pending.request_id.starts_with("w-001-perm-"));
    assert_eq!(pending.agent_id, "w-001");
    assert_eq!(pending.action, "shell");
    assert_eq!(pending.resource, "rm -rf /tmp/x");

    let granted = h
        .session
        .grant_permission(&pending.request_id, Decision::Allow, Some("ok".into()))
        .await
        .unwrap();
    assert!(granted);

    let verdict = requester.await.unwrap().unwrap();
    assert_eq!(verdict, PermissionVerdict::Allow);
    assert!(verdict.is_allowed());

    // The queue entry is terminal now.
    assert_eq!(
        h.session.permissions().get(&pending.request_id).unwrap().status,
        PendingStatus::Granted
    );
}

#[tokio::test]
async fn s3_no_answer_times_out_and_stays_queued() {
    let h = harness().await;
    let mut seen = Vec::new();

    let started = std::time::Instant::now();
    let requester = {
        let tools = h.tools.clone();
        tokio::spawn(async move {
            tools
                .request_permission("shell", "some_command", "", Duration::from_secs(2))
                .await
        })
    };

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(5), |s, _| {
            !s.permissions().list_pending().is_empty()
        })
        .await
    );

    // Coordinator never answers.
    let verdict = requester.await.unwrap().unwrap();
    assert_eq!(verdict, PermissionVerdict::Timeout);
    assert!(!verdict.is_allowed());
    assert!(started.elapsed() >= Duration::from_secs(2));

    // With queue_on_timeout the entry is still grantable.
    let pending = h.session.permissions().list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, PendingStatus::Pending);
}

#[tokio::test]
async fn responses_for_other_requests_are_never_acted_on() {
    let h = harness().await;
    let mut seen = Vec::new();

    let requester = {
        let tools = h.tools.clone();
        tokio::spawn(async move {
            tools
                .request_permission("shell", "ls", "", Duration::from_secs(5))
                .await
        })
    };

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(5), |s, _| {
            !s.permissions().list_pending().is_empty()
        })
        .await
    );
    let pending = h.session.permissions().list_pending().remove(0);
    let worker_identity = h.session.registry().get("w-001").unwrap().identity_id;

    // A response addressed to a different request must be ignored.
    h.session
        .context()
        .send(
            &worker_identity,
            &CoordinationMessage::PermissionResponse {
                request_id: "w-001-perm-DEADBEEF".into(),
                decision: Decision::Allow,
                reason: None,
                timestamp: chrono::Utc::now(),
            },
            true,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!requester.is_finished());

    // The matching response resolves the call.
    h.session
        .grant_permission(&pending.request_id, Decision::Deny, Some("no".into()))
        .await
        .unwrap();
    let verdict = requester.await.unwrap().unwrap();
    assert_eq!(verdict, PermissionVerdict::Deny);
}

#[tokio::test]
async fn messages_consumed_during_permission_wait_are_stashed() {
    let h = harness().await;
    let mut seen = Vec::new();

    let requester = {
        let tools = h.tools.clone();
        tokio::spawn(async move {
            tools
                .request_permission("shell", "ls", "", Duration::from_secs(5))
                .await
        })
    };

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(5), |s, _| {
            !s.permissions().list_pending().is_empty()
        })
        .await
    );
    let pending = h.session.permissions().list_pending().remove(0);

    // A task lands in the inbox while the worker blocks on permission.
    h.session
        .assign_task("w-001", "t-race", "racing task", Map::new())
        .await
        .unwrap();
    // Give the permission poll a chance to consume (and stash) it.
    tokio::time::sleep(Duration::from_millis(300)).await;

    h.session
        .grant_permission(&pending.request_id, Decision::Allow, None)
        .await
        .unwrap();
    requester.await.unwrap().unwrap();

    // The assignment was not lost: the next inbox check surfaces it.
    let inbox = h.tools.check_inbox().await.unwrap();
    assert!(inbox.iter().any(|m| matches!(
        &m.message,
        CoordinationMessage::TaskAssign { task_id, .. } if task_id == "t-race"
    )));
}

#[tokio::test]
async fn terminate_yields_terminated_result_and_dead_agent() {
    let h = harness().await;
    let mut seen = Vec::new();

    let worker_loop = WorkerLoop::new(h.tools.clone(), Arc::new(CountingExecutor))
        .with_wait_timeout(Duration::from_secs(1));
    let shutdown = CancellationToken::new();
    let loop_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker_loop.run(shutdown).await })
    };

    // Wait until the coordinator has seen the worker at all.
    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(5), |s, _| {
            s.registry().get("w-001").is_some()
        })
        .await
    );

    h.session
        .terminate_agent("w-001", Some("session over".into()))
        .await
        .unwrap();

    assert!(
        pump_until(&h.session, &mut seen, Duration::from_secs(10), |s, _| {
            s.registry()
                .get("w-001")
                .is_some_and(|r| r.state == AgentState::Dead)
        })
        .await
    );
    assert!(seen.iter().any(|m| matches!(
        &m.message,
        CoordinationMessage::Result { status, .. } if *status == TaskStatus::Terminated
    )));

    // The loop exited on its own.
    loop_handle.await.unwrap().unwrap();
}
