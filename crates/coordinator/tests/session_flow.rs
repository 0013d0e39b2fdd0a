//! Coordinator session persistence and restart against an in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use sc_coordinator::{AgentState, CoordinationSession};
use sc_coordination::CoordinationContext;
use sc_deaddrop::{ClaimedInvite, Deaddrop, MemoryBus};
use sc_domain::config::CoordinationConfig;
use sc_protocol::{CoordinationMessage, TaskStatus};

async fn pump_until<F>(session: &CoordinationSession, timeout: Duration, pred: F) -> bool
where
    F: Fn(&CoordinationSession) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if pred(session) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        session
            .process_messages(Duration::from_millis(500))
            .await
            .unwrap();
    }
}

/// A worker stand-in driven directly through a coordination context.
async fn worker_context(
    bus: Arc<dyn Deaddrop>,
    session: &CoordinationSession,
    invite_url: &str,
) -> (CoordinationContext, ClaimedInvite) {
    let mut claim = bus.claim_invite(invite_url).await.unwrap();
    let (room, coordinator) = sc_deaddrop::query_params(invite_url);
    if claim.room_id.is_none() {
        claim.room_id = room.or_else(|| Some(session.state().room_id.clone()));
    }
    if claim.coordinator_id.is_none() {
        claim.coordinator_id = coordinator.or_else(|| Some(session.state().coordinator_id.clone()));
    }
    (CoordinationContext::from_claim(bus, &claim), claim)
}

#[tokio::test]
async fn session_state_persists_and_resumes() {
    let bus: Arc<dyn Deaddrop> = Arc::new(MemoryBus::new());
    let state_dir = tempfile::tempdir().unwrap();

    let session = CoordinationSession::create(
        bus.clone(),
        "Persist Test",
        state_dir.path(),
        CoordinationConfig::default(),
    )
    .await
    .unwrap();
    let state_path = session.state_path().to_path_buf();
    let original = session.state().clone();
    assert!(state_path.exists());
    drop(session);

    let resumed =
        CoordinationSession::resume(bus, &state_path, CoordinationConfig::default())
            .await
            .unwrap();
    assert_eq!(resumed.state().ns_id, original.ns_id);
    assert_eq!(resumed.state().coordinator_id, original.coordinator_id);
    assert_eq!(resumed.state().room_id, original.room_id);
    assert_eq!(resumed.state().created_at, original.created_at);
}

#[tokio::test]
async fn s4_restarted_coordinator_keeps_tasking_workers() {
    let bus: Arc<dyn Deaddrop> = Arc::new(MemoryBus::new());
    let state_dir = tempfile::tempdir().unwrap();
    let config = CoordinationConfig::default();

    // First coordinator process: spawn a worker and see it go idle.
    let session = CoordinationSession::create(
        bus.clone(),
        "Restart Test",
        state_dir.path(),
        config.clone(),
    )
    .await
    .unwrap();
    let spawned = session
        .spawn_agent("w-001", "Restart Worker", "ws")
        .await
        .unwrap();
    let state_path = session.state_path().to_path_buf();

    let (worker, _claim) = worker_context(bus.clone(), &session, &spawned.invite_url).await;
    worker
        .broadcast(
            &CoordinationMessage::Idle {
                agent_id: "w-001".into(),
                completed_task_id: None,
                available_since: chrono::Utc::now(),
            },
            true,
        )
        .await
        .unwrap();

    assert!(
        pump_until(&session, Duration::from_secs(5), |s| {
            s.registry()
                .get("w-001")
                .is_some_and(|r| r.state == AgentState::Idle)
        })
        .await
    );
    drop(session);

    // Second coordinator process: same identities, fresh registry. Replayed
    // room traffic repopulates it.
    let session2 =
        CoordinationSession::resume(bus.clone(), &state_path, config)
            .await
            .unwrap();
    assert!(
        pump_until(&session2, Duration::from_secs(5), |s| {
            s.registry().get("w-001").is_some()
        })
        .await,
        "restarted coordinator never rediscovered the worker"
    );

    // Task the worker from the restarted process.
    session2
        .assign_task("w-001", "t2", "post-restart task", Map::new())
        .await
        .unwrap();

    // The worker acks and completes normally.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut acked = false;
    while tokio::time::Instant::now() < deadline && !acked {
        for received in worker.wait_for_messages(Duration::from_secs(1), true).await.unwrap() {
            if let CoordinationMessage::TaskAssign { task_id, .. } = &received.message {
                assert_eq!(task_id, "t2");
                worker
                    .send_to_coordinator(
                        &CoordinationMessage::TaskAck {
                            task_id: task_id.clone(),
                            agent_id: "w-001".into(),
                            acknowledged_at: chrono::Utc::now(),
                        },
                        true,
                    )
                    .await
                    .unwrap();
                worker
                    .send_to_coordinator(
                        &CoordinationMessage::Result {
                            task_id: task_id.clone(),
                            agent_id: "w-001".into(),
                            status: TaskStatus::Complete,
                            data: serde_json::Map::new(),
                            summary: "done after restart".into(),
                            error: None,
                            timestamp: chrono::Utc::now(),
                        },
                        true,
                    )
                    .await
                    .unwrap();
                acked = true;
            }
        }
    }
    assert!(acked, "worker never received the post-restart task");

    assert!(
        pump_until(&session2, Duration::from_secs(5), |s| {
            s.registry().get("w-001").is_some_and(|r| {
                r.state == AgentState::Idle
                    && r.last_task_status == Some(TaskStatus::Complete)
            })
        })
        .await
    );
}

#[tokio::test]
async fn spawn_attaches_room_and_coordinator_to_the_invite() {
    let bus: Arc<dyn Deaddrop> = Arc::new(MemoryBus::new());
    let state_dir = tempfile::tempdir().unwrap();
    let session = CoordinationSession::create(
        bus.clone(),
        "Invite Test",
        state_dir.path(),
        CoordinationConfig::default(),
    )
    .await
    .unwrap();

    let spawned = session.spawn_agent("w-007", "Spy", "ws").await.unwrap();
    let claim = bus.claim_invite(&spawned.invite_url).await.unwrap();
    assert_eq!(claim.room_id.as_deref(), Some(session.state().room_id.as_str()));
    assert_eq!(
        claim.coordinator_id.as_deref(),
        Some(session.state().coordinator_id.as_str())
    );
    assert_eq!(claim.identity_id, spawned.record.identity_id);

    // Freshly spawned agents start out in Spawning.
    assert_eq!(
        session.registry().get("w-007").unwrap().state,
        AgentState::Spawning
    );
}
