//! Coordinator subcommands.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sc_coordinator::{race_decision, CoordinationSession, PendingPermission};
use sc_domain::config::CoordinationConfig;
use sc_domain::error::Error;
use sc_protocol::{CoordinationMessage, Decision};

use crate::cli::{
    AssignArgs, CreateArgs, RespondArgs, SpawnArgs, TerminateArgs, WatchArgs,
};
use crate::commands::{bus_from_args, default_state_dir, RunOutcome};

pub async fn create(args: CreateArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, true)?;
    let state_dir = args.state_dir.unwrap_or_else(default_state_dir);
    let session = CoordinationSession::create(
        bus,
        &args.name,
        &state_dir,
        CoordinationConfig::default(),
    )
    .await?;

    println!("session state: {}", session.state_path().display());
    println!("namespace:     {}", session.state().ns_id);
    println!("coordinator:   {}", session.state().coordinator_id);
    println!("room:          {}", session.state().room_id);
    Ok(RunOutcome::Done)
}

pub async fn spawn(args: SpawnArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, false)?;
    let session = CoordinationSession::resume(
        bus,
        &args.session,
        CoordinationConfig::default(),
    )
    .await?;

    let display_name = args.name.as_deref().unwrap_or(&args.agent_id);
    let spawned = session
        .spawn_agent(&args.agent_id, display_name, &args.workspace)
        .await?;

    println!("agent:    {}", spawned.record.agent_id);
    println!("identity: {}", spawned.record.identity_id);
    println!("invite:   {}", spawned.invite_url);
    println!();
    println!("Hand the invite to the worker process via DEADDROP_INVITE_URL.");
    Ok(RunOutcome::Done)
}

pub async fn assign(args: AssignArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, false)?;
    let session = CoordinationSession::resume(
        bus,
        &args.session,
        CoordinationConfig::default(),
    )
    .await?;

    // A fresh process has an empty registry; rediscover the worker from
    // room traffic before addressing it.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while session.registry().get(&args.agent_id).is_none() {
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::NotFound(format!(
                "agent {} not seen in coordination traffic",
                args.agent_id
            ))
            .into());
        }
        session.process_messages(Duration::from_secs(2)).await?;
    }

    session
        .assign_task(
            &args.agent_id,
            &args.task_id,
            &args.description,
            serde_json::Map::new(),
        )
        .await?;
    println!("assigned {} to {}", args.task_id, args.agent_id);
    Ok(RunOutcome::Done)
}

pub async fn terminate(args: TerminateArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, false)?;
    let session = CoordinationSession::resume(
        bus,
        &args.session,
        CoordinationConfig::default(),
    )
    .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while session.registry().get(&args.agent_id).is_none() {
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::NotFound(format!(
                "agent {} not seen in coordination traffic",
                args.agent_id
            ))
            .into());
        }
        session.process_messages(Duration::from_secs(2)).await?;
    }

    session.terminate_agent(&args.agent_id, args.reason).await?;
    println!("terminate sent to {}", args.agent_id);
    Ok(RunOutcome::Done)
}

/// Answer a known request id directly, without a live queue. Useful after
/// a `watch` process exited with requests still pending.
pub async fn respond(args: RespondArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, false)?;
    let session = CoordinationSession::resume(
        bus,
        &args.session,
        CoordinationConfig::default(),
    )
    .await?;

    let decision = parse_decision(&args.decision)?;
    session
        .context()
        .send(
            &args.identity,
            &CoordinationMessage::PermissionResponse {
                request_id: args.request_id.clone(),
                decision,
                reason: args.reason,
                timestamp: chrono::Utc::now(),
            },
            true,
        )
        .await?;
    println!("{} -> {}", args.request_id, decision.as_str());
    Ok(RunOutcome::Done)
}

pub async fn watch(args: WatchArgs) -> anyhow::Result<RunOutcome> {
    let bus = bus_from_args(&args.bus, false)?;
    let session = CoordinationSession::resume(
        bus,
        &args.session,
        CoordinationConfig::default(),
    )
    .await?;

    println!(
        "watching namespace {} (room {})",
        session.state().ns_id,
        session.state().room_id
    );

    let mut prompted: HashSet<String> = HashSet::new();
    let mut housekeeping = tokio::time::interval(Duration::from_secs(30));
    housekeeping.reset();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(RunOutcome::Interrupted);
            }
            _ = housekeeping.tick() => {
                let (expired, dead) = session.housekeeping();
                for request_id in expired {
                    println!("⏱ permission {request_id} expired");
                }
                for agent_id in dead {
                    println!("✗ agent {agent_id} marked dead (stale)");
                }
            }
            result = session.process_messages(Duration::from_secs(5)) => {
                for received in result? {
                    render(&received.message, &received.from_id, received.is_room_message);
                }
                for pending in session.permissions().list_pending() {
                    if !prompted.insert(pending.request_id.clone()) {
                        continue;
                    }
                    handle_permission(&session, &pending, &args).await?;
                }
            }
        }
    }
}

async fn handle_permission(
    session: &CoordinationSession,
    pending: &PendingPermission,
    args: &WatchArgs,
) -> anyhow::Result<()> {
    println!(
        "? permission {} from {}: {} on {}",
        pending.request_id, pending.agent_id, pending.action, pending.resource
    );
    if !pending.context.is_empty() {
        println!("  {}", pending.context.replace('\n', "\n  "));
    }

    if !args.interactive {
        println!("  queued (answer with `coordinator respond --request-id {}`)", pending.request_id);
        return Ok(());
    }

    // Race the operator against the prompt timeout: first to finish wins,
    // the loser is cancelled. An unanswered prompt leaves the request
    // queued and grantable later.
    println!("  [y]allow [n]deny [t]always-tool [g]always-group ({}s)", args.prompt_timeout);
    let cancel = CancellationToken::new();
    let operator = read_decision_line(cancel.clone());
    let deadline = async {
        tokio::time::sleep(Duration::from_secs(args.prompt_timeout)).await;
        None
    };

    match race_decision(operator, deadline, &cancel).await {
        Some(decision) => {
            session
                .grant_permission(&pending.request_id, decision, None)
                .await?;
            println!("  -> {}", decision.as_str());
        }
        None => {
            println!("  no answer; left queued");
        }
    }
    Ok(())
}

/// Read one decision line from stdin on a blocking thread. Cancellation is
/// best-effort: the thread may outlive the race but its answer is dropped.
async fn read_decision_line(cancel: CancellationToken) -> Option<Decision> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            let _ = tx.send(line);
        }
    });

    tokio::select! {
        _ = cancel.cancelled() => None,
        line = rx => match line {
            Ok(line) => match line.trim() {
                "y" | "yes" | "allow" => Some(Decision::Allow),
                "n" | "no" | "deny" => Some(Decision::Deny),
                "t" | "always_tool" => Some(Decision::AlwaysTool),
                "g" | "always_group" => Some(Decision::AlwaysGroup),
                _ => None,
            },
            Err(_) => None,
        },
    }
}

fn parse_decision(raw: &str) -> anyhow::Result<Decision> {
    match raw {
        "allow" => Ok(Decision::Allow),
        "deny" => Ok(Decision::Deny),
        "always_tool" => Ok(Decision::AlwaysTool),
        "always_group" => Ok(Decision::AlwaysGroup),
        other => Err(Error::Config(format!("unknown decision: {other}")).into()),
    }
}

fn render(message: &CoordinationMessage, from_id: &str, is_room: bool) {
    let via = if is_room { "room" } else { "inbox" };
    match message {
        CoordinationMessage::Idle {
            agent_id,
            completed_task_id,
            ..
        } => match completed_task_id {
            Some(task) => println!("· [{via}] {agent_id} idle (finished {task})"),
            None => println!("· [{via}] {agent_id} idle"),
        },
        CoordinationMessage::TaskAck { agent_id, task_id, .. } => {
            println!("· [{via}] {agent_id} acknowledged {task_id}");
        }
        CoordinationMessage::Progress {
            agent_id,
            task_id,
            progress,
            message,
            ..
        } => {
            let pct = progress
                .map(|p| format!("{:.0}%", p * 100.0))
                .unwrap_or_else(|| "?".into());
            println!("· [{via}] {agent_id} {task_id} {pct}: {message}");
        }
        CoordinationMessage::Result {
            agent_id,
            task_id,
            status,
            summary,
            ..
        } => {
            println!("✓ [{via}] {agent_id} {task_id} {}: {summary}", status.as_str());
        }
        CoordinationMessage::Question {
            agent_id, question, ..
        } => {
            println!("? [{via}] {agent_id} asks: {question}");
        }
        other => {
            println!("· [{via}] {} from {from_id}", other.message_type());
        }
    }
}
