//! The `worker` subcommand: claim an invite and serve tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use sc_domain::config::{CoordinationConfig, WorkerEnv};
use sc_domain::error::{Error, Result};
use sc_worker::{
    bus_for_invite, claim_and_connect, TaskExecutor, TaskOutcome, WorkerLoop, WorkerTools,
};

use crate::cli::WorkerArgs;
use crate::commands::RunOutcome;

/// Scripted stand-in for the LLM agent: reports three progress steps and
/// completes. Lets the coordination plumbing be exercised end-to-end
/// without a model in the loop.
struct ScriptedExecutor;

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        tools: &WorkerTools,
        task_id: &str,
        description: &str,
        _context: &Map<String, Value>,
    ) -> Result<TaskOutcome> {
        tracing::info!(task_id, description, "executing task");
        for step in 1..=3u32 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            tools
                .broadcast_status(&format!("step {step}/3"), Some(step as f64 / 3.0))
                .await?;
        }
        Ok(TaskOutcome::complete(format!("Task {task_id} executed")))
    }
}

pub async fn run(args: WorkerArgs) -> anyhow::Result<RunOutcome> {
    let mut env = WorkerEnv::from_env();
    if args.invite_url.is_some() {
        env.invite_url = args.invite_url.clone();
    }
    if args.agent_id.is_some() {
        env.agent_id = args.agent_id.clone();
    }
    if args.server_url.is_some() {
        env.server_url = args.server_url.clone();
    }

    let Some(invite_url) = env.invite_url.clone() else {
        return Err(Error::Config(format!(
            "no invite URL: pass --invite-url or set {}",
            sc_domain::config::DEADDROP_INVITE_URL
        ))
        .into());
    };

    let config = CoordinationConfig::default();
    let bus = bus_for_invite(&invite_url, env.server_url.as_deref())?;
    let bootstrap = claim_and_connect(bus, &invite_url, &env, &config).await?;

    println!("worker {} connected", bootstrap.agent_id);
    println!("identity:    {}", bootstrap.context.identity_id());
    println!("namespace:   {}", bootstrap.ns_id);
    if let Some(room) = &bootstrap.room_id {
        println!("room:        {room}");
    }
    if let Some(coordinator) = &bootstrap.coordinator_id {
        println!("coordinator: {coordinator}");
    }

    let tools = Arc::new(WorkerTools::new(
        bootstrap.context.clone(),
        bootstrap.agent_id.clone(),
        &config,
    ));
    let worker_loop = WorkerLoop::new(tools, Arc::new(ScriptedExecutor));

    let shutdown = CancellationToken::new();
    let interrupted = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        })
    };

    worker_loop.run(shutdown.clone()).await?;
    interrupted.abort();

    if shutdown.is_cancelled() {
        println!("worker interrupted");
        Ok(RunOutcome::Interrupted)
    } else {
        println!("worker terminated by coordinator");
        Ok(RunOutcome::Done)
    }
}
