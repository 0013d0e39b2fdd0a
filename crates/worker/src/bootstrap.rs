//! Worker bootstrap: claim an invite and connect to the coordination
//! namespace.
//!
//! Spawned workers find their coordination context in the environment
//! (`DEADDROP_INVITE_URL`, optional `DEADDROP_SERVER_URL`,
//! `COORDINATION_AGENT_ID`) and dispatch on the invite scheme:
//!
//! - `http(s)://` — remote bus, claimed server-side
//! - `local://<path>/…` — shared file-backed bus at `<path>`
//! - `data:application/json;base64,…` — self-contained credentials
//!
//! Anything else is refused at startup.

use std::path::PathBuf;
use std::sync::Arc;

use sc_coordination::CoordinationContext;
use sc_deaddrop::{invite, Deaddrop, LocalBus, RemoteBus};
use sc_domain::config::{CoordinationConfig, WorkerEnv};
use sc_domain::error::{Error, Result};
use sc_domain::trace::TraceEvent;
use sc_protocol::CoordinationMessage;

/// A connected, announced worker.
pub struct WorkerBootstrap {
    pub context: Arc<CoordinationContext>,
    pub agent_id: String,
    pub display_name: String,
    pub ns_id: String,
    pub room_id: Option<String>,
    pub coordinator_id: Option<String>,
}

/// Bootstrap from the process environment. Returns `None` when no invite
/// is set (the process is not a coordinated worker).
pub async fn bootstrap_from_env(config: &CoordinationConfig) -> Result<Option<WorkerBootstrap>> {
    let env = WorkerEnv::from_env();
    let Some(invite_url) = env.invite_url.clone() else {
        return Ok(None);
    };
    let bus = bus_for_invite(&invite_url, env.server_url.as_deref())?;
    claim_and_connect(bus, &invite_url, &env, config)
        .await
        .map(Some)
}

/// Pick the bus adapter an invite URL points at.
pub fn bus_for_invite(invite_url: &str, server_url: Option<&str>) -> Result<Arc<dyn Deaddrop>> {
    if invite::is_data_invite(invite_url) {
        // The claim needs no bus call, but subsequent traffic does.
        let server = server_url.ok_or_else(|| {
            Error::Config(format!(
                "data: invites need {} to reach the bus",
                sc_domain::config::DEADDROP_SERVER_URL
            ))
        })?;
        return Ok(Arc::new(RemoteBus::new(server)?));
    }
    if invite_url.starts_with("http://") || invite_url.starts_with("https://") {
        let bus = match server_url {
            Some(server) => RemoteBus::new(server)?,
            None => RemoteBus::from_invite_url(invite_url)?,
        };
        return Ok(Arc::new(bus));
    }
    if invite_url.starts_with("local://") {
        let path = local_backing_path(invite_url)?;
        return Ok(Arc::new(LocalBus::open(path)?));
    }
    Err(Error::UnsupportedInvite(
        invite_url.chars().take(50).collect(),
    ))
}

/// Extract the backing-store path from a `local://` invite.
///
/// In-memory stores cannot be shared across processes, and an invite with
/// no extractable path is unusable.
pub fn local_backing_path(invite_url: &str) -> Result<PathBuf> {
    let rest = invite_url
        .strip_prefix("local://")
        .ok_or_else(|| Error::UnsupportedInvite(invite_url.chars().take(50).collect()))?;
    let path = match rest.split_once("/join/") {
        Some((path, _)) => path,
        None => rest.split(['?', '#']).next().unwrap_or(rest),
    };
    if path == ":memory:" {
        return Err(Error::UnsupportedLocalInvite(
            "in-memory stores cannot be shared between processes".into(),
        ));
    }
    if path.is_empty() {
        return Err(Error::UnsupportedLocalInvite(format!(
            "no backing path in {}",
            invite_url.chars().take(50).collect::<String>()
        )));
    }
    Ok(PathBuf::from(path))
}

/// Claim the invite on an already-selected bus, build the coordination
/// context, and announce idle to the room.
pub async fn claim_and_connect(
    bus: Arc<dyn Deaddrop>,
    invite_url: &str,
    env: &WorkerEnv,
    config: &CoordinationConfig,
) -> Result<WorkerBootstrap> {
    tracing::info!(
        invite = %invite_url.chars().take(50).collect::<String>(),
        bus = %bus.location(),
        "claiming coordination invite"
    );
    let mut claim = bus.claim_invite(invite_url).await?;

    // Coordination targets may ride on the URL rather than the claim.
    let (room_from_url, coordinator_from_url) = invite::query_params(invite_url);
    if claim.room_id.is_none() {
        claim.room_id = room_from_url;
    }
    if claim.coordinator_id.is_none() {
        claim.coordinator_id = coordinator_from_url;
    }

    let agent_id = env.agent_id.clone().unwrap_or_else(|| {
        let short: String = claim.identity_id.chars().take(8).collect();
        format!("worker-{short}")
    });
    let display_name = claim
        .display_name
        .clone()
        .unwrap_or_else(|| "Worker".to_owned());

    let context = Arc::new(CoordinationContext::from_claim(bus, &claim).with_config(config));

    // Announce availability. Failure is non-fatal: the coordinator may
    // still reach us directly.
    let announce = CoordinationMessage::Idle {
        agent_id: agent_id.clone(),
        completed_task_id: None,
        available_since: chrono::Utc::now(),
    };
    match context.broadcast(&announce, true).await {
        Ok(_) => {
            TraceEvent::WorkerAnnounced {
                agent_id: agent_id.clone(),
            }
            .emit();
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to announce idle, continuing");
        }
    }

    tracing::info!(%agent_id, %display_name, "worker connected");
    Ok(WorkerBootstrap {
        context,
        agent_id,
        display_name,
        ns_id: claim.ns_id,
        room_id: claim.room_id,
        coordinator_id: claim.coordinator_id,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
