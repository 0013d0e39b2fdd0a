//! Command-line surface for `silica-coord`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "silica-coord",
    about = "Multi-agent coordination runtime over the deaddrop bus"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Coordinator-side session management.
    #[command(subcommand)]
    Coordinator(CoordinatorCommand),
    /// Run as a coordinated worker agent.
    Worker(WorkerArgs),
    /// Migrate legacy session directories to the v2 split-file layout.
    Migrate(MigrateArgs),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum CoordinatorCommand {
    /// Create a coordination session and persist its state.
    Create(CreateArgs),
    /// Spawn a worker identity and print its invite URL.
    Spawn(SpawnArgs),
    /// Assign a task to a worker.
    Assign(AssignArgs),
    /// Watch coordination traffic; queue and answer permission requests.
    Watch(WatchArgs),
    /// Send a permission response for a known request id.
    Respond(RespondArgs),
    /// Ask a worker to shut down.
    Terminate(TerminateArgs),
}

/// Where the bus lives. Exactly one of the two must be given.
#[derive(Args, Clone)]
pub struct BusArgs {
    /// Deaddrop server URL (remote bus).
    #[arg(long)]
    pub server_url: Option<String>,
    /// Path to a shared file-backed deaddrop store (local bus).
    #[arg(long)]
    pub local_store: Option<PathBuf>,
}

#[derive(Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    /// Human-readable session name.
    #[arg(long, default_value = "Coordination Session")]
    pub name: String,
    /// Directory for persisted session state
    /// (default: ~/.silica/coordination).
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct SpawnArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    /// Path to the persisted session state file.
    #[arg(long)]
    pub session: PathBuf,
    /// Stable agent slug (e.g. w-001).
    #[arg(long)]
    pub agent_id: String,
    /// Display name; defaults to the agent id.
    #[arg(long)]
    pub name: Option<String>,
    /// Workspace name recorded in the registry.
    #[arg(long, default_value = "")]
    pub workspace: String,
}

#[derive(Args)]
pub struct AssignArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    #[arg(long)]
    pub session: PathBuf,
    #[arg(long)]
    pub agent_id: String,
    #[arg(long)]
    pub task_id: String,
    /// Task description sent to the worker.
    pub description: String,
}

#[derive(Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    #[arg(long)]
    pub session: PathBuf,
    /// Answer permission requests from the terminal
    /// (y/n/t/g, racing a timeout); otherwise they are only queued.
    #[arg(long)]
    pub interactive: bool,
    /// Seconds to wait for an interactive answer before leaving the
    /// request queued.
    #[arg(long, default_value_t = 60)]
    pub prompt_timeout: u64,
}

#[derive(Args)]
pub struct RespondArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    #[arg(long)]
    pub session: PathBuf,
    /// The worker's identity id (printed by `watch`).
    #[arg(long)]
    pub identity: String,
    #[arg(long)]
    pub request_id: String,
    /// allow | deny | always_tool | always_group
    #[arg(long)]
    pub decision: String,
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args)]
pub struct TerminateArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    #[arg(long)]
    pub session: PathBuf,
    #[arg(long)]
    pub agent_id: String,
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Deaddrop invite URL (or DEADDROP_INVITE_URL).
    #[arg(long, short = 'i')]
    pub invite_url: Option<String>,
    /// Agent id (or COORDINATION_AGENT_ID).
    #[arg(long, short = 'a')]
    pub agent_id: Option<String>,
    /// Bus URL override for data:/https invites (or DEADDROP_SERVER_URL).
    #[arg(long)]
    pub server_url: Option<String>,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// A session directory, or a persona base directory with `--all`.
    pub path: PathBuf,
    /// Migrate every legacy session under `<path>/history/`.
    #[arg(long)]
    pub all: bool,
    /// Migrate a sibling preview copy, leaving originals untouched.
    #[arg(long)]
    pub dry_run: bool,
}
