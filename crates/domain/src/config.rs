//! Runtime configuration.
//!
//! Worker bootstrap is driven by three environment variables; everything
//! else (timeouts, intervals, retry shape) is a typed struct with defaults
//! that callers override programmatically.

use std::time::Duration;

/// Invite URL handed to a spawned worker.
pub const DEADDROP_INVITE_URL: &str = "DEADDROP_INVITE_URL";
/// Optional bus URL override for `https://` invites.
pub const DEADDROP_SERVER_URL: &str = "DEADDROP_SERVER_URL";
/// The worker's stable agent slug inside the session.
pub const COORDINATION_AGENT_ID: &str = "COORDINATION_AGENT_ID";

/// Coordination-related environment, read once at worker startup.
#[derive(Debug, Clone, Default)]
pub struct WorkerEnv {
    pub invite_url: Option<String>,
    pub server_url: Option<String>,
    pub agent_id: Option<String>,
}

impl WorkerEnv {
    /// Snapshot the coordination environment variables.
    pub fn from_env() -> Self {
        Self {
            invite_url: std::env::var(DEADDROP_INVITE_URL).ok(),
            server_url: std::env::var(DEADDROP_SERVER_URL).ok(),
            agent_id: std::env::var(COORDINATION_AGENT_ID).ok(),
        }
    }

    /// Whether this process should run as a coordinated worker.
    pub fn is_coordinated(&self) -> bool {
        self.invite_url.is_some()
    }
}

/// Retry shape for bus calls. See `sc-coordination`'s `RetryPolicy` for the
/// execution engine.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

/// Tunables shared by coordinator and worker processes.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Payloads above this many bytes are gzip-compressed on the wire.
    pub compression_threshold: usize,
    /// Poll cadence for `wait_for_messages` on push-less backends.
    pub poll_interval: Duration,
    /// How long a worker blocks waiting for a permission response.
    pub permission_timeout: Duration,
    /// Inbox poll cadence while a permission request is outstanding.
    pub permission_poll_interval: Duration,
    /// Keep a timed-out request grantable in the coordinator's queue.
    pub queue_on_timeout: bool,
    /// Pending permissions older than this transition to `Expired`.
    pub pending_permission_ttl: Duration,
    /// Agents silent for longer than this are marked `Dead`.
    pub staleness_window: Duration,
    pub retry: RetryConfig,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 10 * 1024,
            poll_interval: Duration::from_millis(500),
            permission_timeout: Duration::from_secs(300),
            permission_poll_interval: Duration::from_secs(2),
            queue_on_timeout: true,
            pending_permission_ttl: Duration::from_secs(900),
            staleness_window: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}
