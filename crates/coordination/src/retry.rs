//! Retry with jittered exponential back-off for bus calls.
//!
//! The policy wraps individual bus operations, never multi-step sequences,
//! so receive cursors are only advanced for operations that succeeded.

use std::future::Future;
use std::time::Duration;

use sc_domain::config::RetryConfig;
use sc_domain::error::{Error, Result};

/// Controls how a failed bus call is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Nominal delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the nominal delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
            exponential_base: cfg.exponential_base,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), jittered into
    /// `[0.5, 1.5)` of the nominal exponential delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let nominal = base_ms * self.exponential_base.powi(attempt as i32);
        let capped = nominal.min(self.max_delay.as_millis() as f64);
        let factor = 0.5 + pseudo_random_fraction(attempt, std::process::id());
        Duration::from_millis((capped * factor) as u64)
    }

    /// Run `op` until it succeeds or the attempt budget is spent, then fail
    /// with `TransportError`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last: Option<Error> = None;
        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt + 1 < self.max_attempts {
                        let delay = self.delay_for_attempt(attempt);
                        tracing::warn!(
                            op = what,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "bus operation failed, retrying"
                        );
                        last = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        tracing::error!(
                            op = what,
                            attempts = self.max_attempts,
                            error = %e,
                            "bus operation failed, giving up"
                        );
                        last = Some(e);
                    }
                }
            }
        }
        let detail = last.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::Transport(format!(
            "{what} failed after {} attempts: {detail}",
            self.max_attempts
        )))
    }
}

/// Cheap deterministic "random" fraction [0, 1) from the attempt number and
/// a per-process salt. Not cryptographically secure — just enough to spread
/// retry storms across workers.
fn pseudo_random_fraction(attempt: u32, salt: u32) -> f64 {
    let hash = attempt
        .wrapping_add(salt)
        .wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
