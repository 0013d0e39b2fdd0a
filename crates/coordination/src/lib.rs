//! Per-identity coordination transport over the deaddrop bus.
//!
//! A [`CoordinationContext`] owns one identity's view of a coordination
//! namespace: direct sends, room broadcasts, cursor-tracked receives, and
//! blocking waits (server-side subscribe where the backend supports push,
//! short-interval polling where it does not). Transient bus failures are
//! absorbed by a jittered exponential-backoff [`RetryPolicy`].

pub mod context;
pub mod retry;

pub use context::{CoordinationContext, ReceivedMessage};
pub use retry::RetryPolicy;
