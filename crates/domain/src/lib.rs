//! Shared domain types for the Silica coordination runtime.
//!
//! Carries the error type used across all crates, the environment-driven
//! configuration model, and the structured trace events emitted through
//! `tracing`.

pub mod config;
pub mod error;
pub mod trace;

pub use config::{CoordinationConfig, RetryConfig, WorkerEnv};
pub use error::{Error, Result};
pub use trace::TraceEvent;
