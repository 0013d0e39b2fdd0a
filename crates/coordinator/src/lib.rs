//! Coordinator-side runtime: session provisioning and persistence, the
//! agent registry, the pending-permission queue, and the raced decision
//! prompt.
//!
//! The coordinator owns the namespace secrets and the registry; workers
//! never mutate coordinator state directly — the registry is driven purely
//! by the messages they emit.

pub mod permissions;
pub mod prompt;
pub mod registry;
pub mod session;

pub use permissions::{PendingPermission, PendingPermissions, PendingStatus};
pub use prompt::race_decision;
pub use registry::{AgentRecord, AgentRegistry, AgentState};
pub use session::{CoordinationSession, SessionState, SpawnedAgent};
