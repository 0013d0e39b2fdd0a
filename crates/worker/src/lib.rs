//! Worker-side runtime: bootstrap from an invite URL, coordination tools,
//! the permission RPC client, and the task loop.
//!
//! A worker holds only its own identity secret. It learns everything else
//! (namespace, room, coordinator) from the invite it claims at startup,
//! announces itself idle, and then serves tasks until told to terminate.

pub mod agent_loop;
pub mod bootstrap;
pub mod permissions;
pub mod tools;

pub use agent_loop::{TaskExecutor, TaskOutcome, WorkerLoop};
pub use bootstrap::{bootstrap_from_env, bus_for_invite, claim_and_connect, WorkerBootstrap};
pub use permissions::PermissionVerdict;
pub use tools::WorkerTools;
