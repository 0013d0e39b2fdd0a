//! Per-persona plan store.
//!
//! Plans live outside session history (`<persona>/plans/{active,completed}/`)
//! so they survive resume and compaction. The lifecycle is
//! `draft → in-review → approved → in-progress → (completed | abandoned)`,
//! and a plan cannot complete until every task has been verified — tasks are
//! first `completed` (implementation done), then `verified` (validated).

pub mod manager;
pub mod plan;

pub use manager::PlanManager;
pub use plan::{Plan, PlanStatus, PlanTask, ProgressEntry};
