//! Durable per-agent conversation history in the split-file v2 format.
//!
//! Each session directory holds a shared `session.json` plus, per agent
//! (root or sub-agent), an append-only `history.jsonl` audit log, an
//! append-only `metadata.jsonl` of per-turn usage, and a `context.jsonl`
//! holding the current context window (rewritten on every flush and on
//! compaction). Legacy single-file `root.json` sessions are migrated with
//! a `.backup/` safety net.

pub mod context;
pub mod jsonl;
pub mod migrate;
pub mod store;
pub mod validation;

pub use context::{SessionContext, UsageEntry};
pub use migrate::{migrate_all_sessions, migrate_session, migrate_session_dry_run, MigrationStats};
pub use store::{
    CompactionInfo, MetadataRecord, SessionMeta, SessionStore, UsageRecord,
    SESSION_FORMAT_VERSION,
};
pub use validation::strip_orphaned_tool_blocks;
