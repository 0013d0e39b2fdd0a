//! The live conversation context bound to its durable store.
//!
//! A [`SessionContext`] owns the in-memory context window plus usage
//! accounting for one agent and persists both incrementally: flush after
//! every model turn appends only what is new, rewrites the context window,
//! and refreshes `session.json`. Rotation and in-place compaction replace
//! the window while the history log only ever grows.

use std::path::Path;

use chrono::Utc;
use serde_json::Value;

use sc_domain::error::{Error, Result};
use sc_domain::trace::TraceEvent;

use crate::migrate;
use crate::store::{
    strip_internal_keys, CompactionInfo, MetadataRecord, SessionMeta, SessionStore,
    UsageRecord,
};
use crate::validation::strip_orphaned_tool_blocks;

/// One recorded API turn: normalized usage plus the model that served it.
#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub usage: UsageRecord,
    pub model: String,
    pub model_spec: Value,
}

pub struct SessionContext {
    session_id: String,
    parent_session_id: Option<String>,
    pub model_spec: Value,
    pub thinking_mode: String,
    pub active_plan_id: Option<String>,
    pub cli_args: Option<Vec<String>>,
    chat_history: Vec<Value>,
    usage: Vec<UsageEntry>,
    tool_result_buffer: Vec<Value>,
    store: SessionStore,
    // Lengths at last flush; only the tail beyond these is appended.
    flushed_msg_count: usize,
    flushed_usage_count: usize,
    // For sub-agents: the parent's last msg_id at creation time, used as
    // the first record's prev_msg_id.
    parent_msg_id: Option<String>,
    compaction: Option<CompactionInfo>,
}

impl SessionContext {
    /// Create a fresh root context under `<persona_base>/history/<id>/`.
    pub fn new_root(persona_base: &Path, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let session_dir = persona_base.join("history").join(&session_id);
        Self {
            store: SessionStore::new(session_dir, "root"),
            session_id,
            parent_session_id: None,
            model_spec: Value::Null,
            thinking_mode: "max".to_owned(),
            active_plan_id: None,
            cli_args: None,
            chat_history: Vec::new(),
            usage: Vec::new(),
            tool_result_buffer: Vec::new(),
            flushed_msg_count: 0,
            flushed_usage_count: 0,
            parent_msg_id: None,
            compaction: None,
        }
    }

    /// Create a sub-agent context sharing this session's directory.
    ///
    /// Captures the parent's last msg_id so the sub-agent's first history
    /// record links into the parent's chain.
    pub fn child(&self, sub_session_id: impl Into<String>) -> Self {
        let sub_session_id = sub_session_id.into();
        Self {
            store: SessionStore::new(self.store.session_dir(), sub_session_id.clone()),
            session_id: sub_session_id,
            parent_session_id: Some(self.session_id.clone()),
            model_spec: self.model_spec.clone(),
            thinking_mode: self.thinking_mode.clone(),
            active_plan_id: self.active_plan_id.clone(),
            cli_args: self.cli_args.clone(),
            chat_history: Vec::new(),
            usage: Vec::new(),
            tool_result_buffer: Vec::new(),
            flushed_msg_count: 0,
            flushed_usage_count: 0,
            parent_msg_id: self.store.last_msg_id(),
            compaction: None,
        }
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn parent_session_id(&self) -> Option<&str> {
        self.parent_session_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_session_id.is_none()
    }

    pub fn chat_history(&self) -> &[Value] {
        &self.chat_history
    }

    pub fn usage(&self) -> &[UsageEntry] {
        &self.usage
    }

    pub fn compaction(&self) -> Option<&CompactionInfo> {
        self.compaction.as_ref()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn tool_result_buffer(&self) -> &[Value] {
        &self.tool_result_buffer
    }

    /// Summed token usage across all recorded turns.
    pub fn usage_totals(&self) -> UsageRecord {
        let mut totals = UsageRecord::default();
        for entry in &self.usage {
            totals.input_tokens += entry.usage.input_tokens;
            totals.output_tokens += entry.usage.output_tokens;
            totals.cache_creation_input_tokens += entry.usage.cache_creation_input_tokens;
            totals.cache_read_input_tokens += entry.usage.cache_read_input_tokens;
        }
        totals
    }

    // ── mutation between flushes (append-only) ───────────────────────

    /// Append a message to the context window.
    ///
    /// The window must only grow between flushes; shortening it is the job
    /// of [`rotate`](Self::rotate) / [`compact_in_place`](Self::compact_in_place).
    pub fn push_message(&mut self, message: Value) {
        self.chat_history.push(message);
    }

    pub fn push_tool_result(&mut self, block: Value) {
        self.tool_result_buffer.push(block);
    }

    pub fn record_usage(&mut self, usage: UsageRecord, model: &str, model_spec: Value) {
        self.usage.push(UsageEntry {
            usage,
            model: model.to_owned(),
            model_spec,
        });
    }

    // ── persistence ──────────────────────────────────────────────────

    /// Persist incrementally after a model turn.
    ///
    /// 1. Appends messages beyond the last flushed count to
    ///    `history.jsonl`, assigning chained msg_ids.
    /// 2. Appends new usage entries to `metadata.jsonl`, each tagged with
    ///    the most recently assigned msg_id.
    /// 3. Rewrites `context.jsonl` with the full current window.
    /// 4. Rewrites `session.json`, preserving `created_at`.
    pub fn flush(&mut self) -> Result<()> {
        if self.chat_history.is_empty() {
            return Ok(());
        }

        let msg_count = self.chat_history.len();
        let mut appended = 0;
        if msg_count > self.flushed_msg_count {
            let new_messages = &self.chat_history[self.flushed_msg_count..];
            let prev = self
                .store
                .last_msg_id()
                .or_else(|| self.parent_msg_id.clone());
            self.store.append_messages(new_messages, prev)?;
            appended = new_messages.len();
        }

        let usage_count = self.usage.len();
        let mut appended_usage = 0;
        if usage_count > self.flushed_usage_count {
            let records: Vec<MetadataRecord> = self.usage[self.flushed_usage_count..]
                .iter()
                .map(|entry| MetadataRecord {
                    msg_id: self.store.last_msg_id(),
                    model: entry.model.clone(),
                    model_spec: entry.model_spec.clone(),
                    usage: entry.usage.clone(),
                    timestamp: Utc::now(),
                })
                .collect();
            appended_usage = records.len();
            self.store.append_metadata(&records)?;
        }

        self.store.write_context(&self.chat_history)?;
        self.store.write_session_meta(self.build_meta())?;

        self.flushed_msg_count = msg_count;
        self.flushed_usage_count = usage_count;

        TraceEvent::SessionFlushed {
            session_id: self.session_id.clone(),
            new_messages: appended,
            new_usage: appended_usage,
        }
        .emit();
        Ok(())
    }

    /// Archive the current context window, then replace it with the
    /// compacted messages. Root contexts only.
    ///
    /// `history.jsonl` is never truncated: the compacted messages are
    /// appended to it on the flush that follows, continuing the msg_id
    /// sequence.
    pub fn rotate(
        &mut self,
        archive_suffix: &str,
        new_messages: Vec<Value>,
        compaction: Option<CompactionInfo>,
    ) -> Result<String> {
        if self.parent_session_id.is_some() {
            return Err(Error::NotRoot);
        }

        let archive_name = format!("{archive_suffix}.context.jsonl");
        let context_path = self.store.context_path();
        if context_path.exists() {
            std::fs::copy(&context_path, self.store.session_dir().join(&archive_name))?;
        }

        self.replace_window(new_messages, compaction)?;

        TraceEvent::ContextRotated {
            session_id: self.session_id.clone(),
            archive: archive_name.clone(),
        }
        .emit();
        Ok(archive_name)
    }

    /// Replace the context window without archiving. Valid on both root
    /// and sub-agent contexts.
    pub fn compact_in_place(
        &mut self,
        new_messages: Vec<Value>,
        compaction: Option<CompactionInfo>,
    ) -> Result<()> {
        let count = new_messages.len();
        self.replace_window(new_messages, compaction)?;
        TraceEvent::ContextCompacted {
            session_id: self.session_id.clone(),
            message_count: count,
        }
        .emit();
        Ok(())
    }

    fn replace_window(
        &mut self,
        new_messages: Vec<Value>,
        compaction: Option<CompactionInfo>,
    ) -> Result<()> {
        self.chat_history = new_messages;
        self.tool_result_buffer.clear();
        // The compacted window is a fresh start for the flush counters;
        // usage already written stays written.
        self.flushed_msg_count = 0;
        self.flushed_usage_count = self.usage.len();
        if compaction.is_some() {
            self.compaction = compaction;
        }
        self.flush()
    }

    fn build_meta(&self) -> SessionMeta {
        SessionMeta {
            version: crate::store::SESSION_FORMAT_VERSION,
            session_id: self.session_id.clone(),
            parent_session_id: self.parent_session_id.clone(),
            model_spec: self.model_spec.clone(),
            thinking_mode: self.thinking_mode.clone(),
            active_plan_id: self.active_plan_id.clone(),
            cli_args: self.cli_args.clone(),
            compaction: self.compaction.clone(),
            migrated_from: None,
            created_at: None,
            last_updated: None,
        }
    }

    // ── resume ───────────────────────────────────────────────────────

    /// Load a session from disk, migrating the legacy single-file layout
    /// first if needed. Returns `None` when nothing resumable exists.
    pub fn load(persona_base: &Path, session_id: &str) -> Result<Option<Self>> {
        let session_dir = persona_base.join("history").join(session_id);
        if !session_dir.exists() {
            return Ok(None);
        }

        let probe = SessionStore::new(&session_dir, "root");
        if probe.is_legacy() {
            tracing::info!(session_id, "auto-migrating legacy session to v2");
            migrate::migrate_session(&session_dir)?;
        }

        let store = SessionStore::new(&session_dir, "root");
        let Some(meta) = store.read_session_meta()? else {
            return Ok(None);
        };
        if meta.version < crate::store::SESSION_FORMAT_VERSION {
            return Ok(None);
        }

        // The context window is what the agent currently sees; fall back
        // to full history for sessions that never flushed a context.
        let mut window = store.read_context()?;
        if window.is_empty() {
            window = store.read_history()?;
        }
        let window: Vec<Value> = window.iter().map(strip_internal_keys).collect();

        let before = window.len();
        let window = strip_orphaned_tool_blocks(window);
        if window.len() != before {
            tracing::warn!(
                session_id,
                removed = before - window.len(),
                "cleaned up orphaned tool blocks on resume"
            );
        }

        let usage: Vec<UsageEntry> = store
            .read_metadata()?
            .into_iter()
            .map(|record| UsageEntry {
                usage: record.usage,
                model: record.model,
                model_spec: record.model_spec,
            })
            .collect();

        let flushed_msg_count = window.len();
        let flushed_usage_count = usage.len();
        Ok(Some(Self {
            session_id: meta.session_id,
            parent_session_id: meta.parent_session_id,
            model_spec: meta.model_spec,
            thinking_mode: meta.thinking_mode,
            active_plan_id: meta.active_plan_id,
            cli_args: meta.cli_args,
            chat_history: window,
            usage,
            tool_result_buffer: Vec::new(),
            store,
            flushed_msg_count,
            flushed_usage_count,
            parent_msg_id: None,
            compaction: meta.compaction,
        }))
    }
}
