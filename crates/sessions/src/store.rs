//! Read/write primitives for the v2 split-file session layout.
//!
//! ```text
//! <session_dir>/
//!   session.json             session-level metadata
//!   <agent>.history.jsonl    append-only complete message log
//!   <agent>.metadata.jsonl   per-turn usage/model metadata
//!   <agent>.context.jsonl    current context window (rewritten)
//! ```
//!
//! `<agent>` is `root` for the root context and the sub-agent's session id
//! for sub-agents, which share the parent's directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sc_domain::error::Result;

use crate::jsonl;

/// Format version written to `session.json`.
pub const SESSION_FORMAT_VERSION: u32 = 2;

/// Keys injected by the store that must be stripped before messages are
/// handed back to an API client.
pub const INTERNAL_MSG_KEYS: &[&str] = &["msg_id", "prev_msg_id", "timestamp"];

fn default_thinking_mode() -> String {
    "max".to_owned()
}

/// Session-level metadata (`session.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub version: u32,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub model_spec: Value,
    #[serde(default = "default_thinking_mode")]
    pub thinking_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SessionMeta {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            session_id: session_id.into(),
            parent_session_id: None,
            model_spec: Value::Null,
            thinking_mode: default_thinking_mode(),
            active_plan_id: None,
            cli_args: None,
            compaction: None,
            migrated_from: None,
            created_at: None,
            last_updated: None,
        }
    }
}

/// Summary of an in-place compaction, recorded in `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionInfo {
    pub is_compacted: bool,
    pub original_message_count: usize,
    pub original_token_count: u64,
    pub compacted_message_count: usize,
    pub summary_token_count: u64,
    pub compaction_ratio: f64,
    #[serde(default)]
    pub pre_compaction_archive: String,
}

/// Normalized per-turn token usage. Foreign usage shapes are converted to
/// this at the edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// One `metadata.jsonl` record — one per API turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// The most recently assigned assistant msg_id at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub model_spec: Value,
    #[serde(default)]
    pub usage: UsageRecord,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Manages one agent's files within a session directory.
///
/// Single-writer: exactly one store owns the files for a given
/// `(session_dir, agent_name)` pair. Sub-agents write disjoint files in
/// the same directory, so concurrent agents never contend.
pub struct SessionStore {
    session_dir: PathBuf,
    agent_name: String,
    id_prefix: String,
    msg_seq: u32,
}

impl SessionStore {
    /// Open (or lazily create) the store for `agent_name` in `session_dir`.
    ///
    /// Scans any existing history file to recover the highest assigned
    /// msg_id sequence — ids are never reused across restarts.
    pub fn new(session_dir: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let session_dir = session_dir.into();
        let agent_name = agent_name.into();
        let id_prefix = if agent_name == "root" {
            "m_".to_owned()
        } else {
            // First 8 chars of the sub-agent id namespace its msg_ids.
            let short: String = agent_name.chars().take(8).collect();
            format!("m_{short}_")
        };

        let mut store = Self {
            session_dir,
            agent_name,
            id_prefix,
            msg_seq: 0,
        };
        store.msg_seq = store.scan_max_seq();
        store
    }

    fn scan_max_seq(&self) -> u32 {
        let Ok(records) = jsonl::read_jsonl(&self.history_path()) else {
            return 0;
        };
        // The sequence is the trailing digit run of the msg_id.
        let seq_re = Regex::new(r"_(\d+)$").expect("static regex");
        let mut max_seq = 0;
        for record in records {
            if let Some(msg_id) = record.get("msg_id").and_then(Value::as_str) {
                if let Some(caps) = seq_re.captures(msg_id) {
                    if let Ok(seq) = caps[1].parse::<u32>() {
                        max_seq = max_seq.max(seq);
                    }
                }
            }
        }
        max_seq
    }

    // ── file paths ───────────────────────────────────────────────────

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn session_meta_path(&self) -> PathBuf {
        self.session_dir.join("session.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.session_dir.join(format!("{}.history.jsonl", self.agent_name))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.session_dir.join(format!("{}.metadata.jsonl", self.agent_name))
    }

    pub fn context_path(&self) -> PathBuf {
        self.session_dir.join(format!("{}.context.jsonl", self.agent_name))
    }

    // ── message id management ────────────────────────────────────────

    /// Next sequential msg_id; advances the counter.
    pub fn next_msg_id(&mut self) -> String {
        self.msg_seq += 1;
        format!("{}{:04}", self.id_prefix, self.msg_seq)
    }

    /// What the next msg_id would be, without advancing.
    pub fn peek_msg_id(&self) -> String {
        format!("{}{:04}", self.id_prefix, self.msg_seq + 1)
    }

    /// The most recently assigned msg_id, if any.
    pub fn last_msg_id(&self) -> Option<String> {
        (self.msg_seq > 0).then(|| format!("{}{:04}", self.id_prefix, self.msg_seq))
    }

    // ── session.json ─────────────────────────────────────────────────

    /// Write `session.json`, setting the version, preserving an existing
    /// `created_at`, and bumping `last_updated`.
    pub fn write_session_meta(&self, mut meta: SessionMeta) -> Result<()> {
        std::fs::create_dir_all(&self.session_dir)?;

        let now = Utc::now();
        meta.version = SESSION_FORMAT_VERSION;
        meta.last_updated = Some(now);
        if let Some(existing) = self.read_session_meta()? {
            if existing.created_at.is_some() {
                meta.created_at = existing.created_at;
            }
        }
        if meta.created_at.is_none() {
            meta.created_at = Some(now);
        }

        let json = serde_json::to_string_pretty(&meta)?;
        let tmp = self.session_meta_path().with_extension("json.tmp");
        std::fs::write(&tmp, json + "\n")?;
        std::fs::rename(&tmp, self.session_meta_path())?;
        Ok(())
    }

    pub fn read_session_meta(&self) -> Result<Option<SessionMeta>> {
        let path = self.session_meta_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable session.json");
                Ok(None)
            }
        }
    }

    // ── history.jsonl ────────────────────────────────────────────────

    /// Append messages to the history log, assigning msg_ids and chaining
    /// `prev_msg_id`s in one pass.
    ///
    /// The first record chains to `prev_msg_id` (`None` for a fresh root
    /// agent, the parent's last msg_id for a sub-agent's first flush);
    /// every subsequent record chains to its predecessor.
    pub fn append_messages(
        &mut self,
        messages: &[Value],
        prev_msg_id: Option<String>,
    ) -> Result<Vec<String>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let now = serde_json::to_value(Utc::now())?;
        let mut records = Vec::with_capacity(messages.len());
        let mut assigned = Vec::with_capacity(messages.len());
        let mut current_prev = prev_msg_id;

        for message in messages {
            let msg_id = self.next_msg_id();
            let mut record = serde_json::Map::new();
            record.insert("msg_id".to_owned(), Value::String(msg_id.clone()));
            record.insert(
                "prev_msg_id".to_owned(),
                match &current_prev {
                    Some(prev) => Value::String(prev.clone()),
                    None => Value::Null,
                },
            );
            record.insert("timestamp".to_owned(), now.clone());
            match message.as_object() {
                Some(source) => {
                    for (key, value) in source {
                        record.insert(key.clone(), value.clone());
                    }
                }
                None => {
                    record.insert("content".to_owned(), message.clone());
                }
            }
            records.push(Value::Object(record));
            current_prev = Some(msg_id.clone());
            assigned.push(msg_id);
        }

        jsonl::append_jsonl(&self.history_path(), &records)?;
        Ok(assigned)
    }

    pub fn read_history(&self) -> Result<Vec<Value>> {
        jsonl::read_jsonl(&self.history_path())
    }

    // ── metadata.jsonl ───────────────────────────────────────────────

    pub fn append_metadata(&self, entries: &[MetadataRecord]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let records = entries
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        jsonl::append_jsonl(&self.metadata_path(), &records)
    }

    pub fn read_metadata(&self) -> Result<Vec<MetadataRecord>> {
        let mut out = Vec::new();
        for value in jsonl::read_jsonl(&self.metadata_path())? {
            match serde_json::from_value::<MetadataRecord>(value) {
                Ok(record) => out.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed metadata record");
                }
            }
        }
        Ok(out)
    }

    // ── context.jsonl ────────────────────────────────────────────────

    /// Overwrite the context window file with the current messages.
    pub fn write_context(&self, messages: &[Value]) -> Result<()> {
        jsonl::write_jsonl_atomic(&self.context_path(), messages)
    }

    pub fn read_context(&self) -> Result<Vec<Value>> {
        jsonl::read_jsonl(&self.context_path())
    }

    // ── legacy detection ─────────────────────────────────────────────

    /// True when this directory still uses the legacy `root.json` layout.
    pub fn is_legacy(&self) -> bool {
        self.session_dir.join("root.json").exists() && !self.session_meta_path().exists()
    }
}

/// Remove store-injected bookkeeping keys from a message.
pub fn strip_internal_keys(message: &Value) -> Value {
    match message.as_object() {
        Some(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !INTERNAL_MSG_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        None => message.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
