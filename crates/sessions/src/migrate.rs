//! Migration from the legacy single-file `root.json` layout to v2.
//!
//! The migration is guarded by a `.backup/` safety net: all original files
//! move there first, a generated `rollback.sh` restores them, and a second
//! migration attempt refuses to run while the backup exists (preventing
//! double-migration corruption).

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use sc_domain::error::{Error, Result};
use sc_domain::trace::TraceEvent;

use crate::jsonl;
use crate::store::{CompactionInfo, MetadataRecord, SessionMeta, SessionStore, UsageRecord};

const ROLLBACK_SCRIPT: &str = r#"#!/bin/sh
# Restore the pre-migration layout of this session directory.
set -e
cd "$(dirname "$0")/.."
rm -f session.json
rm -f ./*.history.jsonl ./*.metadata.jsonl ./*.context.jsonl
mv .backup/*.json .
rm -f .backup/rollback.sh
rmdir .backup
"#;

/// What a migration did (or, for a dry-run, would do in the preview copy).
#[derive(Debug, Clone)]
pub struct MigrationStats {
    pub session_dir: PathBuf,
    /// Messages in the current (post-compaction) window.
    pub message_count: usize,
    /// Messages recovered from pre-compaction archives.
    pub archive_message_count: usize,
    pub usage_count: usize,
    pub sub_agents: Vec<String>,
    pub dry_run: bool,
}

/// Migrate one session directory in place.
///
/// Refuses with `MigrationConflict` when `.backup/` already exists or the
/// directory is already v2.
pub fn migrate_session(session_dir: &Path) -> Result<MigrationStats> {
    let backup_dir = session_dir.join(".backup");
    if backup_dir.exists() {
        return Err(Error::MigrationConflict(format!(
            "{} already exists - refusing to overwrite a previous migration's backup",
            backup_dir.display()
        )));
    }
    if session_dir.join("session.json").exists() {
        return Err(Error::MigrationConflict(format!(
            "{} is already in v2 format (session.json exists)",
            session_dir.display()
        )));
    }
    let root_path = session_dir.join("root.json");
    if !root_path.exists() {
        return Err(Error::NotFound(format!("no root.json in {}", session_dir.display())));
    }

    let legacy: Value = serde_json::from_str(&std::fs::read_to_string(&root_path)?)?;

    // 1. Move every original json file into .backup/.
    std::fs::create_dir_all(&backup_dir)?;
    let mut moved: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(session_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && name.ends_with(".json") {
            std::fs::rename(entry.path(), backup_dir.join(&name))?;
            moved.push(name);
        }
    }
    moved.sort();

    // 2. Replay pre-compaction archives oldest-first into the history log.
    //    The timestamped names sort chronologically.
    let mut store = SessionStore::new(session_dir, "root");
    let mut archive_message_count = 0;
    for name in moved.iter().filter(|n| is_archive(n)) {
        let archive: Value =
            serde_json::from_str(&std::fs::read_to_string(backup_dir.join(name))?)?;
        let messages = messages_of(&archive);
        let prev = store.last_msg_id();
        store.append_messages(&messages, prev)?;
        archive_message_count += messages.len();

        // Keep the archived window visible in the v2 layout too.
        let stem = name.trim_end_matches(".json");
        jsonl::write_jsonl_atomic(
            &session_dir.join(format!("{stem}.context.jsonl")),
            &messages,
        )?;
    }

    // 3. Append the current messages last; the context window holds only
    //    these (compacted sessions already reflect the compacted window).
    let messages = messages_of(&legacy);
    let prev = store.last_msg_id();
    let current_ids = store.append_messages(&messages, prev)?;
    store.write_context(&messages)?;

    // 4. Pair usage entries positionally with assistant msg_ids.
    let assistant_ids: Vec<&String> = current_ids
        .iter()
        .zip(&messages)
        .filter(|(_, msg)| msg.get("role").and_then(Value::as_str) == Some("assistant"))
        .map(|(id, _)| id)
        .collect();
    let usage_pairs = legacy
        .get("usage")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut metadata = Vec::with_capacity(usage_pairs.len());
    for (index, pair) in usage_pairs.iter().enumerate() {
        let (usage_value, spec_value) = split_usage_pair(pair);
        metadata.push(MetadataRecord {
            msg_id: assistant_ids.get(index).map(|id| (*id).clone()),
            model: spec_value
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned(),
            model_spec: spec_value,
            usage: serde_json::from_value::<UsageRecord>(usage_value).unwrap_or_default(),
            timestamp: Utc::now(),
        });
    }
    store.append_metadata(&metadata)?;

    // 5. session.json with the preserved lineage.
    let legacy_meta = legacy.get("metadata").cloned().unwrap_or(Value::Null);
    let meta = SessionMeta {
        version: crate::store::SESSION_FORMAT_VERSION,
        session_id: legacy
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| {
                session_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            }),
        parent_session_id: legacy
            .get("parent_session_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        model_spec: legacy.get("model_spec").cloned().unwrap_or(Value::Null),
        thinking_mode: legacy
            .get("thinking_mode")
            .and_then(Value::as_str)
            .unwrap_or("max")
            .to_owned(),
        active_plan_id: legacy
            .get("active_plan_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        cli_args: legacy_meta
            .get("cli_args")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        compaction: legacy
            .get("compaction")
            .and_then(|v| serde_json::from_value::<CompactionInfo>(v.clone()).ok()),
        migrated_from: Some("root.json".to_owned()),
        created_at: legacy_meta
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        last_updated: None,
    };
    store.write_session_meta(meta)?;

    // 6. Sub-agent files become their own split files with their own
    //    msg_id prefix.
    let mut sub_agents = Vec::new();
    for name in moved.iter().filter(|n| is_sub_agent(n)) {
        let sub: Value =
            serde_json::from_str(&std::fs::read_to_string(backup_dir.join(name))?)?;
        let sub_id = name.trim_end_matches(".json").to_owned();
        let sub_messages = messages_of(&sub);
        let mut sub_store = SessionStore::new(session_dir, sub_id.clone());
        sub_store.append_messages(&sub_messages, None)?;
        sub_store.write_context(&sub_messages)?;
        sub_agents.push(sub_id);
    }

    // 7. Rollback script inside the backup.
    let rollback_path = backup_dir.join("rollback.sh");
    std::fs::write(&rollback_path, ROLLBACK_SCRIPT)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&rollback_path, std::fs::Permissions::from_mode(0o755))?;
    }

    TraceEvent::SessionMigrated {
        session_dir: session_dir.display().to_string(),
        messages: archive_message_count + messages.len(),
        sub_agents: sub_agents.len(),
    }
    .emit();

    Ok(MigrationStats {
        session_dir: session_dir.to_path_buf(),
        message_count: messages.len(),
        archive_message_count,
        usage_count: usage_pairs.len(),
        sub_agents,
        dry_run: false,
    })
}

/// Run the migration against a sibling `<dir>.preview` copy, leaving the
/// originals untouched.
pub fn migrate_session_dry_run(session_dir: &Path) -> Result<MigrationStats> {
    let name = session_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Other(format!("bad session dir: {}", session_dir.display())))?;
    let preview = session_dir.with_file_name(format!("{name}.preview"));
    if preview.exists() {
        std::fs::remove_dir_all(&preview)?;
    }
    copy_dir(session_dir, &preview)?;

    let mut stats = migrate_session(&preview)?;
    stats.dry_run = true;
    Ok(stats)
}

/// Migrate every legacy session under `<persona_base>/history/`.
/// Individual failures are logged and skipped.
pub fn migrate_all_sessions(persona_base: &Path) -> Result<Vec<MigrationStats>> {
    let history_dir = persona_base.join("history");
    if !history_dir.exists() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&history_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        if !dir.join("root.json").exists() || dir.join("session.json").exists() {
            continue;
        }
        match migrate_session(&dir) {
            Ok(stats) => results.push(stats),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "session migration failed");
            }
        }
    }
    Ok(results)
}

fn is_archive(name: &str) -> bool {
    name.starts_with("pre-compaction-") && name.ends_with(".json")
}

fn is_sub_agent(name: &str) -> bool {
    name.ends_with(".json")
        && name != "root.json"
        && name != "session.json"
        && !is_archive(name)
}

fn messages_of(data: &Value) -> Vec<Value> {
    data.get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Usage entries are `[usage, model_spec]` pairs in the legacy file.
fn split_usage_pair(pair: &Value) -> (Value, Value) {
    match pair.as_array() {
        Some(items) => (
            items.first().cloned().unwrap_or(Value::Null),
            items.get(1).cloned().unwrap_or(Value::Null),
        ),
        None => (pair.clone(), Value::Null),
    }
}

/// Accept RFC-3339 or the naive ISO-8601 the legacy writer produced.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_parsing_accepts_both_shapes() {
        assert!(parse_timestamp("2025-06-01T10:00:00+00:00").is_some());
        assert!(parse_timestamp("2025-06-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn archive_and_sub_agent_classification() {
        assert!(is_archive("pre-compaction-20250601_100000.json"));
        assert!(!is_archive("root.json"));
        assert!(is_sub_agent("abc-123.json"));
        assert!(!is_sub_agent("root.json"));
        assert!(!is_sub_agent("session.json"));
        assert!(!is_sub_agent("pre-compaction-20250601_100000.json"));
    }
}
