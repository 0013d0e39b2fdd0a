//! Legacy `root.json` migration: layout, idempotence guard, dry-run
//! preview, and rollback.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use sc_sessions::{migrate_all_sessions, migrate_session, migrate_session_dry_run};

fn msg(role: &str, text: &str) -> Value {
    json!({"role": role, "content": text})
}

/// A legacy session: 4 current messages + 2 usage entries, one
/// pre-compaction archive with 20 messages, one sub-agent file.
fn legacy_session(dir: &Path) {
    let messages: Vec<Value> = vec![
        msg("user", "current 1"),
        msg("assistant", "current 2"),
        msg("user", "current 3"),
        msg("assistant", "current 4"),
    ];
    let root = json!({
        "session_id": "sess-legacy",
        "thinking_mode": "max",
        "model_spec": {"title": "sonnet"},
        "messages": messages,
        "usage": [
            [{"input_tokens": 10, "output_tokens": 2}, {"title": "sonnet"}],
            [{"input_tokens": 20, "output_tokens": 4}, {"title": "sonnet"}],
        ],
        "metadata": {
            "created_at": "2025-06-01T09:00:00",
            "cli_args": ["--persona", "default"],
        },
    });
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("root.json"), serde_json::to_string_pretty(&root).unwrap())
        .unwrap();

    let archive_messages: Vec<Value> = (0..20)
        .map(|i| msg(if i % 2 == 0 { "user" } else { "assistant" }, &format!("old {i}")))
        .collect();
    std::fs::write(
        dir.join("pre-compaction-20250601_100000.json"),
        serde_json::to_string(&json!({ "messages": archive_messages })).unwrap(),
    )
    .unwrap();

    std::fs::write(
        dir.join("sub-abc123.json"),
        serde_json::to_string(&json!({
            "messages": [msg("user", "sub 1"), msg("assistant", "sub 2")],
        }))
        .unwrap(),
    )
    .unwrap();
}

fn read_jsonl(path: PathBuf) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn migration_produces_v2_layout() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("sess-legacy");
    legacy_session(&dir);

    let stats = migrate_session(&dir).unwrap();
    assert_eq!(stats.message_count, 4);
    assert_eq!(stats.archive_message_count, 20);
    assert_eq!(stats.usage_count, 2);
    assert_eq!(stats.sub_agents, ["sub-abc123"]);

    // History spans archives + current with one continuous sequence.
    let history = read_jsonl(dir.join("root.history.jsonl"));
    assert_eq!(history.len(), 24);
    assert_eq!(history[0]["msg_id"], "m_0001");
    assert_eq!(history[23]["msg_id"], "m_0024");
    for pair in history.windows(2) {
        assert_eq!(pair[1]["prev_msg_id"], pair[0]["msg_id"]);
    }
    // Oldest-first: archive content precedes the current window.
    assert_eq!(history[0]["content"], "old 0");
    assert_eq!(history[20]["content"], "current 1");

    // Context holds only the post-compaction (current) window.
    let context = read_jsonl(dir.join("root.context.jsonl"));
    assert_eq!(context.len(), 4);
    assert_eq!(context[0]["content"], "current 1");

    // Usage paired positionally with the current window's assistant ids.
    let metadata = read_jsonl(dir.join("root.metadata.jsonl"));
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata[0]["msg_id"], "m_0022");
    assert_eq!(metadata[1]["msg_id"], "m_0024");
    assert_eq!(metadata[0]["usage"]["input_tokens"], 10);

    // session.json carries the lineage.
    let meta: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("session.json")).unwrap())
            .unwrap();
    assert_eq!(meta["version"], 2);
    assert_eq!(meta["migrated_from"], "root.json");
    assert_eq!(meta["session_id"], "sess-legacy");
    assert!(meta["created_at"]
        .as_str()
        .unwrap()
        .starts_with("2025-06-01T09:00:00"));

    // Originals are all preserved in .backup/, with a rollback script.
    for name in [
        "root.json",
        "pre-compaction-20250601_100000.json",
        "sub-abc123.json",
    ] {
        assert!(dir.join(".backup").join(name).exists(), "missing backup {name}");
    }
    assert!(dir.join(".backup/rollback.sh").exists());

    // Sub-agent split files with their own prefix.
    let sub_history = read_jsonl(dir.join("sub-abc123.history.jsonl"));
    assert_eq!(sub_history.len(), 2);
    assert_eq!(sub_history[0]["msg_id"], "m_sub-abc1_0001");
    assert!(dir.join("sub-abc123.context.jsonl").exists());

    // The archived window stays visible in the v2 layout.
    let archived = read_jsonl(dir.join("pre-compaction-20250601_100000.context.jsonl"));
    assert_eq!(archived.len(), 20);
}

#[test]
fn second_migration_is_refused() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("sess-legacy");
    legacy_session(&dir);

    migrate_session(&dir).unwrap();
    let err = migrate_session(&dir).unwrap_err();
    assert_eq!(err.kind(), "MigrationConflict");
}

#[test]
fn backup_presence_alone_blocks_migration() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("sess-legacy");
    legacy_session(&dir);
    std::fs::create_dir_all(dir.join(".backup")).unwrap();

    let err = migrate_session(&dir).unwrap_err();
    assert_eq!(err.kind(), "MigrationConflict");
    // Nothing was touched.
    assert!(dir.join("root.json").exists());
    assert!(!dir.join("session.json").exists());
}

#[test]
fn dry_run_migrates_a_preview_copy_only() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("sess-legacy");
    legacy_session(&dir);

    let stats = migrate_session_dry_run(&dir).unwrap();
    assert!(stats.dry_run);
    assert_eq!(stats.message_count, 4);

    // Originals untouched.
    assert!(dir.join("root.json").exists());
    assert!(!dir.join("session.json").exists());
    assert!(!dir.join(".backup").exists());

    // The preview holds the migrated layout.
    let preview = base.path().join("sess-legacy.preview");
    assert!(preview.join("session.json").exists());
    assert_eq!(read_jsonl(preview.join("root.history.jsonl")).len(), 24);
}

#[test]
fn rollback_then_remigrate_reproduces_the_layout() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("sess-legacy");
    legacy_session(&dir);

    migrate_session(&dir).unwrap();
    let first_history = read_jsonl(dir.join("root.history.jsonl"));

    // Apply what rollback.sh does.
    for entry in std::fs::read_dir(&dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "session.json"
            || name.ends_with(".history.jsonl")
            || name.ends_with(".metadata.jsonl")
            || name.ends_with(".context.jsonl")
        {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }
    for entry in std::fs::read_dir(dir.join(".backup")).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            std::fs::rename(entry.path(), dir.join(&name)).unwrap();
        }
    }
    std::fs::remove_file(dir.join(".backup/rollback.sh")).unwrap();
    std::fs::remove_dir(dir.join(".backup")).unwrap();

    // Back to legacy; migrating again yields the same ids and content.
    let stats = migrate_session(&dir).unwrap();
    assert_eq!(stats.message_count, 4);
    let second_history = read_jsonl(dir.join("root.history.jsonl"));
    assert_eq!(first_history.len(), second_history.len());
    for (a, b) in first_history.iter().zip(&second_history) {
        assert_eq!(a["msg_id"], b["msg_id"]);
        assert_eq!(a["prev_msg_id"], b["prev_msg_id"]);
        assert_eq!(a["content"], b["content"]);
        assert_eq!(a["role"], b["role"]);
    }
}

#[test]
fn migrate_all_skips_already_migrated_sessions() {
    let base = tempfile::tempdir().unwrap();
    let persona = base.path();
    legacy_session(&persona.join("history/sess-a"));
    legacy_session(&persona.join("history/sess-b"));

    let first = migrate_all_sessions(persona).unwrap();
    assert_eq!(first.len(), 2);

    // Second sweep finds nothing to do (conflict-free).
    let second = migrate_all_sessions(persona).unwrap();
    assert!(second.is_empty());
}
