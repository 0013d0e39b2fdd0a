//! Flush / rotate / resume flows against a real temp directory.

use serde_json::{json, Value};

use sc_sessions::{CompactionInfo, SessionContext, UsageRecord};

fn msg(role: &str, text: &str) -> Value {
    json!({"role": role, "content": text})
}

fn history_bytes(ctx: &SessionContext) -> u64 {
    std::fs::metadata(ctx.store().history_path())
        .map(|m| m.len())
        .unwrap_or(0)
}

#[test]
fn incremental_flush_assigns_chained_ids() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new_root(base.path(), "sess-1");

    ctx.push_message(msg("user", "A"));
    ctx.push_message(msg("assistant", "B"));
    ctx.flush().unwrap();
    ctx.push_message(msg("user", "C"));
    ctx.flush().unwrap();

    let history = ctx.store().read_history().unwrap();
    assert_eq!(history.len(), 3);
    let ids: Vec<&str> = history
        .iter()
        .map(|r| r["msg_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["m_0001", "m_0002", "m_0003"]);
    assert_eq!(history[0]["prev_msg_id"], Value::Null);
    assert_eq!(history[1]["prev_msg_id"], "m_0001");
    assert_eq!(history[2]["prev_msg_id"], "m_0002");
}

#[test]
fn repeated_flush_without_changes_is_idempotent() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new_root(base.path(), "sess-1");
    ctx.push_message(msg("user", "A"));
    ctx.flush().unwrap();

    let before = ctx.store().read_history().unwrap().len();
    ctx.flush().unwrap();
    ctx.flush().unwrap();
    assert_eq!(ctx.store().read_history().unwrap().len(), before);
}

#[test]
fn usage_is_tagged_with_latest_msg_id() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new_root(base.path(), "sess-1");
    ctx.push_message(msg("user", "hi"));
    ctx.push_message(msg("assistant", "hello"));
    ctx.record_usage(
        UsageRecord {
            input_tokens: 12,
            output_tokens: 5,
            ..Default::default()
        },
        "sonnet",
        json!({"title": "sonnet"}),
    );
    ctx.flush().unwrap();

    let metadata = ctx.store().read_metadata().unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].msg_id.as_deref(), Some("m_0002"));
    assert_eq!(metadata[0].usage.input_tokens, 12);
}

#[test]
fn rotation_archives_window_and_never_shrinks_history() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new_root(base.path(), "sess-1");
    for i in 0..4 {
        ctx.push_message(msg("user", &format!("msg {i}")));
    }
    ctx.flush().unwrap();
    let bytes_before = history_bytes(&ctx);

    let summary = msg("user", "Summary of the conversation so far");
    let archive = ctx
        .rotate(
            "pre-compaction-20250601_100000",
            vec![summary.clone()],
            Some(CompactionInfo {
                is_compacted: true,
                original_message_count: 4,
                original_token_count: 4000,
                compacted_message_count: 1,
                summary_token_count: 200,
                compaction_ratio: 0.05,
                pre_compaction_archive: "pre-compaction-20250601_100000.context.jsonl".into(),
            }),
        )
        .unwrap();
    assert_eq!(archive, "pre-compaction-20250601_100000.context.jsonl");

    // The archive holds the pre-compaction window.
    let archived = std::fs::read_to_string(
        ctx.store().session_dir().join(&archive),
    )
    .unwrap();
    assert_eq!(archived.lines().count(), 4);

    // The context window is exactly the new messages.
    let window = ctx.store().read_context().unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0], summary);

    // History gained the compacted message; it never shrinks.
    assert_eq!(ctx.store().read_history().unwrap().len(), 5);
    assert!(history_bytes(&ctx) >= bytes_before);

    // Compaction metadata landed in session.json.
    let meta = ctx.store().read_session_meta().unwrap().unwrap();
    let compaction = meta.compaction.unwrap();
    assert!(compaction.is_compacted);
    assert_eq!(compaction.original_message_count, 4);
}

#[test]
fn rotate_refuses_sub_agent_contexts() {
    let base = tempfile::tempdir().unwrap();
    let mut root = SessionContext::new_root(base.path(), "sess-1");
    root.push_message(msg("user", "parent"));
    root.flush().unwrap();

    let mut child = root.child("sub-agent-42");
    child.push_message(msg("user", "child work"));
    child.flush().unwrap();

    let err = child.rotate("archive", vec![msg("user", "s")], None).unwrap_err();
    assert_eq!(err.kind(), "NotRoot");

    // In-place compaction is allowed for sub-agents.
    child.compact_in_place(vec![msg("user", "compacted")], None).unwrap();
    let window = child.store().read_context().unwrap();
    assert_eq!(window.len(), 1);
}

#[test]
fn sub_agent_first_record_links_to_parent_chain() {
    let base = tempfile::tempdir().unwrap();
    let mut root = SessionContext::new_root(base.path(), "sess-1");
    root.push_message(msg("user", "one"));
    root.push_message(msg("assistant", "two"));
    root.flush().unwrap();

    let mut child = root.child("subagent-xyz");
    child.push_message(msg("user", "first child message"));
    child.push_message(msg("assistant", "second child message"));
    child.flush().unwrap();

    let history = child.store().read_history().unwrap();
    assert_eq!(history[0]["msg_id"], "m_subagent_0001");
    // The cross-agent audit chain: first sub-agent record points at the
    // parent's last msg_id at child-creation time.
    assert_eq!(history[0]["prev_msg_id"], "m_0002");
    assert_eq!(history[1]["prev_msg_id"], "m_subagent_0001");
}

#[test]
fn resume_restores_window_usage_and_counters() {
    let base = tempfile::tempdir().unwrap();
    let session_id = "sess-resume";
    {
        let mut ctx = SessionContext::new_root(base.path(), session_id);
        ctx.model_spec = json!({"title": "sonnet"});
        ctx.push_message(msg("user", "A"));
        ctx.push_message(msg("assistant", "B"));
        ctx.record_usage(
            UsageRecord {
                input_tokens: 7,
                ..Default::default()
            },
            "sonnet",
            json!({"title": "sonnet"}),
        );
        ctx.flush().unwrap();
    }

    let mut loaded = SessionContext::load(base.path(), session_id)
        .unwrap()
        .expect("session should resume");
    assert_eq!(loaded.chat_history().len(), 2);
    assert_eq!(loaded.chat_history()[0], msg("user", "A"));
    assert_eq!(loaded.usage().len(), 1);
    assert_eq!(loaded.usage_totals().input_tokens, 7);
    assert_eq!(loaded.model_spec, json!({"title": "sonnet"}));

    // A no-op flush after resume must not duplicate anything.
    loaded.flush().unwrap();
    let reloaded = SessionContext::load(base.path(), session_id)
        .unwrap()
        .expect("session should resume again");
    assert_eq!(reloaded.chat_history().len(), 2);
    assert_eq!(reloaded.usage().len(), 1);
    assert_eq!(reloaded.store().read_history().unwrap().len(), 2);

    let meta = reloaded.store().read_session_meta().unwrap().unwrap();
    assert_eq!(meta.version, 2);
}

#[test]
fn resume_sweeps_orphaned_tool_blocks() {
    let base = tempfile::tempdir().unwrap();
    let session_id = "sess-orphans";
    {
        let mut ctx = SessionContext::new_root(base.path(), session_id);
        ctx.push_message(json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "tu_lost", "name": "shell", "input": {}},
            ],
        }));
        ctx.flush().unwrap();
    }

    let loaded = SessionContext::load(base.path(), session_id)
        .unwrap()
        .expect("session should resume");
    // The dangling tool_use was stripped; the text block survived.
    assert_eq!(loaded.chat_history().len(), 1);
    let blocks = loaded.chat_history()[0]["content"].as_array().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["type"], "text");
}

#[test]
fn msg_ids_continue_after_resume() {
    let base = tempfile::tempdir().unwrap();
    let session_id = "sess-continue";
    {
        let mut ctx = SessionContext::new_root(base.path(), session_id);
        ctx.push_message(msg("user", "A"));
        ctx.flush().unwrap();
    }

    let mut loaded = SessionContext::load(base.path(), session_id)
        .unwrap()
        .expect("resume");
    loaded.push_message(msg("assistant", "B"));
    loaded.flush().unwrap();

    let history = loaded.store().read_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["msg_id"], "m_0002");
    assert_eq!(history[1]["prev_msg_id"], "m_0001");
}
