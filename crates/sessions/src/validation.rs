//! Conversation repair applied on resume.
//!
//! Compaction or a crash mid-turn can leave a `tool_use` block without its
//! `tool_result` (or the reverse), which API clients reject. The sweep
//! strips both kinds of orphan and drops any message whose content becomes
//! empty.

use std::collections::HashSet;

use serde_json::Value;

/// Strip orphaned tool blocks from a message list.
///
/// A `tool_result` is orphaned when no earlier message carries a
/// `tool_use` with the same id; a `tool_use` is orphaned when no later
/// message carries its `tool_result`.
pub fn strip_orphaned_tool_blocks(messages: Vec<Value>) -> Vec<Value> {
    let mut use_ids_before: Vec<HashSet<String>> = Vec::with_capacity(messages.len());
    let mut result_ids_after: Vec<HashSet<String>> = vec![HashSet::new(); messages.len()];

    let mut seen_uses = HashSet::new();
    for message in &messages {
        use_ids_before.push(seen_uses.clone());
        collect_ids(message, "tool_use", "id", &mut seen_uses);
    }

    let mut seen_results = HashSet::new();
    for (index, message) in messages.iter().enumerate().rev() {
        result_ids_after[index] = seen_results.clone();
        collect_ids(message, "tool_result", "tool_use_id", &mut seen_results);
    }

    let mut out = Vec::with_capacity(messages.len());
    for (index, mut message) in messages.into_iter().enumerate() {
        let had_blocks = message
            .get("content")
            .map(|content| content.is_array())
            .unwrap_or(false);

        if had_blocks {
            if let Some(blocks) = message
                .get_mut("content")
                .and_then(Value::as_array_mut)
            {
                blocks.retain(|block| match block.get("type").and_then(Value::as_str) {
                    Some("tool_result") => block
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| use_ids_before[index].contains(id)),
                    Some("tool_use") => block
                        .get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| result_ids_after[index].contains(id)),
                    _ => true,
                });
            }
        }

        let emptied = had_blocks
            && message
                .get("content")
                .and_then(Value::as_array)
                .is_some_and(|blocks| blocks.is_empty());
        if emptied {
            tracing::warn!(index, "dropping message emptied by orphan sweep");
            continue;
        }
        out.push(message);
    }
    out
}

fn collect_ids(message: &Value, block_type: &str, id_key: &str, into: &mut HashSet<String>) {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return;
    };
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some(block_type) {
            if let Some(id) = block.get(id_key).and_then(Value::as_str) {
                into.insert(id.to_owned());
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
