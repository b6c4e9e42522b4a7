//! S8 Conversations: one L8 entity per session.

use chrono::DateTime;
use serde_json::json;
use std::collections::BTreeSet;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint;
use crate::text::truncate_chars;
use crate::warehouse::{EntityRow, Level, StagedRow, Table};

use super::{group_by_session, level_fingerprint};

const TITLE_CHARS: usize = 500;

fn title(session_id: &str, messages: &[StagedRow]) -> String {
    let non_empty = |m: &&StagedRow| !m.cleaned().content_cleaned.is_empty();
    messages
        .iter()
        .filter(non_empty)
        .find(|m| m.extraction().role == "user")
        .or_else(|| messages.iter().find(non_empty))
        .map(|m| truncate_chars(&m.cleaned().content_cleaned, TITLE_CHARS).0.to_string())
        .unwrap_or_else(|| format!("session {}", session_id))
}

fn duration_secs(first: Option<&str>, last: Option<&str>) -> Option<i64> {
    let first = DateTime::parse_from_rfc3339(first?).ok()?;
    let last = DateTime::parse_from_rfc3339(last?).ok()?;
    Some((last - first).num_seconds())
}

pub fn conversation(session_id: &str, messages: &[StagedRow], run_id: &str, now: &str) -> EntityRow {
    let count_role = |role: &str| messages.iter().filter(|m| m.extraction().role == role).count();
    let models: BTreeSet<&str> = messages
        .iter()
        .filter_map(|m| m.extraction().model.as_deref())
        .collect();
    let tools: BTreeSet<&str> = messages
        .iter()
        .filter_map(|m| m.extraction().tool_name.as_deref())
        .collect();
    let mut timestamps: Vec<&str> = messages
        .iter()
        .filter_map(|m| m.extraction().timestamp_utc.as_deref())
        .collect();
    timestamps.sort_unstable();
    let first = timestamps.first().copied();
    let last = timestamps.last().copied();
    let total_cost: f64 = messages.iter().filter_map(|m| m.extraction().cost_usd).sum();

    let text = title(session_id, messages);
    EntityRow {
        entity_id: mint::mint_conversation_id(session_id),
        parent_id: None,
        session_id: session_id.to_string(),
        level: Level::Conversation.as_i64(),
        fingerprint: Some(level_fingerprint(session_id, Level::Conversation, &text)),
        text,
        content_date: messages.iter().find_map(|m| m.cleaned().content_date.clone()),
        source_name: messages
            .first()
            .map(|m| m.extraction().source_name.clone())
            .unwrap_or_default(),
        run_id: run_id.to_string(),
        created_at: now.to_string(),
        metadata: json!({
            "message_count": messages.len(),
            "user_count": count_role("user"),
            "assistant_count": count_role("assistant"),
            "tool_count": count_role("tool"),
            "total_cost_usd": total_cost,
            "models_used": models,
            "tools_used": tools,
            "first_timestamp": first,
            "last_timestamp": last,
            "duration_secs": duration_secs(first, last),
        }),
        role: None,
        message_index: None,
        ordinal: 0,
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let rows: Vec<StagedRow> = stage.warehouse().fetch(
        Table::Stage(4),
        stage.run_id,
        "session_id, message_index",
    )?;
    stage.counters.rows_in = rows.len() as u64;

    let now = stage.now();
    let batch_size = stage.batch_size();
    let mut batch = Vec::new();
    for (session_id, messages) in group_by_session(rows, |r| r.session_id()) {
        batch.push(conversation(&session_id, &messages, stage.run_id, &now));
        if batch.len() >= batch_size {
            stage.checkpoint()?;
            stage.write(Table::Stage(8), &batch)?;
            batch.clear();
        }
    }
    stage.write(Table::Stage(8), &batch)
}
