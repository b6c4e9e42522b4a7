//! S7 Messages: one L5 entity per staged message, parented to its L8.

use serde_json::json;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint;
use crate::warehouse::{EntityRow, Level, StagedRow, Table};

use super::group_by_session;

pub fn message(staged: &StagedRow, ordinal: usize, conversation_id: &str, run_id: &str, now: &str) -> EntityRow {
    let extraction = staged.extraction();
    let cleaned = staged.cleaned();
    EntityRow {
        entity_id: staged.identity.entity_id.clone(),
        // recomputed, never read back from stage_8
        parent_id: Some(conversation_id.to_string()),
        session_id: extraction.session_id.clone(),
        level: Level::Message.as_i64(),
        text: cleaned.content_cleaned.clone(),
        content_date: cleaned.content_date.clone(),
        source_name: extraction.source_name.clone(),
        run_id: run_id.to_string(),
        created_at: now.to_string(),
        fingerprint: Some(cleaned.fingerprint.clone()),
        metadata: json!({
            "message_type": extraction.message_type,
            "timestamp_utc": extraction.timestamp_utc,
            "model": extraction.model,
            "cost_usd": extraction.cost_usd,
            "tool_name": extraction.tool_name,
            "word_count": cleaned.word_count,
            "content_length": cleaned.content_length,
            "extraction_id": extraction.extraction_id,
        }),
        role: Some(extraction.role.clone()),
        message_index: Some(extraction.message_index),
        ordinal: ordinal as i64,
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
    for (session_id, messages) in group_by_session(rows, |r| r.session_id()) {
        stage.checkpoint()?;
        let conversation_id = mint::mint_conversation_id(&session_id);
        let entities: Vec<EntityRow> = messages
            .iter()
            .enumerate()
            .map(|(ordinal, staged)| message(staged, ordinal, &conversation_id, stage.run_id, &now))
            .collect();
        stage.write(Table::Stage(7), &entities)?;
    }
    Ok(())
}
