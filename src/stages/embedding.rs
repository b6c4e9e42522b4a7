//! S9 Embedding inputs: per-conversation text prepared for an embedding
//! model. Vectors themselves are produced outside the pipeline.

use std::collections::HashMap;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint;
use crate::text::truncate_chars;
use crate::warehouse::{EmbeddingRow, EntityRow, Table};

use super::fetch_entities;

pub const EMBEDDING_MODEL: &str = "text-embedding-004";
pub const MAX_INPUT_CHARS: usize = 8000;

pub fn embedding_input(conversation: &EntityRow, messages: &[&EntityRow], run_id: &str, now: &str) -> EmbeddingRow {
    let joined = messages
        .iter()
        .map(|m| m.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let source = if joined.is_empty() { conversation.text.as_str() } else { joined.as_str() };
    let (input, truncated) = truncate_chars(source, MAX_INPUT_CHARS);
    EmbeddingRow {
        entity_id: conversation.entity_id.clone(),
        session_id: conversation.session_id.clone(),
        run_id: run_id.to_string(),
        embedding_input: input.to_string(),
        input_chars: input.chars().count() as i64,
        truncated,
        input_digest: mint::content_digest(input.as_bytes()),
        model: EMBEDDING_MODEL.to_string(),
        created_at: now.to_string(),
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let conversations = fetch_entities(stage, 8)?;
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = conversations.len() as u64;

    let mut by_session: HashMap<&str, Vec<&EntityRow>> = HashMap::new();
    for message in &messages {
        by_session.entry(message.session_id.as_str()).or_default().push(message);
    }

    let now = stage.now();
    let batch_size = stage.batch_size();
    let empty = Vec::new();
    for chunk in conversations.chunks(batch_size) {
        stage.checkpoint()?;
        let rows: Vec<EmbeddingRow> = chunk
            .iter()
            .map(|conversation| {
                let members = by_session.get(conversation.session_id.as_str()).unwrap_or(&empty);
                embedding_input(conversation, members, stage.run_id, &now)
            })
            .collect();
        stage.write(Table::Stage(9), &rows)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(level: i64, text: &str) -> EntityRow {
        EntityRow {
            entity_id: format!("e{level}"),
            parent_id: None,
            session_id: "s".into(),
            level,
            text: text.into(),
            content_date: None,
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: None,
            metadata: json!({}),
            role: None,
            message_index: None,
            ordinal: 0,
        }
    }

    #[test]
    fn test_input_joins_and_truncates() {
        let conversation = entity(8, "title");
        let long = "x".repeat(MAX_INPUT_CHARS);
        let a = entity(5, "hello");
        let b = entity(5, &long);
        let row = embedding_input(&conversation, &[&a, &b], "r", "now");
        assert!(row.truncated);
        assert_eq!(row.input_chars, MAX_INPUT_CHARS as i64);
        assert!(row.embedding_input.starts_with("hello\n"));
        assert_eq!(row.model, EMBEDDING_MODEL);
    }

    #[test]
    fn test_falls_back_to_conversation_text() {
        let conversation = entity(8, "session s");
        let row = embedding_input(&conversation, &[], "r", "now");
        assert_eq!(row.embedding_input, "session s");
        assert!(!row.truncated);
    }
}
