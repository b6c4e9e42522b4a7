//! S5 Tokens: L1 tokens for every L5 message, and L4 sentences when
//! `pipeline.emit_sentences` is on. Both levels land in `stage_5`.

use serde_json::json;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint::{self, ChildKind};
use crate::text::{self, Token};
use crate::warehouse::{EntityRow, Level, Table};

use super::{fetch_entities, level_fingerprint};

fn child(
    parent: &EntityRow,
    level: Level,
    entity_id: String,
    text: String,
    ordinal: usize,
    run_id: &str,
    now: &str,
) -> EntityRow {
    EntityRow {
        entity_id,
        parent_id: Some(parent.entity_id.clone()),
        session_id: parent.session_id.clone(),
        level: level.as_i64(),
        fingerprint: Some(level_fingerprint(&parent.session_id, level, &text)),
        text,
        content_date: parent.content_date.clone(),
        source_name: parent.source_name.clone(),
        run_id: run_id.to_string(),
        created_at: now.to_string(),
        metadata: json!({}),
        role: None,
        message_index: parent.message_index,
        ordinal: ordinal as i64,
    }
}

fn token_rows(parent: &EntityRow, body: &str, run_id: &str, now: &str, out: &mut Vec<EntityRow>) {
    for (index, Token { text, offset, pos, lemma, is_stop }) in text::tokenize(body).into_iter().enumerate() {
        let id = mint::mint_child_id(ChildKind::Token, &parent.entity_id, index as i64);
        let mut row = child(parent, Level::Token, id, text, index, run_id, now);
        row.metadata = json!({
            "pos": pos.as_str(),
            "lemma": lemma,
            "is_stop": is_stop,
            "offset": offset,
        });
        out.push(row);
    }
}

/// Every L4/L1 row derived from one message.
pub fn decompose(message: &EntityRow, emit_sentences: bool, run_id: &str, now: &str) -> Vec<EntityRow> {
    let mut out = Vec::new();
    if !emit_sentences {
        token_rows(message, &message.text, run_id, now, &mut out);
        return out;
    }
    for (index, sentence) in text::split_sentences(&message.text).into_iter().enumerate() {
        let id = mint::mint_child_id(ChildKind::Sentence, &message.entity_id, index as i64);
        let row = child(message, Level::Sentence, id, sentence, index, run_id, now);
        let mut tokens = Vec::new();
        token_rows(&row, &row.text, run_id, now, &mut tokens);
        out.push(row);
        out.append(&mut tokens);
    }
    out
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = messages.len() as u64;

    let emit_sentences = stage.config().pipeline.emit_sentences;
    let batch_size = stage.batch_size();
    let now = stage.now();
    let mut batch = Vec::with_capacity(batch_size);
    for message in &messages {
        batch.extend(decompose(message, emit_sentences, stage.run_id, &now));
        if batch.len() >= batch_size {
            stage.checkpoint()?;
            stage.write(Table::Stage(5), &batch)?;
            batch.clear();
        }
    }
    stage.write(Table::Stage(5), &batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> EntityRow {
        EntityRow {
            entity_id: "m1".into(),
            parent_id: Some("c".into()),
            session_id: "s".into(),
            level: 5,
            text: text.into(),
            content_date: Some("2024-01-01".into()),
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: Some("f".into()),
            metadata: json!({}),
            role: Some("user".into()),
            message_index: Some(4),
            ordinal: 0,
        }
    }

    #[test]
    fn test_tokens_parent_to_message() {
        let rows = decompose(&message("hi!"), false, "r", "now");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.level == 1 && r.parent_id.as_deref() == Some("m1")));
        assert_eq!(rows[1].text, "!");
        assert_eq!(rows[1].metadata["pos"], "PUNCT");
        assert_eq!(rows[0].message_index, Some(4));
        assert_eq!(rows[0].entity_id.len(), mint::TOKEN_ID_WIDTH);
    }

    #[test]
    fn test_sentences_sit_between() {
        let rows = decompose(&message("One two. Three!"), true, "r", "now");
        let sentences: Vec<&EntityRow> = rows.iter().filter(|r| r.level == 4).collect();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].parent_id.as_deref(), Some("m1"));
        let first_sentence = &sentences[0].entity_id;
        assert!(rows
            .iter()
            .filter(|r| r.level == 1)
            .take(3)
            .all(|t| t.parent_id.as_ref() == Some(first_sentence)));
    }

    #[test]
    fn test_empty_message_has_no_tokens() {
        assert!(decompose(&message(""), true, "r", "now").is_empty());
        assert!(decompose(&message(""), false, "r", "now").is_empty());
    }
}
