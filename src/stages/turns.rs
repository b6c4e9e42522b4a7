//! S6 Turns: group each session's L5 messages into L6 turns.
//!
//! A turn opens at the first message of a session and at every user message
//! that follows a non-user message. Tool output and assistant replies stay
//! in the turn of the prompt that caused them.

use serde_json::json;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint::{self, ChildKind};
use crate::warehouse::{EntityRow, Level, Table};

use super::{fetch_entities, group_by_session, level_fingerprint};

/// Split one session's messages into turns, keeping order.
pub fn split_turns(messages: &[EntityRow]) -> Vec<&[EntityRow]> {
    let mut turns = Vec::new();
    let mut start = 0;
    for i in 1..messages.len() {
        let opens = messages[i].role.as_deref() == Some("user")
            && messages[i - 1].role.as_deref() != Some("user");
        if opens {
            turns.push(&messages[start..i]);
            start = i;
        }
    }
    if start < messages.len() {
        turns.push(&messages[start..]);
    }
    turns
}

pub fn turn(members: &[EntityRow], index: usize, conversation_id: &str, run_id: &str, now: &str) -> EntityRow {
    let first = &members[0];
    let joined: Vec<&str> = members
        .iter()
        .map(|m| m.text.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    let text = if joined.is_empty() {
        format!("turn {}", index)
    } else {
        joined.join("\n")
    };
    EntityRow {
        entity_id: mint::mint_child_id(ChildKind::Turn, conversation_id, index as i64),
        parent_id: Some(conversation_id.to_string()),
        session_id: first.session_id.clone(),
        level: Level::Turn.as_i64(),
        fingerprint: Some(level_fingerprint(&first.session_id, Level::Turn, &text)),
        text,
        content_date: members.iter().find_map(|m| m.content_date.clone()),
        source_name: first.source_name.clone(),
        run_id: run_id.to_string(),
        created_at: now.to_string(),
        metadata: json!({
            "message_ids": members.iter().map(|m| m.entity_id.as_str()).collect::<Vec<_>>(),
            "roles": members.iter().map(|m| m.role.as_deref()).collect::<Vec<_>>(),
            "message_count": members.len(),
        }),
        role: None,
        message_index: first.message_index,
        ordinal: index as i64,
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = messages.len() as u64;

    let now = stage.now();
    for (session_id, members) in group_by_session(messages, |m| m.session_id.as_str()) {
        stage.checkpoint()?;
        let conversation_id = mint::mint_conversation_id(&session_id);
        let rows: Vec<EntityRow> = split_turns(&members)
            .into_iter()
            .enumerate()
            .map(|(index, slice)| turn(slice, index, &conversation_id, stage.run_id, &now))
            .collect();
        stage.write(Table::Stage(6), &rows)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, text: &str) -> EntityRow {
        EntityRow {
            entity_id: format!("{role}-{text}"),
            parent_id: Some("c".into()),
            session_id: "s".into(),
            level: 5,
            text: text.into(),
            content_date: None,
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: None,
            metadata: json!({}),
            role: Some(role.into()),
            message_index: Some(0),
            ordinal: 0,
        }
    }

    #[test]
    fn test_turn_boundaries() {
        let messages = vec![
            msg("user", "a"),
            msg("user", "b"),
            msg("assistant", "c"),
            msg("tool", "d"),
            msg("user", "e"),
            msg("assistant", "f"),
        ];
        let turns = split_turns(&messages);
        let sizes: Vec<usize> = turns.iter().map(|t| t.len()).collect();
        assert_eq!(sizes, vec![4, 2]);
    }

    #[test]
    fn test_session_opening_with_assistant() {
        let messages = vec![msg("assistant", "a"), msg("user", "b")];
        assert_eq!(split_turns(&messages).len(), 2);
        assert!(split_turns(&[]).is_empty());
    }

    #[test]
    fn test_turn_text_and_ids() {
        let messages = vec![msg("user", "hello world"), msg("assistant", "")];
        let row = turn(&messages, 0, "conv", "r", "now");
        assert_eq!(row.text, "hello world");
        assert_eq!(row.parent_id.as_deref(), Some("conv"));
        assert_eq!(row.entity_id, mint::mint_child_id(ChildKind::Turn, "conv", 0));
        assert_eq!(row.metadata["message_count"], 2);

        let empty = vec![msg("tool", "")];
        assert_eq!(turn(&empty, 3, "conv", "r", "now").text, "turn 3");
    }
}
