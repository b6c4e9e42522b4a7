//! Stage library
//!
//! Stages are described by a static table rather than looked up by table
//! name. Numbers are stable; the SPINE construction stages execute in the
//! order 8, 7, 6, 5 so every child stage can recompute its parent's id.

pub mod aggregate;
pub mod clean;
pub mod conversations;
pub mod discovery;
pub mod embedding;
pub mod emotion;
pub mod extract;
pub mod identity;
pub mod intent;
pub mod keywords;
pub mod messages;
pub mod promote;
pub mod relationships;
pub mod staging;
pub mod tokens;
pub mod turns;
pub mod validate;

use chrono::DateTime;

use crate::context::StageContext;
use crate::error::{Error, Result};
use crate::warehouse::{EntityRow, Level, Table};

pub type StageFn = fn(&mut StageContext<'_>) -> Result<()>;

pub struct StageDef {
    pub number: u8,
    pub name: &'static str,
    pub description: &'static str,
    /// Stage tables that must exist and hold rows for the run.
    pub inputs: &'static [u8],
    /// Stage tables read when present.
    pub optional_inputs: &'static [u8],
    /// `None` for discovery, which writes only a manifest.
    pub output: Option<Table>,
    pub run: StageFn,
}

pub static STAGES: [StageDef; 17] = [
    StageDef {
        number: 0,
        name: "discovery",
        description: "Sample source files and write an assessment manifest",
        inputs: &[],
        optional_inputs: &[],
        output: None,
        run: discovery::run,
    },
    StageDef {
        number: 1,
        name: "extract",
        description: "Parse session files into one row per record",
        inputs: &[],
        optional_inputs: &[],
        output: Some(Table::Stage(1)),
        run: extract::run,
    },
    StageDef {
        number: 2,
        name: "clean",
        description: "Normalise content, fingerprint and flag duplicates",
        inputs: &[1],
        optional_inputs: &[],
        output: Some(Table::Stage(2)),
        run: clean::run,
    },
    StageDef {
        number: 3,
        name: "identity",
        description: "Mint message entity ids",
        inputs: &[2],
        optional_inputs: &[],
        output: Some(Table::Stage(3)),
        run: identity::run,
    },
    StageDef {
        number: 4,
        name: "staging",
        description: "Harmonise identified messages into the SPINE input shape",
        inputs: &[3],
        optional_inputs: &[],
        output: Some(Table::Stage(4)),
        run: staging::run,
    },
    StageDef {
        number: 5,
        name: "tokens",
        description: "L1 tokens (and L4 sentences when enabled)",
        inputs: &[7],
        optional_inputs: &[],
        output: Some(Table::Stage(5)),
        run: tokens::run,
    },
    StageDef {
        number: 6,
        name: "turns",
        description: "L6 turns",
        inputs: &[7],
        optional_inputs: &[],
        output: Some(Table::Stage(6)),
        run: turns::run,
    },
    StageDef {
        number: 7,
        name: "messages",
        description: "L5 messages",
        inputs: &[4],
        optional_inputs: &[],
        output: Some(Table::Stage(7)),
        run: messages::run,
    },
    StageDef {
        number: 8,
        name: "conversations",
        description: "L8 conversations",
        inputs: &[4],
        optional_inputs: &[],
        output: Some(Table::Stage(8)),
        run: conversations::run,
    },
    StageDef {
        number: 9,
        name: "embedding",
        description: "Per-conversation embedding input metadata",
        inputs: &[8, 7],
        optional_inputs: &[],
        output: Some(Table::Stage(9)),
        run: embedding::run,
    },
    StageDef {
        number: 10,
        name: "intent",
        description: "Intent and task-type extraction for messages",
        inputs: &[7],
        optional_inputs: &[],
        output: Some(Table::Stage(10)),
        run: intent::run,
    },
    StageDef {
        number: 11,
        name: "emotion",
        description: "Emotion classification for messages",
        inputs: &[7],
        optional_inputs: &[],
        output: Some(Table::Stage(11)),
        run: emotion::run,
    },
    StageDef {
        number: 12,
        name: "keywords",
        description: "Top-N keywords per message",
        inputs: &[7],
        optional_inputs: &[],
        output: Some(Table::Stage(12)),
        run: keywords::run,
    },
    StageDef {
        number: 13,
        name: "relationships",
        description: "Parent/child and sequence relationships",
        inputs: &[7, 8],
        optional_inputs: &[6],
        output: Some(Table::Stage(13)),
        run: relationships::run,
    },
    StageDef {
        number: 14,
        name: "aggregate",
        description: "Union of all levels with enrichment columns",
        inputs: &[6, 7, 8],
        optional_inputs: &[5, 9, 10, 11, 12],
        output: Some(Table::Stage(14)),
        run: aggregate::run,
    },
    StageDef {
        number: 15,
        name: "validate",
        description: "Score and classify every aggregated entity",
        inputs: &[14],
        optional_inputs: &[],
        output: Some(Table::Stage(15)),
        run: validate::run,
    },
    StageDef {
        number: 16,
        name: "promote",
        description: "Promote validated entities into entity_unified",
        inputs: &[14, 15],
        optional_inputs: &[],
        output: Some(Table::EntityUnified),
        run: promote::run,
    },
];

pub const EXECUTION_ORDER: [u8; 17] = [0, 1, 2, 3, 4, 8, 7, 6, 5, 9, 10, 11, 12, 13, 14, 15, 16];

pub fn stage(number: u8) -> Option<&'static StageDef> {
    STAGES.get(number as usize)
}

fn position(number: u8) -> Option<usize> {
    EXECUTION_ORDER.iter().position(|&n| n == number)
}

/// The stage that runs immediately before `number`.
pub fn predecessor(number: u8) -> Option<u8> {
    position(number)
        .filter(|&p| p > 0)
        .map(|p| EXECUTION_ORDER[p - 1])
}

/// Contiguous slice of the execution order from `from` to `to`, inclusive.
pub fn window(from: Option<u8>, to: Option<u8>) -> Result<Vec<u8>> {
    let locate = |n: u8| {
        position(n).ok_or_else(|| Error::Config(format!("there is no stage {}", n)))
    };
    let start = from.map(locate).transpose()?.unwrap_or(0);
    let end = to
        .map(locate)
        .transpose()?
        .unwrap_or(EXECUTION_ORDER.len() - 1);
    if start > end {
        return Err(Error::Config(format!(
            "stage {} runs after stage {}",
            EXECUTION_ORDER[start], EXECUTION_ORDER[end]
        )));
    }
    Ok(EXECUTION_ORDER[start..=end].to_vec())
}

// ============================================
// HELPERS SHARED BY STAGE BODIES
// ============================================

/// `YYYY-MM-DD` of an RFC 3339 timestamp.
pub(crate) fn content_date(timestamp: Option<&str>) -> Option<String> {
    timestamp
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.naive_utc().date().format("%Y-%m-%d").to_string())
}

/// Entity rows of one level table for the run, in session order.
pub(crate) fn fetch_entities(stage: &StageContext<'_>, number: u8) -> Result<Vec<EntityRow>> {
    stage.warehouse().fetch(
        Table::Stage(number),
        stage.run_id,
        "session_id, message_index, ordinal, entity_id",
    )
}

/// Messages of one session in order, grouped from a flat ordered list.
pub(crate) fn group_by_session<T, F>(rows: Vec<T>, key: F) -> Vec<(String, Vec<T>)>
where
    F: Fn(&T) -> &str,
{
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    for row in rows {
        let session = key(&row).to_string();
        match groups.last_mut() {
            Some((current, members)) if *current == session => members.push(row),
            _ => groups.push((session, vec![row])),
        }
    }
    groups
}

/// Roles whose entities may legitimately carry empty text.
pub(crate) fn is_exempt_role(role: Option<&str>) -> bool {
    matches!(role, Some("tool") | Some("summary"))
}

pub(crate) fn level_fingerprint(session_id: &str, level: Level, text: &str) -> String {
    crate::mint::fingerprint(session_id, level.name(), text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_number() {
        for (i, def) in STAGES.iter().enumerate() {
            assert_eq!(def.number as usize, i);
        }
    }

    #[test]
    fn test_spine_construction_runs_top_down() {
        assert_eq!(predecessor(8), Some(4));
        assert_eq!(predecessor(7), Some(8));
        assert_eq!(predecessor(6), Some(7));
        assert_eq!(predecessor(5), Some(6));
        assert_eq!(predecessor(9), Some(5));
        assert_eq!(predecessor(0), None);
    }

    #[test]
    fn test_inputs_always_run_earlier() {
        for def in STAGES.iter() {
            let me = position(def.number).unwrap();
            for input in def.inputs.iter().chain(def.optional_inputs) {
                assert!(position(*input).unwrap() < me, "stage {} reads {}", def.number, input);
            }
        }
    }

    #[test]
    fn test_window() {
        assert_eq!(window(Some(7), Some(5)).unwrap(), vec![7, 6, 5]);
        assert_eq!(window(None, None).unwrap().len(), 17);
        assert_eq!(window(Some(15), None).unwrap(), vec![15, 16]);
        assert!(window(Some(5), Some(7)).is_err());
        assert!(window(Some(17), None).is_err());
    }

    #[test]
    fn test_content_date() {
        assert_eq!(
            content_date(Some("2024-05-01T23:30:00-02:00")).as_deref(),
            Some("2024-05-02")
        );
        assert_eq!(content_date(Some("garbage")), None);
        assert_eq!(content_date(None), None);
    }

    #[test]
    fn test_group_by_session_keeps_order() {
        let rows = vec![("a", 1), ("a", 2), ("b", 1)];
        let groups = group_by_session(rows, |r| r.0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "b");
    }
}
