//! S13 Relationships: parent/child, sequence and reply links between
//! entities, followed by a warning-mode linkage check.

use crate::context::StageContext;
use crate::error::Result;
use crate::linkage::{self, Scope};
use crate::mint;
use crate::warehouse::{EntityRow, RelationshipRow, Table};

use super::{fetch_entities, group_by_session};

pub const PARENT_CHILD: &str = "parent_child";
pub const NEXT_IN_SESSION: &str = "next_in_session";
pub const RESPONSE_TO: &str = "response_to";

fn link(source: &str, target: &str, kind: &str, session_id: &str, run_id: &str, now: &str) -> RelationshipRow {
    RelationshipRow {
        relationship_id: mint::mint_relationship_id(source, target, kind),
        source_id: source.to_string(),
        target_id: target.to_string(),
        kind: kind.to_string(),
        session_id: session_id.to_string(),
        run_id: run_id.to_string(),
        created_at: now.to_string(),
    }
}

/// `parent_child` links, source = parent.
pub fn parent_links(children: &[EntityRow], run_id: &str, now: &str) -> Vec<RelationshipRow> {
    children
        .iter()
        .filter_map(|child| {
            child
                .parent_id
                .as_deref()
                .map(|parent| link(parent, &child.entity_id, PARENT_CHILD, &child.session_id, run_id, now))
        })
        .collect()
}

/// Sequence and reply links within one session's ordered messages.
pub fn session_links(messages: &[EntityRow], run_id: &str, now: &str) -> Vec<RelationshipRow> {
    let mut out = Vec::new();
    for pair in messages.windows(2) {
        out.push(link(
            &pair[0].entity_id,
            &pair[1].entity_id,
            NEXT_IN_SESSION,
            &pair[1].session_id,
            run_id,
            now,
        ));
    }
    let mut last_user: Option<&EntityRow> = None;
    for message in messages {
        match message.role.as_deref() {
            Some("user") => last_user = Some(message),
            Some("assistant") => {
                if let Some(user) = last_user {
                    out.push(link(
                        &message.entity_id,
                        &user.entity_id,
                        RESPONSE_TO,
                        &message.session_id,
                        run_id,
                        now,
                    ));
                }
            }
            _ => {}
        }
    }
    out
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let messages = fetch_entities(stage, 7)?;
    let turns = if stage.warehouse().exists(Table::Stage(6))? {
        fetch_entities(stage, 6)?
    } else {
        Vec::new()
    };
    stage.counters.rows_in = (messages.len() + turns.len()) as u64;

    let now = stage.now();
    let run_id = stage.run_id;
    stage.write(Table::Stage(13), &parent_links(&messages, run_id, &now))?;
    stage.write(Table::Stage(13), &parent_links(&turns, run_id, &now))?;
    for (_, members) in group_by_session(messages, |m| m.session_id.as_str()) {
        stage.checkpoint()?;
        stage.write(Table::Stage(13), &session_links(&members, run_id, &now))?;
    }

    if stage.dry_run() {
        return Ok(());
    }
    let report = linkage::check(stage.warehouse(), run_id, Scope::LevelTables)?;
    for pair in report.pairs.iter().filter(|p| p.orphans > 0) {
        stage.warn(&format!("linkage: {}", pair));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str, role: &str) -> EntityRow {
        EntityRow {
            entity_id: id.into(),
            parent_id: Some("conv".into()),
            session_id: "s".into(),
            level: 5,
            text: "x".into(),
            content_date: None,
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: None,
            metadata: json!({}),
            role: Some(role.into()),
            message_index: None,
            ordinal: 0,
        }
    }

    #[test]
    fn test_parent_links_point_down() {
        let links = parent_links(&[message("m1", "user")], "r", "now");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].source_id, "conv");
        assert_eq!(links[0].target_id, "m1");
        assert_eq!(links[0].kind, PARENT_CHILD);
    }

    #[test]
    fn test_session_links() {
        let messages = vec![
            message("u1", "user"),
            message("a1", "assistant"),
            message("t1", "tool"),
            message("a2", "assistant"),
            message("u2", "user"),
        ];
        let links = session_links(&messages, "r", "now");
        let next: Vec<_> = links.iter().filter(|l| l.kind == NEXT_IN_SESSION).collect();
        assert_eq!(next.len(), 4);
        let replies: Vec<(&str, &str)> = links
            .iter()
            .filter(|l| l.kind == RESPONSE_TO)
            .map(|l| (l.source_id.as_str(), l.target_id.as_str()))
            .collect();
        assert_eq!(replies, vec![("a1", "u1"), ("a2", "u1")]);
    }

    #[test]
    fn test_relationship_ids_are_distinct_per_kind() {
        let a = link("x", "y", NEXT_IN_SESSION, "s", "r", "now");
        let b = link("x", "y", RESPONSE_TO, "s", "r", "now");
        assert_ne!(a.relationship_id, b.relationship_id);
    }
}
