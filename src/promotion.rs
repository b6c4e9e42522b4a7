//! Promotion gate
//!
//! Decides which validated entities of a run enter `entity_unified`. A row
//! is promoted when its validation status is in the promote set and its
//! `entity_id` is not already present from any earlier run.

use rusqlite::params;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::Result;
use crate::warehouse::{AggregateRow, Table, TableRow, UnifiedRow, ValidationStatus, Warehouse};

/// Statuses eligible for promotion.
pub fn promote_set(include_warnings: bool) -> &'static [ValidationStatus] {
    if include_warnings {
        &[ValidationStatus::Passed, ValidationStatus::Warning]
    } else {
        &[ValidationStatus::Passed]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionCounters {
    pub promoted: u64,
    pub skipped_existing: u64,
    pub skipped_failed: u64,
}

/// Rows to insert plus the counters describing the decision.
#[derive(Debug, Default)]
pub struct PromotionPlan {
    pub rows: Vec<UnifiedRow>,
    pub counters: PromotionCounters,
}

/// Aggregated rows of the run joined with their verdicts.
fn candidates(warehouse: &Warehouse, run_id: &str) -> Result<Vec<(AggregateRow, ValidationStatus, f64)>> {
    let aggregate = warehouse.name(Table::Stage(14))?;
    let validation = warehouse.name(Table::Stage(15))?;
    let select = AggregateRow::columns()
        .iter()
        .map(|c| format!("a.{c} AS {c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {select}, v.validation_status AS validation_status, v.score AS validation_score
         FROM {aggregate} a
         JOIN {validation} v
           ON v.run_id = a.run_id AND v.entity_id = a.entity_id AND v.level = a.level
         WHERE a.run_id = ?1
         ORDER BY a.level DESC, a.session_id, a.message_index, a.ordinal, a.entity_id"
    );

    let mut out = Vec::new();
    warehouse.fetch_stream(&sql, params![run_id], |row| {
        let status: String = row.get("validation_status")?;
        // an unknown status never qualifies
        let status = ValidationStatus::parse(&status).unwrap_or(ValidationStatus::Failed);
        out.push((AggregateRow::from_row(row)?, status, row.get("validation_score")?));
        Ok(())
    })?;
    Ok(out)
}

/// Entity ids of this run that some run already promoted.
fn already_promoted(warehouse: &Warehouse, run_id: &str) -> Result<HashSet<String>> {
    if !warehouse.exists(Table::EntityUnified)? {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT u.entity_id FROM {} u
         WHERE EXISTS (SELECT 1 FROM {} a WHERE a.run_id = ?1 AND a.entity_id = u.entity_id)",
        warehouse.name(Table::EntityUnified)?,
        warehouse.name(Table::Stage(14))?
    );
    let ids = warehouse.column_values(&sql, vec![run_id.to_string().into()])?;
    Ok(ids.into_iter().collect())
}

/// Work out what a promotion of `run_id` would insert. Reads only.
pub fn plan(warehouse: &Warehouse, run_id: &str, include_warnings: bool, now: &str) -> Result<PromotionPlan> {
    let eligible = promote_set(include_warnings);
    let mut seen = already_promoted(warehouse, run_id)?;
    let mut plan = PromotionPlan::default();

    for (aggregate, status, score) in candidates(warehouse, run_id)? {
        if !eligible.contains(&status) {
            plan.counters.skipped_failed += 1;
            continue;
        }
        if !seen.insert(aggregate.entity.entity_id.clone()) {
            plan.counters.skipped_existing += 1;
            continue;
        }
        plan.rows.push(UnifiedRow {
            aggregate,
            validation_status: status,
            validation_score: score,
            promoted_at: now.to_string(),
        });
    }
    plan.counters.promoted = plan.rows.len() as u64;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::warehouse::{Enrichment, EntityRow, ValidationRow};
    use serde_json::json;

    fn aggregate(id: &str, run_id: &str) -> AggregateRow {
        AggregateRow {
            entity: EntityRow {
                entity_id: id.into(),
                parent_id: None,
                session_id: "s".into(),
                level: 8,
                text: "a conversation".into(),
                content_date: None,
                source_name: "claude_code".into(),
                run_id: run_id.into(),
                created_at: "now".into(),
                fingerprint: None,
                metadata: json!({}),
                role: None,
                message_index: None,
                ordinal: 0,
            },
            enrichment: Enrichment::default(),
        }
    }

    fn verdict(id: &str, run_id: &str, status: ValidationStatus) -> ValidationRow {
        ValidationRow {
            entity_id: id.into(),
            level: Some(8),
            run_id: run_id.into(),
            status,
            score: 1.0,
            errors: vec![],
            warnings: vec![],
            validated_at: "now".into(),
        }
    }

    fn warehouse(run_id: &str) -> Warehouse {
        let wh = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        for table in [Table::Stage(14), Table::Stage(15), Table::EntityUnified] {
            wh.ensure(table).unwrap();
        }
        wh.append(
            Table::Stage(14),
            &[aggregate("p", run_id), aggregate("w", run_id), aggregate("f", run_id)],
        )
        .unwrap();
        wh.append(
            Table::Stage(15),
            &[
                verdict("p", run_id, ValidationStatus::Passed),
                verdict("w", run_id, ValidationStatus::Warning),
                verdict("f", run_id, ValidationStatus::Failed),
            ],
        )
        .unwrap();
        wh
    }

    #[test]
    fn test_only_passed_by_default() {
        let wh = warehouse("r");
        let plan = plan(&wh, "r", false, "now").unwrap();
        let ids: Vec<&str> = plan.rows.iter().map(|r| r.aggregate.entity.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p"]);
        assert_eq!(
            plan.counters,
            PromotionCounters {
                promoted: 1,
                skipped_existing: 0,
                skipped_failed: 2,
            }
        );
    }

    #[test]
    fn test_warnings_on_request() {
        let wh = warehouse("r");
        let plan = plan(&wh, "r", true, "now").unwrap();
        assert_eq!(plan.counters.promoted, 2);
        assert!(plan.rows.iter().all(|r| r.validation_status != ValidationStatus::Failed));
    }

    #[test]
    fn test_existing_ids_are_skipped() {
        let wh = warehouse("r");
        let first = plan(&wh, "r", false, "now").unwrap();
        wh.append(Table::EntityUnified, &first.rows).unwrap();

        let again = plan(&wh, "r", false, "later").unwrap();
        assert!(again.rows.is_empty());
        assert_eq!(again.counters.skipped_existing, 1);
    }
}
