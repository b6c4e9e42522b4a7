//! S16 Promote: insert validated entities into `entity_unified`.

use tracing::info;

use crate::context::StageContext;
use crate::error::Result;
use crate::ledger::{Event, RunTracker, Status};
use crate::linkage::{self, Scope};
use crate::promotion::{self, PromotionCounters};
use crate::warehouse::Table;

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    execute(stage).map(|_| ())
}

/// Gate, plan and insert. Returns the promotion counters.
pub fn execute(stage: &mut StageContext<'_>) -> Result<PromotionCounters> {
    let warehouse = stage.warehouse();
    let options = stage.options();

    let report = linkage::check(warehouse, stage.run_id, Scope::Aggregate)?;
    if !report.is_clean() {
        if !options.promote_with_orphans {
            report.into_result()?;
        } else {
            for pair in report.pairs.iter().filter(|p| p.orphans > 0) {
                stage.warn(&format!("promoting despite orphans: {}", pair));
            }
        }
    }

    let plan = promotion::plan(warehouse, stage.run_id, options.include_warnings, &stage.now())?;
    let counters = plan.counters;
    stage.counters.rows_in = counters.promoted + counters.skipped_existing + counters.skipped_failed;
    stage.checkpoint()?;
    stage.write(Table::EntityUnified, &plan.rows)?;

    info!(
        run_id = stage.run_id,
        promoted = counters.promoted,
        skipped_existing = counters.skipped_existing,
        skipped_failed = counters.skipped_failed,
        "promotion finished"
    );
    if !stage.dry_run() {
        let detail = serde_json::to_string(&counters)?;
        RunTracker::new(warehouse)?.record(
            stage.run_id,
            Some(stage.stage),
            Event::Promotion,
            Some(Status::Success),
            None,
            Some(&detail),
        )?;
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WarehouseConfig};
    use crate::context::{PipelineContext, RunOptions};
    use crate::error::Error;
    use crate::warehouse::{
        AggregateRow, Enrichment, EntityRow, ValidationRow, ValidationStatus, Warehouse,
    };
    use serde_json::json;

    fn aggregate(id: &str, level: i64, parent: Option<&str>) -> AggregateRow {
        AggregateRow {
            entity: EntityRow {
                entity_id: id.into(),
                parent_id: parent.map(String::from),
                session_id: "s".into(),
                level,
                text: "some text".into(),
                content_date: None,
                source_name: "claude_code".into(),
                run_id: "r".into(),
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

    fn passed(id: &str, level: i64) -> ValidationRow {
        ValidationRow {
            entity_id: id.into(),
            level: Some(level),
            run_id: "r".into(),
            status: ValidationStatus::Passed,
            score: 1.0,
            errors: vec![],
            warnings: vec![],
            validated_at: "now".into(),
        }
    }

    fn context(options: RunOptions, message_parent: &str) -> PipelineContext {
        let wh = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        for table in [Table::Stage(14), Table::Stage(15), Table::EntityUnified] {
            wh.ensure(table).unwrap();
        }
        wh.append(
            Table::Stage(14),
            &[aggregate("c", 8, None), aggregate("m", 5, Some(message_parent))],
        )
        .unwrap();
        wh.append(Table::Stage(15), &[passed("c", 8), passed("m", 5)]).unwrap();
        PipelineContext::new(Config::default(), wh, options)
    }

    #[test]
    fn test_promotes_and_records_counters() {
        let ctx = context(RunOptions::default(), "c");
        let mut stage = StageContext::new(&ctx, "r", 16);
        let counters = execute(&mut stage).unwrap();
        assert_eq!(counters.promoted, 2);
        assert_eq!(ctx.warehouse.count_rows(Table::EntityUnified, None).unwrap(), 2);

        let entries = RunTracker::open_existing(&ctx.warehouse).unwrap().entries("r").unwrap();
        assert_eq!(entries.last().unwrap().event, "promotion");
    }

    #[test]
    fn test_orphans_block_promotion() {
        let ctx = context(RunOptions::default(), "missing");
        let mut stage = StageContext::new(&ctx, "r", 16);
        let err = execute(&mut stage).unwrap_err();
        assert!(matches!(err, Error::OrphanParent { count: 1, .. }));
        assert_eq!(ctx.warehouse.count_rows(Table::EntityUnified, None).unwrap(), 0);
    }

    #[test]
    fn test_orphans_can_be_overridden() {
        let options = RunOptions {
            promote_with_orphans: true,
            ..RunOptions::default()
        };
        let ctx = context(options, "missing");
        let mut stage = StageContext::new(&ctx, "r", 16);
        execute(&mut stage).unwrap();
        assert_eq!(stage.counters.warnings, 1);
        assert_eq!(ctx.warehouse.count_rows(Table::EntityUnified, None).unwrap(), 2);
    }
}
