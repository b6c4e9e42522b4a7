//! Rollback engine
//!
//! Removes every row a run wrote. Planning is read-only and tolerates tables
//! that were never created, so a run that failed halfway can still be
//! rolled back. `entity_unified` is only touched on explicit request.

use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::ledger::{Event, RunTracker, Status};
use crate::warehouse::{Table, TableName, Warehouse};

/// One table with rows tagged by the run.
#[derive(Debug, Clone)]
pub struct RollbackTarget {
    pub table: Table,
    pub name: TableName,
    pub rows: u64,
}

#[derive(Debug, Clone)]
pub struct RollbackPlan {
    pub run_id: String,
    /// `None` rolls back every stage.
    pub stage: Option<u8>,
    pub targets: Vec<RollbackTarget>,
    /// Tables in scope that do not exist.
    pub absent: Vec<String>,
}

impl RollbackPlan {
    pub fn total_rows(&self) -> u64 {
        self.targets.iter().map(|t| t.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

/// Tables in scope: one stage's output and DLQ, or every stage's.
fn scope(stage: Option<u8>, rollback_promoted: bool) -> Vec<Table> {
    let mut tables = Vec::new();
    let stages: Vec<u8> = match stage {
        Some(n) => vec![n],
        None => (0..=16).collect(),
    };
    for n in stages {
        if Table::STAGES_WITH_TABLES.contains(&n) {
            tables.push(Table::Stage(n));
        }
        if n >= 1 {
            tables.push(Table::Dlq(n));
        }
    }
    if rollback_promoted || stage == Some(16) {
        tables.push(Table::EntityUnified);
    }
    tables
}

/// Count what a rollback would delete. Writes nothing.
pub fn plan(
    warehouse: &Warehouse,
    run_id: &str,
    stage: Option<u8>,
    rollback_promoted: bool,
) -> Result<RollbackPlan> {
    let mut plan = RollbackPlan {
        run_id: run_id.to_string(),
        stage,
        targets: Vec::new(),
        absent: Vec::new(),
    };
    for table in scope(stage, rollback_promoted) {
        let name = warehouse.name(table)?;
        if !warehouse.exists(table)? {
            plan.absent.push(name.to_string());
            continue;
        }
        let rows = warehouse.count_rows(table, Some(run_id))?;
        plan.targets.push(RollbackTarget { table, name, rows });
    }
    Ok(plan)
}

/// Delete the planned rows and append a reversal event to the ledger.
/// Returns the number of rows removed.
pub fn execute(warehouse: &Warehouse, plan: &RollbackPlan) -> Result<u64> {
    let mut removed = 0u64;
    for target in plan.targets.iter().filter(|t| t.rows > 0) {
        let n = warehouse.delete_run(target.table, &plan.run_id)? as u64;
        info!(run_id = %plan.run_id, table = %target.name, removed = n, "rolled back");
        removed += n;
    }

    let detail = json!({
        "tables": plan
            .targets
            .iter()
            .filter(|t| t.rows > 0)
            .map(|t| t.name.to_string())
            .collect::<Vec<_>>(),
        "rows_removed": removed,
        "promoted_rows_removed": plan.targets.iter().any(|t| t.table == Table::EntityUnified && t.rows > 0),
    });
    RunTracker::new(warehouse)?.record(
        &plan.run_id,
        plan.stage,
        Event::Rollback,
        Some(Status::Success),
        None,
        Some(&detail.to_string()),
    )?;
    Ok(removed)
}
