//! Rollback command implementation

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::error::Error;
use crate::rollback;
use crate::warehouse::Warehouse;

/// Print the plan, ask for confirmation unless `confirm`, then delete.
pub fn run<R: BufRead>(
    warehouse: &Warehouse,
    run_id: &str,
    stage: Option<u8>,
    rollback_promoted: bool,
    confirm: bool,
    mut input: R,
) -> Result<()> {
    let plan = rollback::plan(warehouse, run_id, stage, rollback_promoted)?;

    match stage {
        Some(n) => println!("⏪ Rollback of stage {} for run {}\n", n, run_id),
        None => println!("⏪ Rollback of run {}\n", run_id),
    }
    for target in &plan.targets {
        if target.rows > 0 {
            println!("   delete {:>8} row(s) from {}", target.rows, target.name);
        } else {
            println!("   keep   {:>8}        {} (no rows for this run)", "", target.name);
        }
    }
    for name in &plan.absent {
        println!("   skip   {:>8}        {} (does not exist)", "", name);
    }
    if !rollback_promoted && stage != Some(16) {
        println!("   keep   {:>8}        entity_unified (pass --rollback-promoted to remove promoted rows)", "");
    }

    if plan.is_empty() {
        println!("\nNothing to roll back.");
        return Ok(());
    }

    if !confirm {
        print!("\nDelete {} row(s)? Type 'yes' to continue: ", plan.total_rows());
        std::io::stdout().flush()?;
        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if answer.trim() != "yes" {
            return Err(Error::Cancelled(format!("rollback of run {} was not confirmed", run_id)).into());
        }
    }

    let removed = rollback::execute(warehouse, &plan)?;
    println!("\n✅ Removed {} row(s) for run {}", removed, run_id);
    Ok(())
}
