//! Status command implementation: read the run ledger back.

use anyhow::Result;

use crate::ledger::{LedgerEntry, RunTracker};
use crate::stages;
use crate::warehouse::Warehouse;

fn counter(entry: &LedgerEntry, key: &str) -> String {
    entry
        .counters
        .as_ref()
        .and_then(|c| c.get(key))
        .and_then(|v| v.as_u64())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn run(warehouse: &Warehouse, run_id: Option<&str>, limit: usize) -> Result<()> {
    let tracker = RunTracker::open_existing(warehouse)?;
    match run_id {
        Some(run_id) => show_run(&tracker, run_id),
        None => list_runs(&tracker, limit),
    }
}

fn list_runs(tracker: &RunTracker<'_>, limit: usize) -> Result<()> {
    let runs = tracker.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!("{:<26} {:<28} {:<10}", "Run", "Started", "Status");
    println!("{}", "-".repeat(66));
    for (run_id, started, status) in runs {
        println!(
            "{:<26} {:<28} {:<10}",
            run_id,
            started,
            status.unwrap_or_else(|| "running".to_string())
        );
    }
    Ok(())
}

fn show_run(tracker: &RunTracker<'_>, run_id: &str) -> Result<()> {
    let entries = tracker.entries(run_id)?;
    if entries.is_empty() {
        println!("No ledger entries for run {}.", run_id);
        return Ok(());
    }
    println!("Run {}\n", run_id);
    println!(
        "{:<6} {:<15} {:<10} {:>9} {:>9} {:>6} {:>6} {:>9}",
        "Stage", "Name", "Status", "In", "Out", "DLQ", "Warn", "ms"
    );
    println!("{}", "-".repeat(77));

    // latest finish per stage, in execution order
    for number in stages::EXECUTION_ORDER {
        let Some(entry) = entries
            .iter()
            .rev()
            .find(|e| e.stage == Some(i64::from(number)) && e.event == "stage_finished")
        else {
            continue;
        };
        let name = stages::stage(number).map_or("?", |d| d.name);
        println!(
            "{:<6} {:<15} {:<10} {:>9} {:>9} {:>6} {:>6} {:>9}",
            number,
            name,
            entry.status.as_deref().unwrap_or("-"),
            counter(entry, "rows_in"),
            counter(entry, "rows_out"),
            counter(entry, "rows_dlq"),
            counter(entry, "warnings"),
            counter(entry, "elapsed_ms"),
        );
    }

    println!();
    for entry in &entries {
        match entry.event.as_str() {
            "diagnostic" | "promotion" | "rollback" => println!(
                "{}  {:<10} stage {:<4} {}",
                entry.recorded_at,
                entry.event,
                entry.stage.map_or("-".to_string(), |s| s.to_string()),
                entry.detail.as_deref().unwrap_or("")
            ),
            "run_finished" => println!(
                "{}  run finished: {}",
                entry.recorded_at,
                entry.status.as_deref().unwrap_or("-")
            ),
            _ => {}
        }
    }
    Ok(())
}
