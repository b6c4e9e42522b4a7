//! Stage executor: ordering check, preflight, DELETE-then-INSERT, ledger.

use serde_json::json;
use tracing::{error, info, warn};

use crate::context::{PipelineContext, StageContext};
use crate::error::{Error, Result};
use crate::ledger::{RunTracker, StageCounters, Status};
use crate::stages::{self, StageDef};
use crate::warehouse::Table;

/// Outcome of one executed stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: u8,
    pub name: &'static str,
    pub counters: StageCounters,
}

pub struct Executor<'a> {
    ctx: &'a PipelineContext,
    /// `None` in dry-run mode: nothing, not even ledger events, is written.
    tracker: Option<RunTracker<'a>>,
}

impl<'a> Executor<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Result<Self> {
        let tracker = if ctx.options.dry_run {
            None
        } else {
            Some(RunTracker::new(&ctx.warehouse)?)
        };
        Ok(Self { ctx, tracker })
    }

    pub fn begin_run(&self, run_id: Option<&str>, arguments: serde_json::Value) -> Result<String> {
        match &self.tracker {
            Some(tracker) => tracker.begin_run(run_id, &arguments),
            None => Ok(run_id
                .map(str::to_string)
                .unwrap_or_else(crate::mint::mint_run_id)),
        }
    }

    pub fn end_run(&self, run_id: &str, status: Status) -> Result<()> {
        match &self.tracker {
            Some(tracker) => tracker.end_run(run_id, status),
            None => Ok(()),
        }
    }

    /// Run one stage body through the full executor protocol.
    pub fn run_stage(&self, run_id: &str, number: u8) -> Result<StageReport> {
        let def = lookup(number)?;
        self.run_with(run_id, number, def.run).map(|(_, report)| report)
    }

    /// Like [`run_stage`](Self::run_stage) but with a caller-supplied body,
    /// so a driver can get the body's own result back.
    pub fn run_with<T, F>(&self, run_id: &str, number: u8, body: F) -> Result<(T, StageReport)>
    where
        F: FnOnce(&mut StageContext<'_>) -> Result<T>,
    {
        let def = lookup(number)?;
        self.check_order(run_id, def)?;
        self.preflight(run_id, def)?;
        if !self.ctx.options.dry_run {
            self.prepare_outputs(run_id, def)?;
        }

        if let Some(tracker) = &self.tracker {
            tracker.begin_stage(run_id, number)?;
        }
        info!(run_id, stage = number, name = def.name, dry_run = self.ctx.options.dry_run, "stage started");

        let mut stage = StageContext::new(self.ctx, run_id, number);
        let result = body(&mut stage).and_then(|value| {
            stage.flush_dead_letters()?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                let counters = stage.finish();
                let status = if self.ctx.options.dry_run {
                    Status::DryRun
                } else {
                    Status::Success
                };
                if let Some(tracker) = &self.tracker {
                    tracker.end_stage(run_id, number, &counters, status)?;
                }
                info!(
                    run_id,
                    stage = number,
                    rows_in = counters.rows_in,
                    rows_out = counters.rows_out,
                    rows_dlq = counters.rows_dlq,
                    warnings = counters.warnings,
                    elapsed_ms = counters.elapsed_ms,
                    "stage finished"
                );
                Ok((
                    value,
                    StageReport {
                        stage: number,
                        name: def.name,
                        counters,
                    },
                ))
            }
            Err(e) => {
                // partial output stays in place, tagged with the run id
                if let Err(flush) = stage.flush_dead_letters() {
                    warn!(run_id, stage = number, error = %flush, "could not flush dead letters");
                }
                let counters = stage.finish();
                let status = match e {
                    Error::Timeout { .. } => Status::Timeout,
                    _ => Status::Failed,
                };
                if let Some(tracker) = &self.tracker {
                    tracker.diagnostic(run_id, number, &e)?;
                    tracker.end_stage(run_id, number, &counters, status)?;
                }
                error!(run_id, stage = number, status = status.as_str(), error = %e, "stage failed");
                Err(e)
            }
        }
    }

    /// Run a contiguous window of the execution order.
    ///
    /// A dry run stops quietly at the first stage whose inputs were never
    /// materialised, since nothing upstream was written.
    pub fn run_pipeline(&self, run_id: &str, window: &[u8]) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(window.len());
        for &number in window {
            match self.run_stage(run_id, number) {
                Ok(report) => reports.push(report),
                Err(Error::InputMissing(detail)) if self.ctx.options.dry_run && !reports.is_empty() => {
                    info!(run_id, stage = number, %detail, "dry run stops: upstream stages were not written");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    fn check_order(&self, run_id: &str, def: &StageDef) -> Result<()> {
        if def.number <= 1 {
            return Ok(());
        }
        let Some(tracker) = &self.tracker else {
            return Ok(());
        };
        let Some(previous) = stages::predecessor(def.number) else {
            return Ok(());
        };
        if tracker.stage_succeeded(run_id, previous)? {
            Ok(())
        } else {
            Err(Error::OutOfOrder {
                stage: def.number,
                reason: format!(
                    "stage {} has no successful finish recorded for run {}",
                    previous, run_id
                ),
            })
        }
    }

    /// Required inputs exist and hold rows for the run.
    fn preflight(&self, run_id: &str, def: &StageDef) -> Result<()> {
        let warehouse = &self.ctx.warehouse;
        for &input in def.inputs {
            let table = Table::Stage(input);
            let name = warehouse.name(table)?;
            if !warehouse.exists(table)? {
                return Err(Error::InputMissing(format!(
                    "{} does not exist; run stage {} first",
                    name, input
                )));
            }
            if warehouse.count_rows(table, Some(run_id))? == 0 {
                return Err(Error::InputMissing(format!(
                    "{} has no rows for run {}",
                    name, run_id
                )));
            }
        }
        Ok(())
    }

    /// Create output tables and clear this run's previous attempt.
    fn prepare_outputs(&self, run_id: &str, def: &StageDef) -> Result<()> {
        let warehouse = &self.ctx.warehouse;
        let Some(output) = def.output else {
            return Ok(());
        };
        warehouse.ensure(output)?;
        warehouse.ensure(Table::Dlq(def.number))?;
        // promotion is keyed on entity_id across runs and never cleared here
        if output != Table::EntityUnified {
            let removed = warehouse.delete_run(output, run_id)?;
            if removed > 0 {
                info!(run_id, stage = def.number, removed, "cleared partial output from an earlier attempt");
            }
        }
        warehouse.delete_run(Table::Dlq(def.number), run_id)?;
        Ok(())
    }
}

fn lookup(number: u8) -> Result<&'static StageDef> {
    stages::stage(number).ok_or_else(|| Error::Config(format!("there is no stage {}", number)))
}

/// Arguments recorded on the run ledger.
pub fn invocation_arguments(ctx: &PipelineContext, window: &[u8]) -> serde_json::Value {
    json!({
        "stages": window,
        "source_dir": ctx.config.pipeline.source_dir,
        "batch_size": ctx.warehouse.batch_size(),
        "dry_run": ctx.options.dry_run,
        "include_warnings": ctx.options.include_warnings,
        "promote_with_orphans": ctx.options.promote_with_orphans,
        "strict": ctx.options.strict,
        "limit_files": ctx.options.limit_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WarehouseConfig};
    use crate::context::RunOptions;
    use crate::warehouse::{DeadLetterRow, Warehouse};

    fn context(dry_run: bool) -> PipelineContext {
        let warehouse = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        PipelineContext::new(
            Config::default(),
            warehouse,
            RunOptions {
                dry_run,
                ..RunOptions::default()
            },
        )
    }

    #[test]
    fn test_out_of_order_stage_is_refused() {
        let ctx = context(false);
        let executor = Executor::new(&ctx).unwrap();
        let err = executor.run_stage("r", 3).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { stage: 3, .. }));
    }

    #[test]
    fn test_failure_is_recorded_and_reraised() {
        let ctx = context(false);
        let executor = Executor::new(&ctx).unwrap();
        let err = executor
            .run_with("r", 1, |_stage| -> Result<()> {
                Err(Error::SchemaMismatch("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        let tracker = RunTracker::open_existing(&ctx.warehouse).unwrap();
        let events: Vec<(String, Option<String>)> = tracker
            .entries("r")
            .unwrap()
            .into_iter()
            .map(|e| (e.event, e.status))
            .collect();
        assert_eq!(events[1], ("diagnostic".to_string(), Some("failed".to_string())));
        assert_eq!(events[2], ("stage_finished".to_string(), Some("failed".to_string())));
        assert!(!tracker.stage_succeeded("r", 1).unwrap());
    }

    #[test]
    fn test_rerun_clears_previous_attempt() {
        let ctx = context(false);
        let executor = Executor::new(&ctx).unwrap();
        let dead = |stage: &mut StageContext<'_>| -> Result<()> {
            stage.dead_letter(Some("line".into()), &Error::ParseFailed("bad".into()))
        };
        executor.run_with("r", 1, dead).unwrap();
        executor.run_with("r", 1, dead).unwrap();
        let rows: Vec<DeadLetterRow> = ctx.warehouse.fetch(Table::Dlq(1), "r", "created_at").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_timeout_records_status() {
        let ctx = context(false);
        let executor = Executor::new(&ctx).unwrap();
        let err = executor
            .run_with("r", 1, |_stage| -> Result<()> {
                Err(Error::Timeout { stage: 1, budget_secs: 0 })
            })
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        let tracker = RunTracker::open_existing(&ctx.warehouse).unwrap();
        let last = tracker.entries("r").unwrap().pop().unwrap();
        assert_eq!(last.status.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_dry_run_writes_no_ledger() {
        let ctx = context(true);
        let executor = Executor::new(&ctx).unwrap();
        let run_id = executor.begin_run(None, json!({})).unwrap();
        executor.run_with(&run_id, 1, |_stage| Ok(())).unwrap();
        assert!(!ctx.warehouse.exists(Table::Ledger).unwrap());
        assert!(!ctx.warehouse.exists(Table::Stage(1)).unwrap());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let ctx = context(false);
        let executor = Executor::new(&ctx).unwrap();
        executor.run_with("r", 1, |_stage| Ok(())).unwrap();
        let err = executor.run_stage("r", 2).unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
