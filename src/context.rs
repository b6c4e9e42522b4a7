//! Explicit pipeline context handed from the executor into every stage.

use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::StageCounters;
use crate::llm::{HttpLanguageModel, LanguageModel};
use crate::warehouse::{DeadLetterRow, Table, TableRow, Warehouse};

/// Invocation flags shared by every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Count what would be written, write nothing.
    pub dry_run: bool,
    /// Promote WARNING rows as well as PASSED ones.
    pub include_warnings: bool,
    /// Promote even when the linkage validator finds orphans.
    pub promote_with_orphans: bool,
    /// Validation also fails rows lacking `content_date` or `fingerprint`.
    pub strict: bool,
    /// Extract at most this many files.
    pub limit_files: Option<usize>,
}

pub struct PipelineContext {
    pub config: Config,
    pub warehouse: Warehouse,
    pub options: RunOptions,
    pub llm: Option<Box<dyn LanguageModel>>,
}

impl PipelineContext {
    pub fn new(config: Config, warehouse: Warehouse, options: RunOptions) -> Self {
        Self {
            config,
            warehouse,
            options,
            llm: None,
        }
    }

    /// Open the configured warehouse and, when an API key is present, the
    /// language model client.
    pub fn open(config: Config, options: RunOptions) -> Result<Self> {
        let mut warehouse = Warehouse::open(&config)?;
        warehouse.set_batch_size(config.warehouse.batch_size);
        let llm = HttpLanguageModel::from_config(&config)?
            .map(|client| Box::new(client) as Box<dyn LanguageModel>);
        Ok(Self {
            config,
            warehouse,
            options,
            llm,
        })
    }

    pub fn with_llm(mut self, llm: Box<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Wall-clock budget for one stage.
    pub fn stage_budget(&self, stage: u8) -> Duration {
        let secs = match stage {
            10 | 11 => self.config.pipeline.enrichment_timeout_secs,
            _ => self.config.pipeline.stage_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Per-stage view of the run: counters, deadline and the DLQ buffer.
pub struct StageContext<'a> {
    pub ctx: &'a PipelineContext,
    pub run_id: &'a str,
    pub stage: u8,
    pub counters: StageCounters,
    started: Instant,
    deadline: Instant,
    budget: Duration,
    dead_letters: Vec<DeadLetterRow>,
}

impl<'a> StageContext<'a> {
    pub fn new(ctx: &'a PipelineContext, run_id: &'a str, stage: u8) -> Self {
        let budget = ctx.stage_budget(stage);
        let started = Instant::now();
        Self {
            ctx,
            run_id,
            stage,
            counters: StageCounters::default(),
            started,
            deadline: started + budget,
            budget,
            dead_letters: Vec::new(),
        }
    }

    pub fn config(&self) -> &'a Config {
        &self.ctx.config
    }

    pub fn warehouse(&self) -> &'a Warehouse {
        &self.ctx.warehouse
    }

    pub fn options(&self) -> &'a RunOptions {
        &self.ctx.options
    }

    /// The warehouse's effective append batch size.
    pub fn batch_size(&self) -> usize {
        self.ctx.warehouse.batch_size()
    }

    pub fn dry_run(&self) -> bool {
        self.ctx.options.dry_run
    }

    pub fn now(&self) -> String {
        Utc::now().to_rfc3339()
    }

    /// Fails with `Timeout` once the stage is past its deadline. Stages call
    /// this at batch boundaries.
    pub fn checkpoint(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(Error::Timeout {
                stage: self.stage,
                budget_secs: self.budget.as_secs(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn expire(&mut self) {
        self.deadline = self.started;
        self.budget = Duration::ZERO;
    }

    pub fn warn(&mut self, message: &str) {
        self.counters.warnings += 1;
        warn!(run_id = self.run_id, stage = self.stage, "{}", message);
    }

    /// Append rows to a table, routing rejected rows by kind.
    ///
    /// `SchemaMismatch` and `ParseFailed` rows are dead-lettered and the
    /// stage continues. An identifier collision aborts the stage. Any other
    /// rejection surfaces as `PartialWrite`.
    pub fn write<R: TableRow>(&mut self, table: Table, rows: &[R]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if self.dry_run() {
            self.counters.rows_out += rows.len() as u64;
            return Ok(());
        }
        let outcome = self.ctx.warehouse.append(table, rows)?;
        self.counters.rows_out += outcome.rows_written as u64;

        let mut unrecoverable = Vec::new();
        for row_error in outcome.errors {
            match row_error.error {
                Error::SchemaMismatch(_) | Error::ParseFailed(_) => {
                    let key = rows.get(row_error.index).and_then(|r| r.dlq_key());
                    self.dead_letter(key, &row_error.error)?;
                }
                e @ Error::IdentifierCollision { .. } => return Err(e),
                e => unrecoverable.push(e),
            }
        }
        if let Some(first) = unrecoverable.first() {
            return Err(Error::PartialWrite {
                table: self.ctx.warehouse.name(table)?.to_string(),
                failed: unrecoverable.len(),
                sample: first.to_string(),
            });
        }
        Ok(())
    }

    /// Divert one input to this stage's DLQ.
    pub fn dead_letter(&mut self, input_fingerprint: Option<String>, error: &Error) -> Result<()> {
        self.counters.rows_dlq += 1;
        warn!(
            run_id = self.run_id,
            stage = self.stage,
            error_kind = error.kind(),
            input = input_fingerprint.as_deref().unwrap_or("-"),
            "diverted to dead-letter queue: {}",
            error
        );
        self.dead_letters.push(DeadLetterRow {
            run_id: self.run_id.to_string(),
            stage: i64::from(self.stage),
            input_fingerprint,
            error_kind: error.kind().to_string(),
            error_detail: Some(error.to_string()),
            created_at: self.now(),
        });
        if self.dead_letters.len() >= self.batch_size() {
            self.flush_dead_letters()?;
        }
        Ok(())
    }

    pub fn flush_dead_letters(&mut self) -> Result<()> {
        if self.dead_letters.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.dead_letters);
        if self.dry_run() {
            return Ok(());
        }
        let outcome = self.ctx.warehouse.append(Table::Dlq(self.stage), &rows)?;
        if let Some(first) = outcome.errors.first() {
            return Err(Error::PartialWrite {
                table: self.ctx.warehouse.name(Table::Dlq(self.stage))?.to_string(),
                failed: outcome.errors.len(),
                sample: first.error.to_string(),
            });
        }
        Ok(())
    }

    /// Final counters with the elapsed time filled in.
    pub fn finish(&mut self) -> StageCounters {
        self.counters.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.counters.clone()
    }
}
