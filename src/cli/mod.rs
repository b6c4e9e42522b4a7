//! Subcommand drivers. Each file owns one subcommand and prints its own
//! human-readable report; structured logs go through `tracing`.

pub mod discover;
pub mod rollback;
pub mod run;
pub mod stage;
pub mod status;
pub mod verify;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::Config;
use crate::context::{PipelineContext, RunOptions};
use crate::executor::StageReport;

/// Flags shared by `run` and `stage`.
#[derive(Args, Debug, Clone, Default)]
pub struct RunFlags {
    /// Directory holding session files (overrides the configured sources)
    #[arg(long)]
    pub source_dir: Option<String>,

    /// Run id to use (default: mint a fresh one)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Count what would be written, write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Rows per warehouse append batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Promote WARNING rows as well as PASSED ones
    #[arg(long)]
    pub include_warnings: bool,

    /// Promote even when some parent references are broken
    #[arg(long)]
    pub promote_with_orphans: bool,

    /// Also fail rows lacking a content date or fingerprint
    #[arg(long)]
    pub strict: bool,

    /// Extract at most this many files
    #[arg(long)]
    pub limit_files: Option<usize>,
}

impl RunFlags {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            include_warnings: self.include_warnings,
            promote_with_orphans: self.promote_with_orphans,
            strict: self.strict,
            limit_files: self.limit_files,
        }
    }

    /// Overlay command-line settings on the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.source_dir {
            config.pipeline.source_dir = Some(dir.clone());
        }
        if let Some(batch_size) = self.batch_size {
            config.warehouse.batch_size = batch_size.max(1);
        }
    }
}

/// Open warehouse and language model for a pipeline invocation.
pub fn open_context(mut config: Config, flags: &RunFlags) -> Result<PipelineContext> {
    flags.apply(&mut config);
    let ctx = PipelineContext::open(config, flags.options())
        .context("could not open the warehouse")?;
    Ok(ctx)
}

/// Counter table printed after `run` and `stage`.
pub fn print_reports(reports: &[StageReport]) {
    println!(
        "\n{:<6} {:<15} {:>9} {:>9} {:>6} {:>6} {:>9}",
        "Stage", "Name", "In", "Out", "DLQ", "Warn", "ms"
    );
    println!("{}", "-".repeat(66));
    for r in reports {
        let c = &r.counters;
        println!(
            "{:<6} {:<15} {:>9} {:>9} {:>6} {:>6} {:>9}",
            r.stage, r.name, c.rows_in, c.rows_out, c.rows_dlq, c.warnings, c.elapsed_ms
        );
    }
}
