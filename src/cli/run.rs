//! Run command implementation: drive a window of the pipeline.

use anyhow::Result;

use crate::context::PipelineContext;
use crate::error::Error;
use crate::executor::{invocation_arguments, Executor, StageReport};
use crate::ledger::Status;
use crate::stages::{self, discovery};

use super::discover::print_manifest;
use super::print_reports;

fn drive(executor: &Executor<'_>, run_id: &str, window: &[u8]) -> crate::error::Result<Vec<StageReport>> {
    let mut reports = Vec::new();
    let mut rest = window;
    if let Some((&0, tail)) = window.split_first() {
        let (manifest, report) = executor.run_with(run_id, 0, discovery::execute)?;
        print_manifest(&manifest);
        reports.push(report);
        manifest.gate()?;
        rest = tail;
    }
    reports.extend(executor.run_pipeline(run_id, rest)?);
    Ok(reports)
}

/// Returns the run id used.
pub fn run(ctx: &PipelineContext, run_id: Option<&str>, from: Option<u8>, to: Option<u8>) -> Result<String> {
    let window = stages::window(from, to)?;
    let executor = Executor::new(ctx)?;
    let run_id = executor.begin_run(run_id, invocation_arguments(ctx, &window))?;

    let stages: Vec<String> = window.iter().map(u8::to_string).collect();
    println!("🚀 Run {}: stages {}", run_id, stages.join(" → "));
    if ctx.options.dry_run {
        println!("   Dry run: nothing will be written.");
    }

    let outcome = drive(&executor, &run_id, &window);
    let status = match &outcome {
        Ok(_) if ctx.options.dry_run => Status::DryRun,
        Ok(_) => Status::Success,
        Err(Error::Timeout { .. }) => Status::Timeout,
        Err(_) => Status::Failed,
    };
    executor.end_run(&run_id, status)?;
    let reports = outcome?;

    print_reports(&reports);
    println!("\n✅ Run {} finished ({} stage(s))", run_id, reports.len());
    Ok(run_id)
}
