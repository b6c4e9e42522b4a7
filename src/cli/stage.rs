//! Stage command implementation: run exactly one stage for a run.

use anyhow::{bail, Result};

use crate::context::PipelineContext;
use crate::error::Error;
use crate::executor::Executor;
use crate::ledger::Status;
use crate::stages;

use super::print_reports;

pub fn run(ctx: &PipelineContext, number: u8, run_id: Option<&str>) -> Result<()> {
    let Some(def) = stages::stage(number) else {
        bail!("there is no stage {} (stages are 0-16)", number);
    };
    // only the entry stages may start a fresh run
    if run_id.is_none() && number > 1 {
        bail!("stage {} needs --run-id of the run whose earlier stages it reads", number);
    }

    let executor = Executor::new(ctx)?;
    let run_id = executor.begin_run(run_id, serde_json::json!({ "stages": [number] }))?;
    println!("▶ Stage {} ({}) for run {}", def.number, def.name, run_id);
    println!("   {}", def.description);

    let outcome = executor.run_stage(&run_id, number);
    let status = match &outcome {
        Ok(_) if ctx.options.dry_run => Status::DryRun,
        Ok(_) => Status::Success,
        Err(Error::Timeout { .. }) => Status::Timeout,
        Err(_) => Status::Failed,
    };
    executor.end_run(&run_id, status)?;
    let report = outcome?;

    print_reports(std::slice::from_ref(&report));
    println!("\n✅ Stage {} finished", number);
    Ok(())
}
