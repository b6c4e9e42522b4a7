//! Discover command implementation

use anyhow::Result;

use crate::context::PipelineContext;
use crate::executor::Executor;
use crate::ledger::Status;
use crate::stages::discovery::{self, Manifest};

pub fn print_manifest(manifest: &Manifest) {
    let s = &manifest.summary;
    println!("🔎 Source assessment ({})\n", manifest.source);
    println!("   Files discovered: {}", s.total_files_discovered);
    println!("   Files sampled:    {}", s.files_sampled);
    println!("   Messages:         {}", s.total_messages);
    println!("   Files w/ errors:  {}", s.files_with_errors);
    if !s.models_used.is_empty() {
        println!("   Models:           {}", s.models_used.join(", "));
    }
    if s.total_cost_usd > 0.0 {
        println!("   Cost (sample):    ${:.2}", s.total_cost_usd);
    }
    println!();
    for rec in &manifest.recommendations {
        println!("   • {}", rec);
    }
    let mark = if manifest.is_no_go() { "❌" } else { "✅" };
    println!("\n{} {}", mark, manifest.go_no_go);
}

/// Run S0 on its own. Returns `false` on a NO-GO verdict.
pub fn run(ctx: &PipelineContext, run_id: Option<&str>) -> Result<bool> {
    let executor = Executor::new(ctx)?;
    let run_id = executor.begin_run(run_id, serde_json::json!({ "stages": [0] }))?;
    let outcome = executor.run_with(&run_id, 0, discovery::execute);
    let status = match &outcome {
        Ok((manifest, _)) if manifest.is_no_go() => Status::Failed,
        Ok(_) if ctx.options.dry_run => Status::DryRun,
        Ok(_) => Status::Success,
        Err(_) => Status::Failed,
    };
    executor.end_run(&run_id, status)?;
    let (manifest, _) = outcome?;

    print_manifest(&manifest);
    if !ctx.options.dry_run {
        println!(
            "   Manifest: {}",
            ctx.config.assessment_dir().join(format!("assessment_{}.json", run_id)).display()
        );
    }
    Ok(!manifest.is_no_go())
}
