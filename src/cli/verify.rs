//! Verify command implementation

use anyhow::Result;
use std::path::PathBuf;

use crate::verify::Verifier;
use crate::warehouse::Warehouse;

/// Print probe reports. Returns `false` when any check failed.
pub fn run(warehouse: &Warehouse, assessment_dir: PathBuf, stage: Option<u8>, run_id: Option<&str>) -> Result<bool> {
    let verifier = Verifier::new(warehouse, assessment_dir);
    let reports = match stage {
        Some(n) => vec![verifier.verify_stage(n, run_id)],
        None => verifier.verify_all(run_id),
    };

    for report in &reports {
        println!("{}", report);
    }
    let failed: Vec<String> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.stage.to_string())
        .collect();
    if failed.is_empty() {
        println!("✅ All {} probe(s) passed", reports.len());
        Ok(true)
    } else {
        println!("❌ Probes failed for stage(s): {}", failed.join(", "));
        Ok(false)
    }
}
