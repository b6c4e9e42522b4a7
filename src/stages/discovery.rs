//! S0 Discovery: sample the source corpus and write an assessment manifest.
//!
//! Nothing is written to the warehouse. The manifest lands in
//! `{PIPELINE_HOME}/staging/assessment/assessment_{run_id}.json`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::context::StageContext;
use crate::error::{Error, Result};
use crate::source::{Source, SourceRegistry};

pub const GO: &str = "GO: Data ready for processing";
pub const CAUTION: &str = "CAUTION: Some parse errors, review before proceeding";
pub const NO_GO_NO_FILES: &str = "NO-GO: No source files";
pub const NO_GO_NO_MESSAGES: &str = "NO-GO: No messages found";
pub const NO_GO_ERRORS: &str = "NO-GO: Too many parse errors";

/// Statistics for one sampled file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub file_path: String,
    pub file_size_bytes: u64,
    pub message_count: u64,
    pub message_types: BTreeMap<String, u64>,
    pub models_used: Vec<String>,
    pub tools_used: BTreeMap<String, u64>,
    pub total_cost_usd: f64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateRange {
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total_files_discovered: u64,
    pub files_sampled: u64,
    pub total_messages: u64,
    pub files_with_errors: u64,
    pub models_used: Vec<String>,
    pub total_cost_usd: f64,
    pub message_types: BTreeMap<String, u64>,
    pub tools_used: BTreeMap<String, u64>,
    pub date_range: DateRange,
}

impl Summary {
    pub fn error_rate(&self) -> f64 {
        if self.files_sampled == 0 {
            return 0.0;
        }
        self.files_with_errors as f64 / self.files_sampled as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub assessment_timestamp: String,
    pub run_id: String,
    pub source: String,
    pub summary: Summary,
    pub files_analyzed: Vec<FileStats>,
    pub recommendations: Vec<String>,
    pub go_no_go: String,
}

impl Manifest {
    pub fn is_no_go(&self) -> bool {
        self.go_no_go.starts_with("NO-GO")
    }

    /// Stops a pipeline run on NO-GO. An empty sample is missing input; a
    /// sample that mostly fails to parse is a validation failure.
    pub fn gate(&self) -> Result<()> {
        if !self.is_no_go() {
            return Ok(());
        }
        let detail = format!("assessment {}: {}", self.run_id, self.go_no_go);
        if self.summary.files_sampled == 0 || self.summary.total_messages == 0 {
            Err(Error::InputMissing(detail))
        } else {
            Err(Error::ValidationFailed(detail))
        }
    }
}

/// The first `n` files of the sorted discovery list.
pub fn sample(files: &[PathBuf], n: usize) -> &[PathBuf] {
    &files[..files.len().min(n)]
}

fn assess_file(source: &Source, path: &Path) -> FileStats {
    let mut stats = FileStats {
        file_path: path.to_string_lossy().to_string(),
        file_size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        ..FileStats::default()
    };
    let parsed = match source.parse_file(path) {
        Ok(parsed) => parsed,
        Err(e) => {
            stats.errors.push(format!("file error: {}", e));
            return stats;
        }
    };

    let mut models = BTreeSet::new();
    for record in &parsed.records {
        stats.message_count += 1;
        *stats
            .message_types
            .entry(record.message_type.clone())
            .or_default() += 1;
        if let Some(model) = &record.model {
            models.insert(model.clone());
        }
        if let Some(tool) = &record.tool_name {
            *stats.tools_used.entry(tool.clone()).or_default() += 1;
        }
        stats.total_cost_usd += record.cost_usd.unwrap_or(0.0);
        if let Some(ts) = record.timestamp.map(|t| t.to_rfc3339()) {
            if stats.first_timestamp.as_ref().map_or(true, |f| ts < *f) {
                stats.first_timestamp = Some(ts.clone());
            }
            if stats.last_timestamp.as_ref().map_or(true, |l| ts > *l) {
                stats.last_timestamp = Some(ts);
            }
        }
    }
    stats.models_used = models.into_iter().collect();
    stats.errors = parsed.errors.into_iter().map(|e| e.detail).collect();
    stats
}

/// Fold per-file statistics into the manifest summary.
pub fn summarize(total_files_discovered: usize, files: &[FileStats]) -> Summary {
    let mut summary = Summary {
        total_files_discovered: total_files_discovered as u64,
        files_sampled: files.len() as u64,
        ..Summary::default()
    };
    let mut models = BTreeSet::new();
    for file in files {
        summary.total_messages += file.message_count;
        summary.total_cost_usd += file.total_cost_usd;
        if !file.errors.is_empty() {
            summary.files_with_errors += 1;
        }
        for (kind, count) in &file.message_types {
            *summary.message_types.entry(kind.clone()).or_default() += count;
        }
        for (tool, count) in &file.tools_used {
            *summary.tools_used.entry(tool.clone()).or_default() += count;
        }
        models.extend(file.models_used.iter().cloned());

        let range = &mut summary.date_range;
        if let Some(first) = &file.first_timestamp {
            if range.earliest.as_ref().map_or(true, |e| first < e) {
                range.earliest = Some(first.clone());
            }
        }
        if let Some(last) = &file.last_timestamp {
            if range.latest.as_ref().map_or(true, |l| last > l) {
                range.latest = Some(last.clone());
            }
        }
    }
    summary.models_used = models.into_iter().collect();
    summary
}

pub fn recommendations(summary: &Summary) -> Vec<String> {
    let mut out = Vec::new();
    if summary.files_sampled == 0 {
        out.push("CRITICAL: No JSONL files found. Check source directory.".to_string());
    }
    let rate = summary.error_rate();
    if rate > 0.1 {
        out.push(format!(
            "WARNING: {:.1}% of files have parse errors. Review data quality.",
            rate * 100.0
        ));
    }
    if summary.total_messages == 0 {
        out.push("CRITICAL: No messages found in sampled files.".to_string());
    } else {
        for role in ["user", "assistant"] {
            if !summary.message_types.contains_key(role) {
                out.push(format!(
                    "WARNING: No '{}' message type found. Check export format.",
                    role
                ));
            }
        }
    }
    if summary.total_cost_usd > 0.0 {
        out.push(format!(
            "INFO: Total API cost in sample: ${:.2}",
            summary.total_cost_usd
        ));
    }
    if out.is_empty() {
        out.push("OK: Data appears well-formed and ready for processing.".to_string());
    }
    out
}

/// GO / CAUTION / NO-GO. More than half the sample failing is NO-GO; any
/// failure at all is CAUTION.
pub fn verdict(summary: &Summary) -> &'static str {
    if summary.files_sampled == 0 {
        NO_GO_NO_FILES
    } else if summary.total_messages == 0 {
        NO_GO_NO_MESSAGES
    } else if summary.error_rate() > 0.5 {
        NO_GO_ERRORS
    } else if summary.files_with_errors > 0 {
        CAUTION
    } else {
        GO
    }
}

pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("assessment_{}.json", manifest.run_id));
    std::fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
    Ok(path)
}

/// Run the assessment and hand the manifest back to the caller.
pub fn execute(stage: &mut StageContext<'_>) -> Result<Manifest> {
    let config = stage.config();
    let registry = SourceRegistry::new(config)?;
    let sample_size = config.pipeline.sample_size;

    let mut discovered = 0;
    let mut files_analyzed = Vec::new();
    let mut source_names = Vec::new();
    for source in registry.sources() {
        let files = source.discover()?;
        discovered += files.len();
        source_names.push(source.name());
        let remaining = sample_size.saturating_sub(files_analyzed.len());
        for path in sample(&files, remaining) {
            stage.checkpoint()?;
            files_analyzed.push(assess_file(source, path));
        }
    }

    let summary = summarize(discovered, &files_analyzed);
    stage.counters.rows_in = summary.files_sampled;
    stage.counters.warnings = summary.files_with_errors;

    let manifest = Manifest {
        assessment_timestamp: stage.now(),
        run_id: stage.run_id.to_string(),
        source: source_names.join(","),
        recommendations: recommendations(&summary),
        go_no_go: verdict(&summary).to_string(),
        summary,
        files_analyzed,
    };

    if manifest.is_no_go() {
        warn!(run_id = stage.run_id, verdict = %manifest.go_no_go, "assessment verdict");
    } else {
        info!(run_id = stage.run_id, verdict = %manifest.go_no_go, "assessment verdict");
    }

    if !stage.dry_run() {
        let path = write_manifest(&config.assessment_dir(), &manifest)?;
        info!(path = %path.display(), "wrote assessment manifest");
    }
    Ok(manifest)
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    execute(stage).map(|_| ())
}
