//! S1 Extraction: parse session files into one `stage_1` row per record.
//!
//! Files are parsed on a local rayon pool in chunks; rows are appended from
//! the calling thread so the warehouse connection is never shared.

use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::context::StageContext;
use crate::error::{Error, Result};
use crate::source::{ParsedFile, Source, SourceRegistry};
use crate::warehouse::{ExtractionRow, Table};

/// Files parsed per pool round; the deadline is checked between rounds.
const FILES_PER_CHUNK: usize = 32;

pub fn extraction_id(session_id: &str, message_index: i64) -> String {
    format!("{}:{}", session_id, message_index)
}

fn rows_for(parsed: &ParsedFile, source_name: &str, run_id: &str, now: &str) -> Vec<ExtractionRow> {
    let session_id = parsed.session_id();
    let source_file = parsed.path.to_string_lossy().to_string();
    parsed
        .records
        .iter()
        .map(|record| ExtractionRow {
            extraction_id: extraction_id(&session_id, record.message_index),
            session_id: session_id.clone(),
            message_index: record.message_index,
            message_type: record.message_type.clone(),
            role: record.role.clone(),
            content_raw: record.content.clone(),
            timestamp_utc: record.timestamp.map(|t| t.to_rfc3339()),
            model: record.model.clone(),
            cost_usd: record.cost_usd,
            tool_name: record.tool_name.clone(),
            tool_input: record.tool_input.clone(),
            tool_output: record.tool_output.clone(),
            source_file: source_file.clone(),
            source_name: source_name.to_string(),
            run_id: run_id.to_string(),
            extracted_at: now.to_string(),
        })
        .collect()
}

fn discover_all<'r>(registry: &'r SourceRegistry, limit: Option<usize>) -> Result<Vec<(&'r Source, PathBuf)>> {
    let mut files = Vec::new();
    for source in registry.sources() {
        for path in source.discover()? {
            files.push((source, path));
        }
    }
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    Ok(files)
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let config = stage.config();
    let registry = SourceRegistry::new(config)?;
    let files = discover_all(&registry, stage.options().limit_files)?;
    if files.is_empty() {
        return Err(Error::InputMissing(
            "no session files matched the configured sources".to_string(),
        ));
    }

    let workers = config.worker_count();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::Config(format!("could not start {} parse workers: {}", workers, e)))?;
    info!(run_id = stage.run_id, files = files.len(), workers, "extracting session files");

    for chunk in files.chunks(FILES_PER_CHUNK) {
        stage.checkpoint()?;
        let parsed: Vec<(&Source, std::result::Result<ParsedFile, Error>)> = pool.install(|| {
            chunk
                .par_iter()
                .map(|(source, path)| (*source, source.parse_file(path)))
                .collect()
        });

        for ((source, outcome), (_, path)) in parsed.into_iter().zip(chunk) {
            let file = match outcome {
                Ok(file) => file,
                Err(e) => {
                    stage.counters.rows_in += 1;
                    let failure = Error::ParseFailed(format!("{}: {}", path.display(), e));
                    stage.dead_letter(Some(path.to_string_lossy().to_string()), &failure)?;
                    continue;
                }
            };

            stage.counters.rows_in += (file.records.len() + file.errors.len()) as u64;
            for line in &file.errors {
                let failure = Error::ParseFailed(format!("{}: {}", path.display(), line.detail));
                stage.dead_letter(Some(line.line_digest.clone()), &failure)?;
            }
            let unknown = file.unknown_records();
            if unknown > 0 {
                stage.warn(&format!(
                    "{}: {} record(s) had no recognised shape",
                    path.display(),
                    unknown
                ));
            }

            let rows = rows_for(&file, source.name(), stage.run_id, &stage.now());
            debug!(file = %path.display(), rows = rows.len(), "parsed session file");
            stage.write(Table::Stage(1), &rows)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WarehouseConfig};
    use crate::context::{PipelineContext, RunOptions};
    use crate::warehouse::{DeadLetterRow, Warehouse};
    use std::fs;
    use std::path::Path;

    fn context(source_dir: &Path, options: RunOptions) -> PipelineContext {
        let mut config = Config::default();
        config.pipeline.source_dir = Some(source_dir.to_string_lossy().to_string());
        config.pipeline.workers = 2;
        let warehouse = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        warehouse.ensure(Table::Stage(1)).unwrap();
        warehouse.ensure(Table::Dlq(1)).unwrap();
        PipelineContext::new(config, warehouse, options)
    }

    #[test]
    fn test_malformed_line_is_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::new();
        for i in 0..99 {
            body.push_str(&format!("{{\"type\":\"user\",\"content\":\"message {}\"}}\n", i));
            if i == 40 {
                body.push_str("this is not json\n");
            }
        }
        fs::write(dir.path().join("s.jsonl"), body).unwrap();

        let ctx = context(dir.path(), RunOptions::default());
        let mut stage = StageContext::new(&ctx, "r", 1);
        run(&mut stage).unwrap();
        stage.flush_dead_letters().unwrap();

        assert_eq!(stage.counters.rows_in, 100);
        assert_eq!(stage.counters.rows_out, 99);
        assert_eq!(ctx.warehouse.count_rows(Table::Stage(1), Some("r")).unwrap(), 99);
        let dlq: Vec<DeadLetterRow> = ctx.warehouse.fetch(Table::Dlq(1), "r", "created_at").unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].error_kind, "ParseFailed");
    }

    #[test]
    fn test_rows_keep_record_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("s.jsonl"),
            "{\"type\":\"user\",\"content\":\"a\"}\n{\"type\":\"assistant\",\"content\":\"b\"}\n",
        )
        .unwrap();
        let ctx = context(dir.path(), RunOptions::default());
        let mut stage = StageContext::new(&ctx, "r", 1);
        run(&mut stage).unwrap();

        let rows: Vec<ExtractionRow> = ctx.warehouse.fetch(Table::Stage(1), "r", "message_index").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, "user");
        assert_eq!(rows[1].extraction_id, extraction_id(&rows[1].session_id, 1));
        assert_eq!(rows[1].source_name, "claude_code");
    }

    #[test]
    fn test_limit_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(format!("{name}.jsonl")), "{\"type\":\"user\",\"content\":\"x\"}\n").unwrap();
        }
        let options = RunOptions {
            limit_files: Some(2),
            ..RunOptions::default()
        };
        let ctx = context(dir.path(), options);
        let mut stage = StageContext::new(&ctx, "r", 1);
        run(&mut stage).unwrap();
        assert_eq!(stage.counters.rows_out, 2);
    }

    #[test]
    fn test_empty_corpus_is_input_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), RunOptions::default());
        let mut stage = StageContext::new(&ctx, "r", 1);
        let err = run(&mut stage).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(ctx.warehouse.count_rows(Table::Stage(1), None).unwrap(), 0);
    }
}
