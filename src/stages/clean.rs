//! S2 Clean: normalise content, fingerprint, flag duplicates.

use std::collections::HashSet;
use tracing::info;

use crate::context::StageContext;
use crate::error::Result;
use crate::mint;
use crate::text;
use crate::warehouse::{CleanedRow, ExtractionRow, Table};

use super::content_date;

/// Clean one extracted row. Duplicate detection is left to the caller.
pub fn clean_row(extraction: ExtractionRow, cleaned_at: &str) -> CleanedRow {
    let content_cleaned = text::clean(extraction.content_raw.as_deref().unwrap_or(""));
    let fingerprint = mint::fingerprint(&extraction.session_id, &extraction.role, &content_cleaned);
    CleanedRow {
        content_length: content_cleaned.chars().count() as i64,
        word_count: text::word_count(&content_cleaned) as i64,
        content_date: content_date(extraction.timestamp_utc.as_deref()),
        content_cleaned,
        fingerprint,
        is_duplicate: false,
        cleaned_at: cleaned_at.to_string(),
        extraction,
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let batch_size = stage.batch_size();
    // (session_id, message_index) order makes "earliest copy" deterministic
    let rows: Vec<ExtractionRow> = stage.warehouse().fetch(
        Table::Stage(1),
        stage.run_id,
        "session_id, message_index",
    )?;
    stage.counters.rows_in = rows.len() as u64;

    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates = 0u64;
    let mut batch = Vec::with_capacity(batch_size);
    let now = stage.now();
    for row in rows {
        let mut cleaned = clean_row(row, &now);
        cleaned.is_duplicate = !seen.insert(cleaned.fingerprint.clone());
        if cleaned.is_duplicate {
            duplicates += 1;
        }
        batch.push(cleaned);
        if batch.len() >= batch_size {
            stage.checkpoint()?;
            stage.write(Table::Stage(2), &batch)?;
            batch.clear();
        }
    }
    stage.write(Table::Stage(2), &batch)?;
    if duplicates > 0 {
        info!(run_id = stage.run_id, duplicates, "flagged duplicate messages");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WarehouseConfig};
    use crate::context::{PipelineContext, RunOptions};
    use crate::warehouse::Warehouse;

    fn extraction(session: &str, index: i64, role: &str, content: &str) -> ExtractionRow {
        ExtractionRow {
            extraction_id: format!("{session}:{index}"),
            session_id: session.to_string(),
            message_index: index,
            message_type: role.to_string(),
            role: role.to_string(),
            content_raw: Some(content.to_string()),
            timestamp_utc: Some("2024-03-01T12:00:00+00:00".to_string()),
            model: None,
            cost_usd: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            source_file: "s.jsonl".to_string(),
            source_name: "claude_code".to_string(),
            run_id: "r".to_string(),
            extracted_at: "now".to_string(),
        }
    }

    #[test]
    fn test_clean_row_fields() {
        let row = clean_row(extraction("s", 0, "user", "  hello \t world  "), "now");
        assert_eq!(row.content_cleaned, "hello world");
        assert_eq!(row.content_length, 11);
        assert_eq!(row.word_count, 2);
        assert_eq!(row.content_date.as_deref(), Some("2024-03-01"));
        assert_eq!(row.fingerprint, mint::fingerprint("s", "user", "hello world"));
    }

    #[test]
    fn test_later_copy_is_the_duplicate() {
        let warehouse = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        warehouse.ensure(Table::Stage(1)).unwrap();
        warehouse.ensure(Table::Stage(2)).unwrap();
        // inserted out of order on purpose
        warehouse
            .append(
                Table::Stage(1),
                &[
                    extraction("s", 2, "user", "same  text"),
                    extraction("s", 0, "user", "same text"),
                    extraction("s", 1, "assistant", "same text"),
                ],
            )
            .unwrap();
        let ctx = PipelineContext::new(Config::default(), warehouse, RunOptions::default());
        let mut stage = StageContext::new(&ctx, "r", 2);
        run(&mut stage).unwrap();

        let rows: Vec<CleanedRow> = ctx.warehouse.fetch(Table::Stage(2), "r", "message_index").unwrap();
        let flags: Vec<bool> = rows.iter().map(|r| r.is_duplicate).collect();
        assert_eq!(flags, vec![false, false, true]);
    }
}
