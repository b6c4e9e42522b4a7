//! S12 Keywords: top-N terms per L5 message.
//!
//! Every message gets a row, even when no term qualifies, so downstream
//! validation can tell "no keywords" from "not enriched".

use crate::context::StageContext;
use crate::error::Result;
use crate::text;
use crate::warehouse::{KeywordRow, Table};

use super::fetch_entities;

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = messages.len() as u64;

    let top_n = stage.config().pipeline.keywords_top_n;
    let batch_size = stage.batch_size();
    let now = stage.now();
    for chunk in messages.chunks(batch_size) {
        stage.checkpoint()?;
        let rows: Vec<KeywordRow> = chunk
            .iter()
            .map(|message| KeywordRow {
                entity_id: message.entity_id.clone(),
                run_id: stage.run_id.to_string(),
                keywords: text::keywords(&message.text, top_n),
                created_at: now.clone(),
            })
            .collect();
        stage.write(Table::Stage(12), &rows)?;
    }
    Ok(())
}
