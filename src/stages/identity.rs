//! S3 Identity ("the gate"): mint a stable entity id for every
//! non-duplicate message. After this stage ids never change across re-runs
//! over the same source.

use crate::context::StageContext;
use crate::error::{Error, Result};
use crate::mint::{self, ENTITY_ID_WIDTH};
use crate::warehouse::{CleanedRow, IdentityRow, Table};

pub fn identify(cleaned: CleanedRow, identified_at: &str) -> Result<IdentityRow> {
    let extraction = &cleaned.extraction;
    let entity_id = mint::mint_message_id(
        &extraction.session_id,
        extraction.message_index,
        &cleaned.fingerprint,
    );
    // a row leaving the gate without a usable id is a bug, not bad data
    if !mint::is_well_formed(&entity_id, ENTITY_ID_WIDTH) {
        return Err(Error::ValidationFailed(format!(
            "minted a malformed id {:?} for {}",
            entity_id, extraction.extraction_id
        )));
    }
    Ok(IdentityRow {
        cleaned,
        entity_id,
        identified_at: identified_at.to_string(),
    })
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let batch_size = stage.batch_size();
    let rows: Vec<CleanedRow> = stage.warehouse().fetch(
        Table::Stage(2),
        stage.run_id,
        "session_id, message_index",
    )?;
    stage.counters.rows_in = rows.len() as u64;

    let now = stage.now();
    let mut batch = Vec::with_capacity(batch_size);
    for row in rows.into_iter().filter(|r| !r.is_duplicate) {
        batch.push(identify(row, &now)?);
        if batch.len() >= batch_size {
            stage.checkpoint()?;
            stage.write(Table::Stage(3), &batch)?;
            batch.clear();
        }
    }
    stage.write(Table::Stage(3), &batch)
}
