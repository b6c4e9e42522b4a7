//! S4 Staging: harmonise identified messages into the single shape the
//! SPINE construction stages read.

use crate::context::StageContext;
use crate::error::Result;
use crate::warehouse::{IdentityRow, Level, StagedRow, Table};

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let batch_size = stage.batch_size();
    let rows: Vec<IdentityRow> = stage.warehouse().fetch(
        Table::Stage(3),
        stage.run_id,
        "session_id, message_index",
    )?;
    stage.counters.rows_in = rows.len() as u64;

    for chunk in rows.chunks(batch_size) {
        stage.checkpoint()?;
        let staged: Vec<StagedRow> = chunk
            .iter()
            .cloned()
            .map(|identity| StagedRow {
                identity,
                level: Level::Message.as_i64(),
                parent_id: None,
            })
            .collect();
        stage.write(Table::Stage(4), &staged)?;
    }
    Ok(())
}
