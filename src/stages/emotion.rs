//! S11 Emotion: one label per L5 message, classified in batches.

use crate::context::StageContext;
use crate::enrich::emotion;
use crate::error::Result;
use crate::warehouse::{EmotionRow, Table};

use super::fetch_entities;

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = messages.len() as u64;

    let batch_size = stage.config().pipeline.emotion_batch_size.max(1);
    let now = stage.now();
    for chunk in messages.chunks(batch_size) {
        stage.checkpoint()?;
        let mut rows = Vec::with_capacity(chunk.len());
        for message in chunk {
            match emotion::classify(&message.text) {
                Ok(label) => rows.push(EmotionRow {
                    entity_id: message.entity_id.clone(),
                    run_id: stage.run_id.to_string(),
                    emotion: label.emotion,
                    confidence: label.confidence,
                    created_at: now.clone(),
                }),
                Err(e) => stage.dead_letter(Some(message.entity_id.clone()), &e)?,
            }
        }
        stage.write(Table::Stage(11), &rows)?;
    }
    Ok(())
}
