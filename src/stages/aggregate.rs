//! S14 Aggregate: union of every level table in the promotion shape, with
//! enrichment columns filled where the level has them and NULL elsewhere.

use std::collections::HashMap;

use crate::context::StageContext;
use crate::error::Result;
use crate::warehouse::{
    AggregateRow, EmbeddingRow, EmotionRow, Enrichment, EntityRow, IntentRow, KeywordRow, Level,
    Table, TableRow,
};

use super::fetch_entities;

/// Level tables in the order they are unioned.
const LEVEL_STAGES: [u8; 4] = [8, 6, 7, 5];

/// Enrichment annotations keyed by entity id.
#[derive(Debug, Default)]
pub struct Annotations {
    embeddings: HashMap<String, EmbeddingRow>,
    intents: HashMap<String, IntentRow>,
    emotions: HashMap<String, EmotionRow>,
    keywords: HashMap<String, KeywordRow>,
}

fn load_by_id<R, K>(stage: &StageContext<'_>, number: u8, key: K) -> Result<HashMap<String, R>>
where
    R: TableRow,
    K: Fn(&R) -> String,
{
    if !stage.warehouse().exists(Table::Stage(number))? {
        return Ok(HashMap::new());
    }
    let rows: Vec<R> = stage.warehouse().fetch(Table::Stage(number), stage.run_id, "entity_id")?;
    Ok(rows.into_iter().map(|r| (key(&r), r)).collect())
}

impl Annotations {
    pub fn load(stage: &StageContext<'_>) -> Result<Self> {
        Ok(Self {
            embeddings: load_by_id(stage, 9, |r: &EmbeddingRow| r.entity_id.clone())?,
            intents: load_by_id(stage, 10, |r: &IntentRow| r.entity_id.clone())?,
            emotions: load_by_id(stage, 11, |r: &EmotionRow| r.entity_id.clone())?,
            keywords: load_by_id(stage, 12, |r: &KeywordRow| r.entity_id.clone())?,
        })
    }

    /// Enrichment columns for one entity. Only L8 carries embedding
    /// metadata and only L5 carries message annotations.
    pub fn for_entity(&self, entity: &EntityRow) -> Enrichment {
        let id = entity.entity_id.as_str();
        match Level::from_i64(entity.level) {
            Some(Level::Conversation) => {
                let embedding = self.embeddings.get(id);
                Enrichment {
                    embedding_model: embedding.map(|e| e.model.clone()),
                    embedding_input_chars: embedding.map(|e| e.input_chars),
                    ..Enrichment::default()
                }
            }
            Some(Level::Message) => {
                let intent = self.intents.get(id);
                let emotion = self.emotions.get(id);
                Enrichment {
                    intent: intent.and_then(|i| i.intent.clone()),
                    task_type: intent.and_then(|i| i.task_type.clone()),
                    emotion: emotion.map(|e| e.emotion.clone()),
                    emotion_confidence: emotion.map(|e| e.confidence),
                    keywords: self.keywords.get(id).map(|k| k.keywords.clone()),
                    ..Enrichment::default()
                }
            }
            _ => Enrichment::default(),
        }
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let annotations = Annotations::load(stage)?;
    let batch_size = stage.batch_size();

    for number in LEVEL_STAGES {
        if !stage.warehouse().exists(Table::Stage(number))? {
            continue;
        }
        let entities = fetch_entities(stage, number)?;
        stage.counters.rows_in += entities.len() as u64;
        for chunk in entities.chunks(batch_size) {
            stage.checkpoint()?;
            let rows: Vec<AggregateRow> = chunk
                .iter()
                .map(|entity| AggregateRow {
                    enrichment: annotations.for_entity(entity),
                    entity: EntityRow {
                        run_id: stage.run_id.to_string(),
                        ..entity.clone()
                    },
                })
                .collect();
            stage.write(Table::Stage(14), &rows)?;
        }
    }
    Ok(())
}
