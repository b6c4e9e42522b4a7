//! S15 Validate: score and classify every aggregated entity.
//!
//! Hard rules decide PASSED vs FAILED; missing optional enrichment only
//! downgrades a row to WARNING. The score is the sum of the weights of the
//! rules a row satisfies, so a perfect row scores 1.0.

use tracing::info;

use crate::context::StageContext;
use crate::error::Result;
use crate::warehouse::{AggregateRow, Level, Table, ValidationRow, ValidationStatus};

use super::is_exempt_role;

const W_ENTITY_ID: f64 = 0.30;
const W_LEVEL: f64 = 0.20;
const W_SESSION_ID: f64 = 0.20;
const W_TEXT: f64 = 0.20;
const W_METADATA: f64 = 0.10;

/// Accumulates rule outcomes for one row.
#[derive(Debug, Default)]
struct Verdict {
    score: f64,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Verdict {
    fn hard(&mut self, ok: bool, weight: f64, error: &str) {
        if ok {
            self.score += weight;
        } else {
            self.errors.push(error.to_string());
        }
    }

    fn status(&self) -> ValidationStatus {
        if !self.errors.is_empty() {
            ValidationStatus::Failed
        } else if !self.warnings.is_empty() {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Passed
        }
    }
}

/// Optional enrichment a level is expected to carry.
fn missing_metadata(row: &AggregateRow) -> Vec<&'static str> {
    let entity = &row.entity;
    let enrichment = &row.enrichment;
    let mut missing = Vec::new();
    match Level::from_i64(entity.level) {
        Some(Level::Message) => {
            if entity.role.is_none() {
                missing.push("role");
            }
            if enrichment.intent.is_none() {
                missing.push("intent");
            }
            // no words, nothing to classify
            if enrichment.emotion.is_none() && entity.text.chars().any(char::is_alphanumeric) {
                missing.push("emotion");
            }
            if enrichment.keywords.is_none() {
                missing.push("keywords");
            }
        }
        Some(Level::Conversation) => {
            if enrichment.embedding_model.is_none() {
                missing.push("embedding_model");
            }
        }
        _ => {}
    }
    missing
}

/// Classify one aggregated row.
pub fn evaluate(row: &AggregateRow, strict: bool, run_id: &str, now: &str) -> ValidationRow {
    let entity = &row.entity;
    let mut verdict = Verdict::default();

    verdict.hard(!entity.entity_id.trim().is_empty(), W_ENTITY_ID, "missing entity_id");
    verdict.hard(
        Level::from_i64(entity.level).is_some(),
        W_LEVEL,
        &format!("level {} is not one of 1, 4, 5, 6, 8", entity.level),
    );
    verdict.hard(!entity.session_id.trim().is_empty(), W_SESSION_ID, "missing session_id");
    verdict.hard(
        !entity.text.trim().is_empty() || is_exempt_role(entity.role.as_deref()),
        W_TEXT,
        "empty text",
    );

    let missing = missing_metadata(row);
    if missing.is_empty() {
        verdict.score += W_METADATA;
    } else {
        verdict
            .warnings
            .extend(missing.iter().map(|field| format!("missing {}", field)));
    }

    if strict {
        if entity.content_date.is_none() {
            verdict.errors.push("missing content_date".to_string());
        }
        if entity.fingerprint.is_none() {
            verdict.errors.push("missing fingerprint".to_string());
        }
    }

    ValidationRow {
        entity_id: entity.entity_id.clone(),
        level: Some(entity.level),
        run_id: run_id.to_string(),
        status: verdict.status(),
        // two decimals
        score: (verdict.score * 100.0).round() / 100.0,
        errors: verdict.errors,
        warnings: verdict.warnings,
        validated_at: now.to_string(),
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    let rows: Vec<AggregateRow> = stage.warehouse().fetch(
        Table::Stage(14),
        stage.run_id,
        "level DESC, session_id, message_index, ordinal, entity_id",
    )?;
    stage.counters.rows_in = rows.len() as u64;

    let strict = stage.options().strict;
    let batch_size = stage.batch_size();
    let now = stage.now();
    let (mut passed, mut warned, mut failed) = (0u64, 0u64, 0u64);
    for chunk in rows.chunks(batch_size) {
        stage.checkpoint()?;
        let verdicts: Vec<ValidationRow> = chunk
            .iter()
            .map(|row| evaluate(row, strict, stage.run_id, &now))
            .collect();
        for v in &verdicts {
            match v.status {
                ValidationStatus::Passed => passed += 1,
                ValidationStatus::Warning => warned += 1,
                ValidationStatus::Failed => failed += 1,
            }
        }
        stage.write(Table::Stage(15), &verdicts)?;
    }
    info!(run_id = stage.run_id, passed, warned, failed, "validation finished");
    if failed > 0 {
        stage.warn(&format!("{} entities failed validation and will not be promoted", failed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{Enrichment, EntityRow};
    use serde_json::json;

    fn aggregate(level: i64, role: Option<&str>, text: &str, enrichment: Enrichment) -> AggregateRow {
        AggregateRow {
            entity: EntityRow {
                entity_id: "e".repeat(32),
                parent_id: None,
                session_id: "s".into(),
                level,
                text: text.into(),
                content_date: None,
                source_name: "claude_code".into(),
                run_id: "r".into(),
                created_at: "now".into(),
                fingerprint: Some("f".into()),
                metadata: json!({}),
                role: role.map(String::from),
                message_index: None,
                ordinal: 0,
            },
            enrichment,
        }
    }

    fn message_enrichment(keywords: Vec<String>) -> Enrichment {
        Enrichment {
            intent: Some("greeting".into()),
            emotion: Some("excitement".into()),
            emotion_confidence: Some(0.6),
            keywords: Some(keywords),
            ..Enrichment::default()
        }
    }

    #[test]
    fn test_short_message_with_no_keywords_passes() {
        let row = aggregate(5, Some("assistant"), "hi!", message_enrichment(vec![]));
        let v = evaluate(&row, false, "r", "now");
        assert_eq!(v.status, ValidationStatus::Passed);
        assert_eq!(v.score, 1.0);
        assert!(v.errors.is_empty() && v.warnings.is_empty());
    }

    #[test]
    fn test_token_passes_without_enrichment() {
        let row = aggregate(1, None, "!", Enrichment::default());
        assert_eq!(evaluate(&row, false, "r", "now").status, ValidationStatus::Passed);
    }

    #[test]
    fn test_missing_enrichment_is_a_warning() {
        let row = aggregate(5, Some("user"), "hello world", Enrichment::default());
        let v = evaluate(&row, false, "r", "now");
        assert_eq!(v.status, ValidationStatus::Warning);
        assert_eq!(v.score, 0.9);
        assert!(v.warnings.contains(&"missing intent".to_string()));

        let conversation = aggregate(8, None, "hello world", Enrichment::default());
        let v = evaluate(&conversation, false, "r", "now");
        assert_eq!(v.warnings, vec!["missing embedding_model".to_string()]);
    }

    #[test]
    fn test_hard_rules_fail() {
        let mut row = aggregate(7, Some("user"), "   ", message_enrichment(vec![]));
        row.entity.session_id.clear();
        let v = evaluate(&row, false, "r", "now");
        assert_eq!(v.status, ValidationStatus::Failed);
        assert_eq!(v.errors.len(), 3);
        assert_eq!(v.score, 0.4);
    }

    #[test]
    fn test_empty_tool_output_is_exempt() {
        let mut enrichment = message_enrichment(vec![]);
        enrichment.emotion = None;
        let row = aggregate(5, Some("tool"), "", enrichment);
        assert_eq!(evaluate(&row, false, "r", "now").status, ValidationStatus::Passed);
    }

    #[test]
    fn test_strict_requires_date_and_fingerprint() {
        let row = aggregate(1, None, "word", Enrichment::default());
        let v = evaluate(&row, true, "r", "now");
        assert_eq!(v.status, ValidationStatus::Failed);
        assert_eq!(v.errors, vec!["missing content_date".to_string()]);
    }
}
