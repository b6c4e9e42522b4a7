//! S10 Intent: intent / task-type annotations for L5 messages.
//!
//! User messages longer than a few words go to the language model when one
//! is configured; everything else, and every message when no API key is set,
//! gets the deterministic heuristic.

use std::time::Duration;
use tracing::{info, warn};

use crate::context::StageContext;
use crate::enrich::intent::{self, IntentExtraction};
use crate::error::Result;
use crate::llm::{retry_with_backoff, Backoff, LanguageModel};
use crate::text::truncate_chars;
use crate::warehouse::{EntityRow, IntentRow, Table};

use super::fetch_entities;

/// Shorter user messages are not worth a model call.
pub const MIN_LLM_CHARS: usize = 10;

/// Consecutive exhausted-retry failures after which the model is skipped
/// for the rest of the stage.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub const METHOD_LLM: &str = "llm";
pub const METHOD_HEURISTIC: &str = "heuristic";

pub fn wants_model(message: &EntityRow) -> bool {
    message.role.as_deref() == Some("user") && message.text.trim().chars().count() > MIN_LLM_CHARS
}

fn row(
    message: &EntityRow,
    extraction: IntentExtraction,
    method: &str,
    raw: Option<String>,
    run_id: &str,
    now: &str,
) -> IntentRow {
    IntentRow {
        entity_id: message.entity_id.clone(),
        run_id: run_id.to_string(),
        intent: extraction.intent,
        task_type: extraction.task_type,
        code_languages: extraction.code_languages,
        complexity: extraction.complexity,
        has_code_block: extraction.has_code_block,
        method: method.to_string(),
        raw_response: raw,
        created_at: now.to_string(),
    }
}

pub fn run(stage: &mut StageContext<'_>) -> Result<()> {
    run_with_sleep(stage, std::thread::sleep)
}

/// Stage body with an injectable sleep for the retry backoff.
pub fn run_with_sleep<S>(stage: &mut StageContext<'_>, mut sleep: S) -> Result<()>
where
    S: FnMut(Duration),
{
    let messages = fetch_entities(stage, 7)?;
    stage.counters.rows_in = messages.len() as u64;

    let config = stage.config();
    let policy = Backoff::from(&config.llm.backoff);
    let max_chars = config.llm.max_input_chars;
    let batch_size = stage.batch_size();
    let ctx = stage.ctx;
    let mut model: Option<&dyn LanguageModel> = ctx.llm.as_deref();
    if model.is_none() {
        info!(run_id = stage.run_id, "no language model configured; using heuristic intents");
    }

    let now = stage.now();
    let mut failures = 0u32;
    let mut batch = Vec::with_capacity(batch_size);
    for message in &messages {
        let llm = model.filter(|_| wants_model(message));
        let annotated = match llm {
            Some(llm) => {
                stage.checkpoint()?;
                let (input, _) = truncate_chars(&message.text, max_chars);
                let prompt = intent::prompt(input);
                match retry_with_backoff(&policy, &mut sleep, || llm.complete(&prompt)) {
                    Ok(answer) => {
                        failures = 0;
                        match intent::parse_answer(&answer) {
                            Some(extraction) => row(message, extraction, METHOD_LLM, None, stage.run_id, &now),
                            // keep the raw answer so it can be reprocessed
                            None => row(
                                message,
                                IntentExtraction::default(),
                                METHOD_LLM,
                                Some(answer),
                                stage.run_id,
                                &now,
                            ),
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        // dead-lettered for re-drive; the heuristic row still lands
                        stage.dead_letter(Some(message.entity_id.clone()), &e)?;
                        stage.warn(&format!(
                            "intent model failed for {}: {}; using heuristic",
                            message.entity_id, e
                        ));
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            warn!(run_id = stage.run_id, failures, "language model keeps failing; skipping it for the rest of the stage");
                            model = None;
                        }
                        row(message, intent::heuristic(&message.text), METHOD_HEURISTIC, None, stage.run_id, &now)
                    }
                }
            }
            None => row(message, intent::heuristic(&message.text), METHOD_HEURISTIC, None, stage.run_id, &now),
        };
        batch.push(annotated);
        if batch.len() >= batch_size {
            stage.checkpoint()?;
            stage.write(Table::Stage(10), &batch)?;
            batch.clear();
        }
    }
    stage.write(Table::Stage(10), &batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WarehouseConfig};
    use crate::context::{PipelineContext, RunOptions};
    use crate::error::Error;
    use crate::warehouse::{DeadLetterRow, Warehouse};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        answer: std::result::Result<&'static str, ()>,
        calls: Arc<AtomicUsize>,
    }

    impl LanguageModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Ok(a) => Ok(a.to_string()),
                Err(()) => Err(Error::LlmUnavailable("down".into())),
            }
        }
    }

    fn message(id: &str, role: &str, text: &str) -> EntityRow {
        EntityRow {
            entity_id: id.into(),
            parent_id: Some("c".into()),
            session_id: "s".into(),
            level: 5,
            text: text.into(),
            content_date: None,
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: Some("f".into()),
            metadata: json!({}),
            role: Some(role.into()),
            message_index: Some(0),
            ordinal: 0,
        }
    }

    fn context(answer: std::result::Result<&'static str, ()>, calls: Arc<AtomicUsize>) -> PipelineContext {
        let warehouse = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        warehouse.ensure(Table::Stage(7)).unwrap();
        warehouse.ensure(Table::Stage(10)).unwrap();
        warehouse.ensure(Table::Dlq(10)).unwrap();
        warehouse
            .append(
                Table::Stage(7),
                &[
                    message("m1", "user", "Please fix the failing parser test"),
                    message("m2", "assistant", "Done, the test passes now."),
                    message("m3", "user", "thanks"),
                ],
            )
            .unwrap();
        PipelineContext::new(Config::default(), warehouse, RunOptions::default())
            .with_llm(Box::new(Scripted { answer, calls }))
    }

    fn rows(ctx: &PipelineContext) -> Vec<IntentRow> {
        ctx.warehouse.fetch(Table::Stage(10), "r", "entity_id").unwrap()
    }

    #[test]
    fn test_only_long_user_messages_reach_the_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(
            Ok("{\"intent\":\"instruction\",\"task_type\":\"testing\",\"code_languages\":[],\"complexity\":\"simple\",\"has_code_block\":false}"),
            calls.clone(),
        );
        let mut stage = StageContext::new(&ctx, "r", 10);
        run_with_sleep(&mut stage, |_| {}).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let rows = rows(&ctx);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].method, METHOD_LLM);
        assert_eq!(rows[0].task_type.as_deref(), Some("testing"));
        assert_eq!(rows[1].method, METHOD_HEURISTIC);
        assert_eq!(rows[2].method, METHOD_HEURISTIC);
    }

    #[test]
    fn test_unparseable_answer_keeps_raw_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(Ok("I would call this an instruction."), calls);
        let mut stage = StageContext::new(&ctx, "r", 10);
        run_with_sleep(&mut stage, |_| {}).unwrap();

        let first = &rows(&ctx)[0];
        assert_eq!(first.intent, None);
        assert_eq!(first.raw_response.as_deref(), Some("I would call this an instruction."));
    }

    #[test]
    fn test_persistent_failure_is_dead_lettered_and_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(Err(()), calls.clone());
        let mut stage = StageContext::new(&ctx, "r", 10);
        let mut slept = 0;
        run_with_sleep(&mut stage, |_| slept += 1).unwrap();
        stage.flush_dead_letters().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(slept, 5);
        assert_eq!(stage.counters.warnings, 1);
        assert_eq!(stage.counters.rows_dlq, 1);

        let dead: Vec<DeadLetterRow> = ctx.warehouse.fetch(Table::Dlq(10), "r", "created_at").unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].input_fingerprint.as_deref(), Some("m1"));
        assert!(matches!(dead[0].error_kind.as_str(), "LLMUnavailable" | "LLMRateLimited"));

        let first = &rows(&ctx)[0];
        assert_eq!(first.method, METHOD_HEURISTIC);
        assert_eq!(first.intent.as_deref(), Some("instruction"));
    }
}
