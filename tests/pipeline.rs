//! End-to-end runs over real session files.

mod common;

use std::collections::BTreeSet;

use serde_json::json;
use tempfile::TempDir;

use common::{hello_world_source, run_all, run_window, session_lines, write_session, Harness};
use spine::executor::Executor;
use spine::ledger::{RunTracker, Status};
use spine::stages::{self, discovery, messages};
use spine::warehouse::{
    CleanedRow, DeadLetterRow, EntityRow, ExtractionRow, Level, Table, UnifiedRow, ValidationRow,
    ValidationStatus,
};
use spine::{rollback, Error, RunOptions, Warehouse};

fn entities(warehouse: &Warehouse, stage: u8, run_id: &str) -> Vec<EntityRow> {
    warehouse
        .fetch(Table::Stage(stage), run_id, "level DESC, message_index, ordinal")
        .unwrap()
}

fn unified_ids(warehouse: &Warehouse) -> BTreeSet<String> {
    let name = warehouse.name(Table::EntityUnified).unwrap();
    warehouse
        .column_values(&format!("SELECT entity_id FROM {}", name), vec![])
        .unwrap()
        .into_iter()
        .collect()
}

fn unified_rows(warehouse: &Warehouse, run_id: &str) -> Vec<UnifiedRow> {
    warehouse.fetch(Table::EntityUnified, run_id, "entity_id").unwrap()
}

#[test]
fn test_empty_corpus_is_no_go_and_writes_nothing() {
    let source = TempDir::new().unwrap();
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    let executor = Executor::new(&ctx).unwrap();
    let run_id = executor.begin_run(Some("empty"), json!({})).unwrap();

    let (manifest, _) = executor.run_with(&run_id, 0, discovery::execute).unwrap();
    assert!(manifest.go_no_go.starts_with("NO-GO"));
    assert_eq!(manifest.summary.total_files_discovered, 0);
    assert_eq!(manifest.gate().unwrap_err().exit_code(), 2);

    let err = executor.run_stage(&run_id, 1).unwrap_err();
    assert!(matches!(err, Error::InputMissing(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(ctx.warehouse.count_rows(Table::Stage(1), Some(&run_id)).unwrap(), 0);
}

#[test]
fn test_run_command_stops_on_empty_corpus() {
    let source = TempDir::new().unwrap();
    let harness = Harness::new(source.path());
    let ctx = harness.context();

    let err = spine::cli::run::run(&ctx, Some("empty"), None, None).unwrap_err();
    let err = err.downcast_ref::<Error>().unwrap();
    assert_eq!(err.exit_code(), 2);
    assert!(!ctx.warehouse.exists(Table::Stage(1)).unwrap());

    let tracker = RunTracker::open_existing(&ctx.warehouse).unwrap();
    let last = tracker.entries("empty").unwrap().pop().unwrap();
    assert_eq!(last.event, "run_finished");
    assert_eq!(last.status.as_deref(), Some(Status::Failed.as_str()));
}

#[test]
fn test_single_session_two_messages() {
    let source = hello_world_source();
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    let reports = run_all(&ctx, "r1").unwrap();
    assert_eq!(reports.len(), stages::EXECUTION_ORDER.len());

    let wh = &ctx.warehouse;
    assert_eq!(entities(wh, 8, "r1").len(), 1);
    assert_eq!(entities(wh, 6, "r1").len(), 1);
    let messages = entities(wh, 7, "r1");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "hello world");
    assert_eq!(messages[1].text, "hi!");
    let tokens = entities(wh, 5, "r1");
    assert_eq!(tokens.len(), 4);
    assert!(tokens.iter().all(|t| t.level == Level::Token.as_i64()));

    let verdicts: Vec<ValidationRow> = wh.fetch(Table::Stage(15), "r1", "entity_id").unwrap();
    assert_eq!(verdicts.len(), 8);
    for verdict in &verdicts {
        assert_eq!(verdict.status, ValidationStatus::Passed, "{:?}", verdict);
    }

    let unified = unified_rows(wh, "r1");
    assert_eq!(unified.len(), 4 + tokens.len());
    assert!(unified.iter().all(|u| u.validation_status == ValidationStatus::Passed));
}

#[test]
fn test_duplicate_message_is_flagged_and_dropped() {
    let source = TempDir::new().unwrap();
    write_session(
        source.path(),
        "dup.jsonl",
        &session_lines(&[
            ("user", "run the tests"),
            ("assistant", "all green"),
            ("user", "run the tests"),
        ]),
    );
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    run_all(&ctx, "r1").unwrap();

    let cleaned: Vec<CleanedRow> = ctx
        .warehouse
        .fetch(Table::Stage(2), "r1", "session_id, message_index")
        .unwrap();
    let flags: Vec<bool> = cleaned.iter().map(|c| c.is_duplicate).collect();
    assert_eq!(flags, vec![false, false, true]);

    let messages = entities(&ctx.warehouse, 7, "r1");
    assert_eq!(messages.len(), 2);
    let runs = messages.iter().filter(|m| m.text == "run the tests").count();
    assert_eq!(runs, 1);
}

#[test]
fn test_malformed_line_goes_to_dead_letters() {
    let source = TempDir::new().unwrap();
    let mut body = String::new();
    for i in 0..100 {
        if i == 42 {
            body.push_str("{not json at all\n");
        } else {
            let kind = if i % 2 == 0 { "user" } else { "assistant" };
            body.push_str(&json!({ "type": kind, "content": format!("message number {}", i) }).to_string());
            body.push('\n');
        }
    }
    write_session(source.path(), "noisy.jsonl", &body);
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    let reports = run_all(&ctx, "r1").unwrap();
    assert_eq!(reports.last().unwrap().stage, 16);

    let extracted: Vec<ExtractionRow> = ctx.warehouse.fetch(Table::Stage(1), "r1", "message_index").unwrap();
    assert_eq!(extracted.len(), 99);
    let dead: Vec<DeadLetterRow> = ctx.warehouse.fetch(Table::Dlq(1), "r1", "created_at").unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].error_kind, "ParseFailed");
    assert!(ctx.warehouse.count_rows(Table::EntityUnified, Some("r1")).unwrap() > 0);
}

#[test]
fn test_interrupted_run_resumes_to_same_state() {
    let source = hello_world_source();

    let uninterrupted = Harness::new(source.path());
    let clean_ctx = uninterrupted.context();
    run_all(&clean_ctx, "r1").unwrap();
    let expected = unified_ids(&clean_ctx.warehouse);

    let interrupted = Harness::new(source.path());
    let ctx = interrupted.context();
    let before: Vec<u8> = stages::window(None, Some(8)).unwrap();
    run_window(&ctx, "r1", &before).unwrap();

    // half of S7 lands, then the stage dies
    let executor = Executor::new(&ctx).unwrap();
    let err = executor
        .run_with("r1", 7, |stage| -> spine::Result<()> {
            messages::run(stage)?;
            Err(Error::Timeout { stage: 7, budget_secs: 0 })
        })
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(ctx.warehouse.count_rows(Table::Stage(7), Some("r1")).unwrap(), 2);

    let rest = stages::window(Some(7), None).unwrap();
    executor.run_pipeline("r1", &rest).unwrap();
    assert_eq!(ctx.warehouse.count_rows(Table::Stage(7), Some("r1")).unwrap(), 2);
    assert_eq!(unified_ids(&ctx.warehouse), expected);

    let texts = |wh: &Warehouse| -> Vec<(String, String)> {
        unified_rows(wh, "r1")
            .into_iter()
            .map(|u| (u.aggregate.entity.entity_id, u.aggregate.entity.text))
            .collect()
    };
    assert_eq!(texts(&ctx.warehouse), texts(&clean_ctx.warehouse));
}

#[test]
fn test_rollback_after_promotion_then_rerun() {
    let source = hello_world_source();
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    run_all(&ctx, "r1").unwrap();
    let promoted = unified_ids(&ctx.warehouse);
    assert!(!promoted.is_empty());

    let plan = rollback::plan(&ctx.warehouse, "r1", None, true).unwrap();
    let removed = rollback::execute(&ctx.warehouse, &plan).unwrap();
    assert_eq!(removed, plan.total_rows());
    for stage in Table::STAGES_WITH_TABLES {
        assert_eq!(ctx.warehouse.count_rows(Table::Stage(stage), Some("r1")).unwrap(), 0);
    }
    assert_eq!(ctx.warehouse.count_rows(Table::EntityUnified, None).unwrap(), 0);

    run_all(&ctx, "r2").unwrap();
    assert_eq!(unified_ids(&ctx.warehouse), promoted);
}

#[test]
fn test_dry_run_counts_without_writing() {
    let source = hello_world_source();
    let harness = Harness::new(source.path());
    let ctx = harness.context_with(RunOptions {
        dry_run: true,
        ..RunOptions::default()
    });
    let reports = run_all(&ctx, "dry").unwrap();
    let extract = reports.iter().find(|r| r.stage == 1).unwrap();
    assert_eq!(extract.counters.rows_out, 2);
    assert!(!ctx.warehouse.exists(Table::Stage(1)).unwrap());
    assert!(!ctx.warehouse.exists(Table::Ledger).unwrap());
}

#[test]
fn test_stage_out_of_order_is_refused() {
    let source = hello_world_source();
    let harness = Harness::new(source.path());
    let ctx = harness.context();
    run_window(&ctx, "r1", &[0, 1, 2]).unwrap();

    let executor = Executor::new(&ctx).unwrap();
    let err = executor.run_stage("r1", 4).unwrap_err();
    assert!(matches!(err, Error::OutOfOrder { stage: 4, .. }));
}
