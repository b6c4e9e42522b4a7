//! Run tracker: an append-only ledger of run and stage events.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::mint;
use crate::warehouse::{Table, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    RunStarted,
    RunFinished,
    StageStarted,
    StageFinished,
    Diagnostic,
    Rollback,
    Promotion,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RunStarted => "run_started",
            Event::RunFinished => "run_finished",
            Event::StageStarted => "stage_started",
            Event::StageFinished => "stage_finished",
            Event::Diagnostic => "diagnostic",
            Event::Rollback => "rollback",
            Event::Promotion => "promotion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Success,
    Failed,
    Timeout,
    DryRun,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
            Status::DryRun => "dry_run",
        }
    }
}

/// Per-stage counters propagated to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounters {
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_dlq: u64,
    pub elapsed_ms: u64,
    pub warnings: u64,
}

/// A ledger row as read back for reporting.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub event_id: i64,
    pub run_id: String,
    pub stage: Option<i64>,
    pub event: String,
    pub status: Option<String>,
    pub counters: Option<serde_json::Value>,
    pub detail: Option<String>,
    pub recorded_at: String,
}

pub struct RunTracker<'w> {
    warehouse: &'w Warehouse,
}

impl<'w> RunTracker<'w> {
    /// Creates the ledger table if needed.
    pub fn new(warehouse: &'w Warehouse) -> Result<Self> {
        warehouse.ensure(Table::Ledger)?;
        Ok(Self { warehouse })
    }

    /// Read-only tracker; fails with `InputMissing` when there is no ledger yet.
    pub fn open_existing(warehouse: &'w Warehouse) -> Result<Self> {
        if !warehouse.exists(Table::Ledger)? {
            return Err(Error::InputMissing(
                "the run ledger does not exist yet; no pipeline has run against this dataset"
                    .to_string(),
            ));
        }
        Ok(Self { warehouse })
    }

    /// Start (or re-enter) a run. A fresh id is minted when none is given.
    pub fn begin_run(&self, run_id: Option<&str>, arguments: &serde_json::Value) -> Result<String> {
        let run_id = match run_id {
            Some(id) => id.to_string(),
            None => mint::mint_run_id(),
        };
        let invoker = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let detail = serde_json::json!({ "invoker": invoker, "arguments": arguments });
        self.record(&run_id, None, Event::RunStarted, Some(Status::Running), None, Some(&detail.to_string()))?;
        info!(run_id = %run_id, "run started");
        Ok(run_id)
    }

    pub fn begin_stage(&self, run_id: &str, stage: u8) -> Result<()> {
        self.record(run_id, Some(stage), Event::StageStarted, Some(Status::Running), None, None)
    }

    pub fn end_stage(
        &self,
        run_id: &str,
        stage: u8,
        counters: &StageCounters,
        status: Status,
    ) -> Result<()> {
        self.record(run_id, Some(stage), Event::StageFinished, Some(status), Some(counters), None)
    }

    pub fn diagnostic(&self, run_id: &str, stage: u8, error: &Error) -> Result<()> {
        let detail = serde_json::json!({
            "error_kind": error.kind(),
            "plain": error.plain(),
            "detail": error.to_string(),
        });
        self.record(
            run_id,
            Some(stage),
            Event::Diagnostic,
            Some(Status::Failed),
            None,
            Some(&detail.to_string()),
        )
    }

    pub fn end_run(&self, run_id: &str, status: Status) -> Result<()> {
        self.record(run_id, None, Event::RunFinished, Some(status), None, None)?;
        info!(run_id = %run_id, status = status.as_str(), "run finished");
        Ok(())
    }

    /// Append one event. The ledger is never updated in place.
    pub fn record(
        &self,
        run_id: &str,
        stage: Option<u8>,
        event: Event,
        status: Option<Status>,
        counters: Option<&StageCounters>,
        detail: Option<&str>,
    ) -> Result<()> {
        let ledger = self.warehouse.name(Table::Ledger)?;
        let counters = counters.map(serde_json::to_string).transpose()?;
        self.warehouse.execute(
            &format!(
                "INSERT INTO {} (run_id, stage, event, status, counters, detail, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                ledger
            ),
            params![
                run_id,
                stage.map(i64::from),
                event.as_str(),
                status.map(|s| s.as_str()),
                counters,
                detail,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// True when the latest outcome recorded for the stage is a success and
    /// no rollback has been recorded for it since.
    pub fn stage_succeeded(&self, run_id: &str, stage: u8) -> Result<bool> {
        let ledger = self.warehouse.name(Table::Ledger)?;
        let latest: Option<(String, Option<String>)> = self.warehouse.query_optional(
            &format!(
                "SELECT event, status FROM {}
                 WHERE run_id = ?1
                   AND ((stage = ?2 AND event = 'stage_finished')
                        OR (event = 'rollback' AND (stage IS NULL OR stage = ?2)))
                 ORDER BY event_id DESC LIMIT 1",
                ledger
            ),
            params![run_id, i64::from(stage)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(matches!(
            latest,
            Some((event, Some(status))) if event == "stage_finished" && status == "success"
        ))
    }

    pub fn entries(&self, run_id: &str) -> Result<Vec<LedgerEntry>> {
        let ledger = self.warehouse.name(Table::Ledger)?;
        let mut entries = Vec::new();
        self.warehouse.fetch_stream(
            &format!(
                "SELECT event_id, run_id, stage, event, status, counters, detail, recorded_at
                 FROM {} WHERE run_id = ?1 ORDER BY event_id",
                ledger
            ),
            params![run_id],
            |row| {
                let counters: Option<String> = row.get(5)?;
                entries.push(LedgerEntry {
                    event_id: row.get(0)?,
                    run_id: row.get(1)?,
                    stage: row.get(2)?,
                    event: row.get(3)?,
                    status: row.get(4)?,
                    counters: counters.and_then(|c| serde_json::from_str(&c).ok()),
                    detail: row.get(6)?,
                    recorded_at: row.get(7)?,
                });
                Ok(())
            },
        )?;
        Ok(entries)
    }

    /// Most recent runs, newest first, with their latest status.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<(String, String, Option<String>)>> {
        let ledger = self.warehouse.name(Table::Ledger)?;
        let mut runs = Vec::new();
        self.warehouse.fetch_stream(
            &format!(
                "SELECT l.run_id, MIN(l.recorded_at),
                        (SELECT status FROM {ledger} x
                         WHERE x.run_id = l.run_id AND x.event = 'run_finished'
                         ORDER BY x.event_id DESC LIMIT 1)
                 FROM {ledger} l
                 GROUP BY l.run_id
                 ORDER BY MAX(l.event_id) DESC
                 LIMIT ?1",
                ledger = ledger
            ),
            params![limit as i64],
            |row| {
                runs.push((row.get(0)?, row.get(1)?, row.get(2)?));
                Ok(())
            },
        )?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;

    fn warehouse() -> Warehouse {
        Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap()
    }

    #[test]
    fn test_begin_run_mints_when_absent() {
        let wh = warehouse();
        let tracker = RunTracker::new(&wh).unwrap();
        let run_id = tracker.begin_run(None, &serde_json::json!({})).unwrap();
        assert!(mint::is_well_formed(&run_id, mint::RUN_ID_WIDTH));
        assert_eq!(tracker.begin_run(Some("abc"), &serde_json::json!({})).unwrap(), "abc");
    }

    #[test]
    fn test_stage_success_tracks_latest_outcome() {
        let wh = warehouse();
        let tracker = RunTracker::new(&wh).unwrap();
        let counters = StageCounters::default();
        assert!(!tracker.stage_succeeded("r", 3).unwrap());

        tracker.begin_stage("r", 3).unwrap();
        tracker.end_stage("r", 3, &counters, Status::Failed).unwrap();
        assert!(!tracker.stage_succeeded("r", 3).unwrap());

        tracker.end_stage("r", 3, &counters, Status::Success).unwrap();
        assert!(tracker.stage_succeeded("r", 3).unwrap());
        assert!(!tracker.stage_succeeded("other", 3).unwrap());

        tracker
            .record("r", None, Event::Rollback, Some(Status::Success), None, None)
            .unwrap();
        assert!(!tracker.stage_succeeded("r", 3).unwrap());
    }

    #[test]
    fn test_entries_are_append_only_and_ordered() {
        let wh = warehouse();
        let tracker = RunTracker::new(&wh).unwrap();
        tracker.begin_run(Some("r"), &serde_json::json!({"from": 0})).unwrap();
        tracker.begin_stage("r", 1).unwrap();
        let counters = StageCounters {
            rows_in: 3,
            rows_out: 2,
            rows_dlq: 1,
            elapsed_ms: 5,
            warnings: 0,
        };
        tracker.end_stage("r", 1, &counters, Status::Success).unwrap();
        tracker
            .diagnostic("r", 2, &Error::InputMissing("stage_1".into()))
            .unwrap();
        tracker.end_run("r", Status::Failed).unwrap();

        let entries = tracker.entries("r").unwrap();
        let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["run_started", "stage_started", "stage_finished", "diagnostic", "run_finished"]
        );
        let stored: StageCounters =
            serde_json::from_value(entries[2].counters.clone().unwrap()).unwrap();
        assert_eq!(stored, counters);

        let runs = tracker.recent_runs(5).unwrap();
        assert_eq!(runs[0].0, "r");
        assert_eq!(runs[0].2.as_deref(), Some("failed"));
    }

    #[test]
    fn test_open_existing_requires_ledger() {
        let wh = warehouse();
        assert!(matches!(
            RunTracker::open_existing(&wh),
            Err(Error::InputMissing(_))
        ));
    }
}
