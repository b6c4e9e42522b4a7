//! Verification probes
//!
//! One probe per stage. A probe runs a handful of read-only queries against
//! the stage's output and reports PASS/FAIL per check with one actionable
//! sentence per failure. Probes never return an error: a query that cannot
//! run becomes a failed check.

use rusqlite::types::Value;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::linkage::{self, Scope};
use crate::stages;
use crate::warehouse::{Table, TableName, Warehouse};

/// Texts shorter than this are reported, never failed.
const ADVISORY_MIN_TEXT: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
    /// What to do about a failure.
    pub action: Option<String>,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
            action: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
            action: Some(action.into()),
        }
    }

    fn broken(name: &'static str, error: &Error) -> Self {
        Self::fail(
            name,
            format!("{} ({})", error.plain(), error),
            "Check the warehouse settings and that the run id is right, then verify again.",
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub stage: u8,
    pub name: &'static str,
    pub run_id: Option<String>,
    pub checks: Vec<Check>,
}

impl ProbeReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {} ({})", self.stage, self.name)?;
        if let Some(run_id) = &self.run_id {
            write!(f, " for run {}", run_id)?;
        }
        writeln!(f)?;
        for check in &self.checks {
            let mark = if check.passed { "✅ PASS" } else { "❌ FAIL" };
            writeln!(f, "  {} {}: {}", mark, check.name, check.detail)?;
            if let Some(action) = &check.action {
                writeln!(f, "         → {}", action)?;
            }
        }
        Ok(())
    }
}

/// `run_id = ?1` when scoped to a run, otherwise a tautology.
fn run_filter(run_id: Option<&str>, alias: &str) -> (String, Vec<Value>) {
    match run_id {
        Some(id) => (format!("{alias}.run_id = ?1"), vec![Value::from(id.to_string())]),
        None => ("1 = 1".to_string(), Vec::new()),
    }
}

/// Column that identifies a row and the columns it must be unique over.
fn unique_key(stage: u8) -> Option<(&'static str, &'static str)> {
    match stage {
        1 | 2 => Some(("extraction_id", "run_id, extraction_id")),
        3 | 4 | 9..=12 => Some(("entity_id", "run_id, entity_id")),
        5..=8 | 14 | 15 => Some(("entity_id", "run_id, level, entity_id")),
        13 => Some(("relationship_id", "run_id, relationship_id")),
        16 => Some(("entity_id", "entity_id")),
        _ => None,
    }
}

fn holds_entities(stage: u8) -> bool {
    matches!(stage, 5..=8 | 14 | 16)
}

fn holds_levels(stage: u8) -> bool {
    matches!(stage, 5..=8 | 14..=16)
}

pub struct Verifier<'w> {
    warehouse: &'w Warehouse,
    assessment_dir: PathBuf,
}

impl<'w> Verifier<'w> {
    pub fn new(warehouse: &'w Warehouse, assessment_dir: PathBuf) -> Self {
        Self {
            warehouse,
            assessment_dir,
        }
    }

    pub fn verify_all(&self, run_id: Option<&str>) -> Vec<ProbeReport> {
        stages::EXECUTION_ORDER
            .iter()
            .map(|&n| self.verify_stage(n, run_id))
            .collect()
    }

    /// Probe one stage. Unknown stage numbers yield a single failed check.
    pub fn verify_stage(&self, stage: u8, run_id: Option<&str>) -> ProbeReport {
        let Some(def) = stages::stage(stage) else {
            return ProbeReport {
                stage,
                name: "unknown",
                run_id: run_id.map(String::from),
                checks: vec![Check::fail(
                    "stage",
                    format!("there is no stage {}", stage),
                    "Pick a stage between 0 and 16.",
                )],
            };
        };
        let checks = match def.output {
            None => vec![self.check_manifest(run_id)],
            Some(table) => self.table_checks(stage, table, run_id),
        };
        ProbeReport {
            stage,
            name: def.name,
            run_id: run_id.map(String::from),
            checks,
        }
    }

    fn table_checks(&self, stage: u8, table: Table, run_id: Option<&str>) -> Vec<Check> {
        let name = match self.warehouse.name(table) {
            Ok(name) => name,
            Err(e) => return vec![Check::broken("table exists", &e)],
        };
        match self.warehouse.exists(table) {
            Ok(true) => {}
            Ok(false) => {
                return vec![Check::fail(
                    "table exists",
                    format!("{} does not exist", name),
                    format!("Run stage {} first.", stage),
                )]
            }
            Err(e) => return vec![Check::broken("table exists", &e)],
        }

        let mut checks = vec![Check::pass("table exists", name.to_string())];
        checks.push(guard("rows present", || self.rows_present(stage, table, run_id)));
        if let Some((id, key)) = unique_key(stage) {
            checks.push(guard("unique ids", || self.unique_ids(&name, id, key, run_id)));
        }
        if holds_levels(stage) {
            checks.push(guard("levels valid", || self.levels_valid(&name, run_id)));
        }
        if holds_entities(stage) {
            checks.push(guard("text present", || self.text_present(&name, run_id)));
        }
        match stage {
            2 => checks.push(guard("duplicates flagged", || self.duplicates_flagged(&name, run_id))),
            5..=8 => checks.push(guard("parents exist", || self.parents_exist(table, Scope::LevelTables, run_id))),
            14 => checks.push(guard("parents exist", || self.parents_exist(table, Scope::Aggregate, run_id))),
            15 => checks.push(guard("verdicts", || self.verdicts(&name, run_id))),
            16 => checks.push(guard("promotable only", || self.promotable_only(&name, run_id))),
            _ => {}
        }
        checks.push(guard("dead letters", || self.dead_letters(stage, run_id)));
        checks
    }

    fn rows_present(&self, stage: u8, table: Table, run_id: Option<&str>) -> Result<Check> {
        let rows = self.warehouse.count_rows(table, run_id)?;
        if rows > 0 {
            return Ok(Check::pass("rows present", format!("{} row(s)", rows)));
        }
        Ok(Check::fail(
            "rows present",
            match run_id {
                Some(id) => format!("no rows for run {}", id),
                None => "the table is empty".to_string(),
            },
            format!("Run stage {} for this run, then verify again.", stage),
        ))
    }

    fn unique_ids(&self, name: &TableName, id: &str, key: &str, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "t");
        let sql = format!(
            "SELECT t.{id} FROM {name} t WHERE {filter} GROUP BY {key} HAVING COUNT(*) > 1 ORDER BY t.{id}"
        );
        let dupes = self.warehouse.column_values(&sql, params)?;
        match dupes.first() {
            None => Ok(Check::pass("unique ids", format!("every {} is unique", id))),
            Some(first) => Ok(Check::fail(
                "unique ids",
                format!("{} {} value(s) repeat; first: {}", dupes.len(), id, first),
                "Roll this stage back for the run and run it again.",
            )),
        }
    }

    fn levels_valid(&self, name: &TableName, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "t");
        let sql = format!(
            "SELECT t.entity_id FROM {name} t WHERE {filter} AND t.level NOT IN (1, 4, 5, 6, 8) ORDER BY t.entity_id LIMIT 1"
        );
        match self.warehouse.column_values(&sql, params)?.first() {
            None => Ok(Check::pass("levels valid", "all levels are 1, 4, 5, 6 or 8")),
            Some(first) => Ok(Check::fail(
                "levels valid",
                format!("entity {} has a reserved level", first),
                "Roll the run back; a stage wrote a level it should not have.",
            )),
        }
    }

    fn text_present(&self, name: &TableName, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "t");
        let sql = format!(
            "SELECT t.entity_id FROM {name} t WHERE {filter} AND trim(t.text) = ''
               AND (t.role IS NULL OR t.role NOT IN ('tool', 'summary'))
             ORDER BY t.entity_id LIMIT 1"
        );
        if let Some(first) = self.warehouse.column_values(&sql, params.clone())?.first() {
            return Ok(Check::fail(
                "text present",
                format!("entity {} has empty text", first),
                "Look at the source record for this entity; only tool output and summaries may be empty.",
            ));
        }
        let short: i64 = self.warehouse.query_row(
            &format!(
                "SELECT COUNT(*) FROM {name} t WHERE {filter} AND length(trim(t.text)) < {ADVISORY_MIN_TEXT}"
            ),
            rusqlite::params_from_iter(params),
            |row| row.get(0),
        )?;
        Ok(Check::pass(
            "text present",
            format!("no empty text; {} row(s) shorter than {} chars", short, ADVISORY_MIN_TEXT),
        ))
    }

    /// Every flagged duplicate has an earlier unflagged copy, and no
    /// fingerprint is unflagged twice.
    fn duplicates_flagged(&self, name: &TableName, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "c");
        let sql = format!(
            "SELECT c.extraction_id FROM {name} c
             WHERE {filter} AND c.is_duplicate = 1
               AND NOT EXISTS (
                 SELECT 1 FROM {name} e
                 WHERE e.run_id = c.run_id AND e.fingerprint = c.fingerprint AND e.is_duplicate = 0
                   AND (e.session_id < c.session_id
                        OR (e.session_id = c.session_id AND e.message_index < c.message_index)))
             ORDER BY c.extraction_id LIMIT 1"
        );
        if let Some(first) = self.warehouse.column_values(&sql, params.clone())?.first() {
            return Ok(Check::fail(
                "duplicates flagged",
                format!("{} is flagged duplicate but has no earlier original", first),
                "Roll stage 2 back for the run and run it again.",
            ));
        }
        let (filter, params) = run_filter(run_id, "c");
        let sql = format!(
            "SELECT MIN(c.extraction_id) FROM {name} c WHERE {filter} AND c.is_duplicate = 0
             GROUP BY c.run_id, c.fingerprint HAVING COUNT(*) > 1 ORDER BY 1 LIMIT 1"
        );
        match self.warehouse.column_values(&sql, params)?.first() {
            None => Ok(Check::pass("duplicates flagged", "every repeat is flagged after its first copy")),
            Some(first) => Ok(Check::fail(
                "duplicates flagged",
                format!("{} shares its fingerprint with another unflagged row", first),
                "Roll stage 2 back for the run and run it again.",
            )),
        }
    }

    fn parents_exist(&self, table: Table, scope: Scope, run_id: Option<&str>) -> Result<Check> {
        let Some(run_id) = run_id else {
            return Ok(Check::pass("parents exist", "skipped; pass --run-id to check parent links"));
        };
        let report = linkage::check(self.warehouse, run_id, scope)?;
        let broken: Vec<String> = report
            .pairs
            .iter()
            .filter(|p| scope.table(p.child) == table && p.orphans > 0)
            .map(|p| p.to_string())
            .collect();
        if broken.is_empty() {
            return Ok(Check::pass("parents exist", "every parent_id resolves in this run"));
        }
        Ok(Check::fail(
            "parents exist",
            broken.join("; "),
            "Rerun the parent stage for this run, then this stage.",
        ))
    }

    fn verdicts(&self, name: &TableName, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "t");
        let mut counts = Vec::new();
        self.warehouse.fetch_stream(
            &format!(
                "SELECT t.validation_status, COUNT(*) FROM {name} t WHERE {filter}
                 GROUP BY t.validation_status ORDER BY t.validation_status"
            ),
            rusqlite::params_from_iter(params),
            |row| {
                counts.push(format!("{} {}", row.get::<_, i64>(1)?, row.get::<_, String>(0)?));
                Ok(())
            },
        )?;
        Ok(Check::pass("verdicts", counts.join(", ")))
    }

    fn promotable_only(&self, name: &TableName, run_id: Option<&str>) -> Result<Check> {
        let (filter, params) = run_filter(run_id, "t");
        let sql = format!(
            "SELECT t.entity_id FROM {name} t WHERE {filter} AND t.validation_status = 'FAILED'
             ORDER BY t.entity_id LIMIT 1"
        );
        match self.warehouse.column_values(&sql, params)?.first() {
            None => Ok(Check::pass("promotable only", "no FAILED entity was promoted")),
            Some(first) => Ok(Check::fail(
                "promotable only",
                format!("FAILED entity {} is in entity_unified", first),
                "Roll back the promoted rows of this run and promote again.",
            )),
        }
    }

    fn dead_letters(&self, stage: u8, run_id: Option<&str>) -> Result<Check> {
        let dlq = Table::Dlq(stage);
        if !self.warehouse.exists(dlq)? {
            return Ok(Check::pass("dead letters", "no dead-letter table"));
        }
        let rows = self.warehouse.count_rows(dlq, run_id)?;
        Ok(Check::pass(
            "dead letters",
            format!("{} row(s) in {}", rows, self.warehouse.name(dlq)?),
        ))
    }

    fn check_manifest(&self, run_id: Option<&str>) -> Check {
        guard("manifest", || {
            let pattern = match run_id {
                Some(id) => format!("assessment_{}.json", id),
                None => "assessment_*.json".to_string(),
            };
            let full = self.assessment_dir.join(&pattern);
            let mut found: Vec<PathBuf> = glob::glob(&full.to_string_lossy())
                .map_err(|e| Error::Config(e.to_string()))?
                .filter_map(|entry| entry.ok())
                .collect();
            found.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
            let Some(latest) = found.last() else {
                return Ok(Check::fail(
                    "manifest",
                    format!("no {} under {}", pattern, self.assessment_dir.display()),
                    "Run discovery (spine discover) first.",
                ));
            };
            let manifest: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(latest)?)?;
            let verdict = manifest["go_no_go"].as_str().unwrap_or("").to_string();
            if verdict.starts_with("NO-GO") {
                return Ok(Check::fail(
                    "manifest",
                    format!("{}: {}", latest.display(), verdict),
                    "Fix the issues in the manifest's recommendations and run discovery again.",
                ));
            }
            Ok(Check::pass("manifest", format!("{}: {}", latest.display(), verdict)))
        })
    }
}

/// Run one check, turning an error into a failed check.
fn guard<F>(name: &'static str, check: F) -> Check
where
    F: FnOnce() -> Result<Check>,
{
    check().unwrap_or_else(|e| Check::broken(name, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::warehouse::{EntityRow, Level};
    use serde_json::json;

    fn entity(id: &str, level: Level, parent: Option<&str>, text: &str) -> EntityRow {
        EntityRow {
            entity_id: id.into(),
            parent_id: parent.map(String::from),
            session_id: "s".into(),
            level: level.as_i64(),
            text: text.into(),
            content_date: None,
            source_name: "claude_code".into(),
            run_id: "r".into(),
            created_at: "now".into(),
            fingerprint: None,
            metadata: json!({}),
            role: None,
            message_index: None,
            ordinal: 0,
        }
    }

    fn warehouse() -> Warehouse {
        let wh = Warehouse::open_in_memory("proj", "ds", &WarehouseConfig::default()).unwrap();
        wh.ensure(Table::Stage(8)).unwrap();
        wh.ensure(Table::Stage(7)).unwrap();
        wh.append(Table::Stage(8), &[entity("c", Level::Conversation, None, "a conversation")])
            .unwrap();
        wh
    }

    #[test]
    fn test_missing_table_fails_without_error() {
        let wh = warehouse();
        let verifier = Verifier::new(&wh, PathBuf::from("/nonexistent"));
        let report = verifier.verify_stage(5, Some("r"));
        assert!(!report.passed());
        assert_eq!(report.checks.len(), 1);
        assert!(report.checks[0].action.is_some());
    }

    #[test]
    fn test_healthy_stage_passes() {
        let wh = warehouse();
        wh.append(Table::Stage(7), &[entity("m", Level::Message, Some("c"), "hi!")]).unwrap();
        let verifier = Verifier::new(&wh, PathBuf::from("/nonexistent"));
        let report = verifier.verify_stage(7, Some("r"));
        assert!(report.passed(), "{}", report);
        let text = report.checks.iter().find(|c| c.name == "text present").unwrap();
        assert!(text.detail.contains("1 row(s) shorter"));
    }

    #[test]
    fn test_orphan_is_named() {
        let wh = warehouse();
        wh.append(Table::Stage(7), &[entity("m", Level::Message, Some("gone"), "hello there")])
            .unwrap();
        let verifier = Verifier::new(&wh, PathBuf::from("/nonexistent"));
        let report = verifier.verify_stage(7, Some("r"));
        let parents = report.checks.iter().find(|c| c.name == "parents exist").unwrap();
        assert!(!parents.passed);
        assert!(parents.detail.contains("(e.g. m)"));
        assert!(report.to_string().contains("❌ FAIL parents exist"));
    }

    #[test]
    fn test_empty_text_fails() {
        let wh = warehouse();
        wh.append(Table::Stage(7), &[entity("m", Level::Message, Some("c"), "  ")]).unwrap();
        let verifier = Verifier::new(&wh, PathBuf::from("/nonexistent"));
        let report = verifier.verify_stage(7, None);
        let text = report.checks.iter().find(|c| c.name == "text present").unwrap();
        assert!(!text.passed);
        assert!(text.detail.contains("entity m"));
    }

    #[test]
    fn test_manifest_probe() {
        let dir = tempfile::tempdir().unwrap();
        let wh = warehouse();
        let verifier = Verifier::new(&wh, dir.path().to_path_buf());
        assert!(!verifier.verify_stage(0, Some("r")).passed());

        std::fs::write(
            dir.path().join("assessment_r.json"),
            r#"{"go_no_go": "GO: Data ready for processing"}"#,
        )
        .unwrap();
        assert!(verifier.verify_stage(0, Some("r")).passed());
        assert!(verifier.verify_stage(0, None).passed());
    }

    #[test]
    fn test_unknown_stage() {
        let wh = warehouse();
        let verifier = Verifier::new(&wh, PathBuf::from("/nonexistent"));
        assert!(!verifier.verify_stage(42, None).passed());
    }
}
