//! Warehouse adapter over SQLite
//!
//! The project is the main database file and the dataset is a second file
//! ATTACHed under the dataset's name, so stage tables are addressed as
//! `{dataset}.{stem}_stage_{n}`. All filter values are bound parameters;
//! table names only ever reach SQL as a validated [`TableName`].

mod budget;
mod name;
mod rows;
mod schema;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Params};
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, WarehouseConfig};
use crate::error::{Error, Result};

pub use budget::{JobBudget, JobKind};
pub use name::TableName;
pub use rows::{
    AggregateRow, CleanedRow, DeadLetterRow, EmbeddingRow, EmotionRow, Enrichment, EntityRow,
    ExtractionRow, IdentityRow, IntentRow, KeywordRow, Level, RelationshipRow, StagedRow,
    TableRow, UnifiedRow, ValidationRow, ValidationStatus,
};
pub use schema::TableKind;

/// Logical tables known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Stage(u8),
    Dlq(u8),
    EntityUnified,
    Ledger,
}

impl Table {
    /// Stages that own an output table.
    pub const STAGES_WITH_TABLES: std::ops::RangeInclusive<u8> = 1..=15;

    pub fn kind(&self) -> Result<TableKind> {
        let kind = match self {
            Table::Stage(1) => TableKind::Extraction,
            Table::Stage(2) => TableKind::Cleaned,
            Table::Stage(3) => TableKind::Identity,
            Table::Stage(4) => TableKind::Staged,
            Table::Stage(5..=8) => TableKind::Entity,
            Table::Stage(9) => TableKind::Embedding,
            Table::Stage(10) => TableKind::Intent,
            Table::Stage(11) => TableKind::Emotion,
            Table::Stage(12) => TableKind::Keyword,
            Table::Stage(13) => TableKind::Relationship,
            Table::Stage(14) => TableKind::Aggregate,
            Table::Stage(15) => TableKind::Validation,
            Table::Dlq(1..=16) => TableKind::DeadLetter,
            Table::EntityUnified => TableKind::Unified,
            Table::Ledger => TableKind::Ledger,
            Table::Stage(n) | Table::Dlq(n) => {
                return Err(Error::InvalidTableIdentifier(format!(
                    "stage {} has no table",
                    n
                )))
            }
        };
        Ok(kind)
    }
}

/// One rejected row of an append.
#[derive(Debug)]
pub struct RowError {
    pub index: usize,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct AppendOutcome {
    pub rows_written: usize,
    pub errors: Vec<RowError>,
}

pub struct Warehouse {
    conn: Connection,
    project: String,
    dataset: String,
    stem: String,
    batch_size: usize,
    budget: JobBudget,
}

impl Warehouse {
    /// Open the warehouse described by the configuration and environment.
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config.warehouse_dir();
        Self::open_at(&dir, config.project()?, config.dataset()?, &config.warehouse)
    }

    pub fn open_at(
        dir: &Path,
        project: &str,
        dataset: &str,
        settings: &WarehouseConfig,
    ) -> Result<Self> {
        validate_part(project)?;
        validate_part(dataset)?;
        std::fs::create_dir_all(dir)?;

        let conn = Connection::open(dir.join(format!("{}.db", project)))?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let dataset_path = dir.join(format!("{}.db", dataset));
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS \"{}\"", dataset),
            params![dataset_path.to_string_lossy()],
        )?;
        Self::from_connection(conn, project, dataset, settings)
    }

    /// Both databases in memory; used by tests.
    pub fn open_in_memory(project: &str, dataset: &str, settings: &WarehouseConfig) -> Result<Self> {
        validate_part(project)?;
        validate_part(dataset)?;
        let conn = Connection::open_in_memory()?;
        conn.execute(&format!("ATTACH DATABASE ':memory:' AS \"{}\"", dataset), [])?;
        Self::from_connection(conn, project, dataset, settings)
    }

    fn from_connection(
        conn: Connection,
        project: &str,
        dataset: &str,
        settings: &WarehouseConfig,
    ) -> Result<Self> {
        validate_part(&settings.table_stem)?;
        Ok(Self {
            conn,
            project: project.to_string(),
            dataset: dataset.to_string(),
            stem: settings.table_stem.clone(),
            batch_size: settings.batch_size.max(1),
            budget: JobBudget::new(settings.max_load_jobs, settings.max_query_jobs),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn budget(&self) -> &JobBudget {
        &self.budget
    }

    /// Rows per append transaction.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    /// Validate a caller-supplied name against this warehouse's project.
    pub fn resolve(&self, raw: &str) -> Result<TableName> {
        TableName::parse(raw, &self.project)
    }

    pub fn name(&self, table: Table) -> Result<TableName> {
        let raw = match table {
            Table::Stage(n) => format!("{}.{}_stage_{}", self.dataset, self.stem, n),
            Table::Dlq(n) => format!("{}.{}_stage_{}_dlq", self.dataset, self.stem, n),
            Table::EntityUnified => format!("{}.entity_unified", self.dataset),
            Table::Ledger => format!("{}.pipeline_ledger", self.dataset),
        };
        self.resolve(&raw)
    }

    // ============================================
    // DDL
    // ============================================

    /// Create the table if it does not exist and return its name.
    pub fn ensure(&self, table: Table) -> Result<TableName> {
        let name = self.name(table)?;
        let ddl = table.kind()?.ddl(&name);
        self.budget.charge(JobKind::Query)?;
        self.conn.execute_batch(&ddl)?;
        Ok(name)
    }

    pub fn exists(&self, table: Table) -> Result<bool> {
        let name = self.name(table)?;
        self.table_exists(&name)
    }

    pub fn table_exists(&self, name: &TableName) -> Result<bool> {
        let schema = name.schema().unwrap_or("main");
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\".sqlite_master WHERE type = 'table' AND name = ?1",
            schema
        );
        let count: i64 = self.query_row(&sql, params![name.table()], |row| row.get(0))?;
        Ok(count > 0)
    }

    // ============================================
    // WRITES
    // ============================================

    /// Append rows in batches, one transaction per batch.
    ///
    /// Rows the store rejects are reported in the outcome instead of failing
    /// the batch; the caller decides whether they are fatal.
    pub fn append<R: TableRow>(&self, table: Table, rows: &[R]) -> Result<AppendOutcome> {
        let name = self.name(table)?;
        self.append_to(&name, rows)
    }

    pub fn append_to<R: TableRow>(&self, name: &TableName, rows: &[R]) -> Result<AppendOutcome> {
        let columns = R::columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name,
            columns.join(", "),
            placeholders
        );

        let mut outcome = AppendOutcome::default();
        for (batch_no, batch) in rows.chunks(self.batch_size).enumerate() {
            self.budget.charge(JobKind::Load)?;
            let tx = self.conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for (offset, row) in batch.iter().enumerate() {
                    let index = batch_no * self.batch_size + offset;
                    match stmt.execute(params_from_iter(row.values())) {
                        Ok(_) => outcome.rows_written += 1,
                        Err(e) => outcome.errors.push(RowError {
                            index,
                            error: classify(e, name),
                        }),
                    }
                }
            }
            tx.commit()?;
        }
        Ok(outcome)
    }

    /// DELETE every row tagged with `run_id`; returns rows removed.
    pub fn delete_run(&self, table: Table, run_id: &str) -> Result<usize> {
        let name = self.name(table)?;
        self.execute(
            &format!("DELETE FROM {} WHERE run_id = ?1", name),
            params![run_id],
        )
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.budget.charge(JobKind::Query)?;
        Ok(self.conn.execute(sql, params)?)
    }

    // ============================================
    // READS
    // ============================================

    /// Row count, optionally scoped to one run.
    pub fn count_rows(&self, table: Table, run_id: Option<&str>) -> Result<u64> {
        let name = self.name(table)?;
        let count: i64 = match run_id {
            Some(run_id) => self.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE run_id = ?1", name),
                params![run_id],
                |row| row.get(0),
            )?,
            None => self.query_row(&format!("SELECT COUNT(*) FROM {}", name), [], |row| {
                row.get(0)
            })?,
        };
        Ok(count as u64)
    }

    /// All rows of one run, in `order_by` order.
    pub fn fetch<R: TableRow>(
        &self,
        table: Table,
        run_id: &str,
        order_by: &'static str,
    ) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        self.stream(table, run_id, order_by, |row: R| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Drive `f` over the rows of one run without materialising them.
    pub fn stream<R, F>(
        &self,
        table: Table,
        run_id: &str,
        order_by: &'static str,
        mut f: F,
    ) -> Result<u64>
    where
        R: TableRow,
        F: FnMut(R) -> Result<()>,
    {
        let name = self.name(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE run_id = ?1 ORDER BY {}",
            R::columns().join(", "),
            name,
            order_by
        );
        self.fetch_stream(&sql, params![run_id], |row| f(R::from_row(row)?))
    }

    /// Run an arbitrary read and hand each raw row to `f`.
    pub fn fetch_stream<P, F>(&self, sql: &str, params: P, mut f: F) -> Result<u64>
    where
        P: Params,
        F: FnMut(&rusqlite::Row<'_>) -> Result<()>,
    {
        self.budget.charge(JobKind::Query)?;
        let mut stmt = self.conn.prepare(sql)?;
        let mut cursor = stmt.query(params)?;
        let mut seen = 0u64;
        while let Some(row) = cursor.next()? {
            f(row)?;
            seen += 1;
        }
        Ok(seen)
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.budget.charge(JobKind::Query)?;
        Ok(self.conn.query_row(sql, params, f)?)
    }

    /// Like [`query_row`](Self::query_row) but `None` when nothing matches.
    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        match self.query_row(sql, params, f) {
            Ok(value) => Ok(Some(value)),
            Err(Error::Warehouse(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Values of one column, for small id sets.
    pub fn column_values(&self, sql: &str, params: Vec<Value>) -> Result<Vec<String>> {
        let mut values = Vec::new();
        self.fetch_stream(sql, params_from_iter(params), |row| {
            values.push(row.get::<_, String>(0)?);
            Ok(())
        })?;
        Ok(values)
    }
}

fn validate_part(part: &str) -> Result<()> {
    if part.contains('.') {
        return Err(Error::InvalidTableIdentifier(part.to_string()));
    }
    TableName::parse(part, "").map(|_| ())
}

/// Map a rejected insert onto the pipeline's error vocabulary.
fn classify(err: rusqlite::Error, table: &TableName) -> Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, detail) = &err {
        if ffi_err.code == ErrorCode::ConstraintViolation {
            let detail = detail.clone().unwrap_or_else(|| err.to_string());
            return match ffi_err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Error::IdentifierCollision {
                    table: table.to_string(),
                    detail,
                },
                _ => Error::SchemaMismatch(detail),
            };
        }
        if ffi_err.code == ErrorCode::TypeMismatch {
            return Error::SchemaMismatch(err.to_string());
        }
    }
    Error::Warehouse(err)
}
