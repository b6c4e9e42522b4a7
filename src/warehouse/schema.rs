//! Warehouse table definitions
//!
//! Every table is created with `CREATE TABLE IF NOT EXISTS`. Daily
//! partitioning and clustering are emulated with secondary indexes on
//! `content_date` and `(level, source_name)`; every run-scoped table also
//! gets a `run_id` index so DELETE-by-run stays cheap.

use super::name::TableName;

/// Shape of a warehouse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// stage_1: one row per parsed source record
    Extraction,
    /// stage_2: extraction + cleaning fields
    Cleaned,
    /// stage_3: cleaned + minted entity id
    Identity,
    /// stage_4: identity + level / parent placeholders
    Staged,
    /// stages 5-8: one level of the SPINE hierarchy
    Entity,
    /// stage_9
    Embedding,
    /// stage_10
    Intent,
    /// stage_11
    Emotion,
    /// stage_12
    Keyword,
    /// stage_13
    Relationship,
    /// stage_14: union of all levels with enrichment columns
    Aggregate,
    /// stage_15
    Validation,
    /// entity_unified
    Unified,
    /// `*_dlq`
    DeadLetter,
    /// pipeline_ledger
    Ledger,
}

const EXTRACTION_COLUMNS: &str = r#"
    extraction_id TEXT NOT NULL,           -- session_id:message_index
    session_id TEXT NOT NULL,
    message_index INTEGER NOT NULL,        -- counts parsed records only
    message_type TEXT NOT NULL,            -- record `type`, 'unknown' when absent
    role TEXT NOT NULL,
    content_raw TEXT,
    timestamp_utc TEXT,                    -- RFC 3339
    model TEXT,
    cost_usd REAL,
    tool_name TEXT,
    tool_input TEXT,                       -- JSON
    tool_output TEXT,
    source_file TEXT NOT NULL,
    source_name TEXT NOT NULL,
    run_id TEXT NOT NULL,
    extracted_at TEXT NOT NULL"#;

const CLEANED_COLUMNS: &str = r#",
    content_cleaned TEXT NOT NULL,
    content_length INTEGER NOT NULL,
    word_count INTEGER NOT NULL,
    content_date TEXT,                     -- YYYY-MM-DD
    fingerprint TEXT NOT NULL,
    is_duplicate INTEGER NOT NULL CHECK (is_duplicate IN (0, 1)),
    cleaned_at TEXT NOT NULL"#;

const IDENTITY_COLUMNS: &str = r#",
    entity_id TEXT NOT NULL,
    identified_at TEXT NOT NULL,
    UNIQUE(run_id, entity_id)"#;

const STAGED_COLUMNS: &str = r#",
    entity_id TEXT NOT NULL,
    identified_at TEXT NOT NULL,
    level INTEGER NOT NULL CHECK (level = 5),
    parent_id TEXT,
    UNIQUE(run_id, entity_id)"#;

const ENTITY_COLUMNS: &str = r#"
    entity_id TEXT NOT NULL,
    parent_id TEXT,
    session_id TEXT NOT NULL,
    level INTEGER NOT NULL CHECK (level IN (1, 4, 5, 6, 8)),
    text TEXT NOT NULL,
    content_date TEXT,
    source_name TEXT NOT NULL,
    run_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    fingerprint TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',   -- JSON
    role TEXT,
    message_index INTEGER,
    -- position within the parent
    ordinal INTEGER NOT NULL DEFAULT 0"#;

const ENRICHMENT_COLUMNS: &str = r#",
    intent TEXT,
    task_type TEXT,
    emotion TEXT,
    emotion_confidence REAL,
    keywords TEXT,                         -- JSON array
    embedding_model TEXT,
    embedding_input_chars INTEGER"#;

const DLQ_COLUMNS: &str = r#"
    run_id TEXT NOT NULL,
    stage INTEGER NOT NULL,
    input_fingerprint TEXT,
    error_kind TEXT NOT NULL,
    error_detail TEXT,
    created_at TEXT NOT NULL"#;

impl TableKind {
    fn body(&self) -> String {
        match self {
            TableKind::Extraction => EXTRACTION_COLUMNS.to_string(),
            TableKind::Cleaned => format!("{EXTRACTION_COLUMNS}{CLEANED_COLUMNS}"),
            TableKind::Identity => {
                format!("{EXTRACTION_COLUMNS}{CLEANED_COLUMNS}{IDENTITY_COLUMNS}")
            }
            TableKind::Staged => format!("{EXTRACTION_COLUMNS}{CLEANED_COLUMNS}{STAGED_COLUMNS}"),
            TableKind::Entity => format!("{ENTITY_COLUMNS},\n    UNIQUE(run_id, level, entity_id)"),
            TableKind::Aggregate => format!(
                "{ENTITY_COLUMNS}{ENRICHMENT_COLUMNS},\n    UNIQUE(run_id, level, entity_id)"
            ),
            TableKind::Unified => format!(
                "{ENTITY_COLUMNS}{ENRICHMENT_COLUMNS},
    validation_status TEXT NOT NULL CHECK (validation_status IN ('PASSED', 'WARNING', 'FAILED')),
    validation_score REAL NOT NULL,
    promoted_at TEXT NOT NULL,
    PRIMARY KEY(entity_id)"
            ),
            TableKind::Embedding => r#"
    entity_id TEXT NOT NULL,               -- L8 conversation
    session_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    embedding_input TEXT NOT NULL,         -- truncated text, not a vector
    input_chars INTEGER NOT NULL,
    truncated INTEGER NOT NULL,
    input_digest TEXT NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(run_id, entity_id)"#
                .to_string(),
            TableKind::Intent => r#"
    entity_id TEXT NOT NULL,               -- L5 message
    run_id TEXT NOT NULL,
    intent TEXT,
    task_type TEXT,
    code_languages TEXT,                   -- JSON array
    complexity TEXT,
    has_code_block INTEGER,
    method TEXT NOT NULL,                  -- 'llm' | 'heuristic'
    raw_response TEXT,                     -- kept when the answer did not parse
    created_at TEXT NOT NULL,
    UNIQUE(run_id, entity_id)"#
                .to_string(),
            TableKind::Emotion => r#"
    entity_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    emotion TEXT NOT NULL,
    confidence REAL NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(run_id, entity_id)"#
                .to_string(),
            TableKind::Keyword => r#"
    entity_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    keywords TEXT NOT NULL,                -- JSON array, best first
    top_keyword TEXT,
    keyword_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(run_id, entity_id)"#
                .to_string(),
            TableKind::Relationship => r#"
    relationship_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('parent_child', 'next_in_session', 'response_to')),
    session_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(run_id, relationship_id)"#
                .to_string(),
            TableKind::Validation => r#"
    entity_id TEXT NOT NULL,
    level INTEGER,
    run_id TEXT NOT NULL,
    validation_status TEXT NOT NULL CHECK (validation_status IN ('PASSED', 'WARNING', 'FAILED')),
    score REAL NOT NULL,
    errors TEXT NOT NULL,                  -- JSON array
    warnings TEXT NOT NULL,                -- JSON array
    validated_at TEXT NOT NULL,
    UNIQUE(run_id, level, entity_id)"#
                .to_string(),
            TableKind::DeadLetter => DLQ_COLUMNS.to_string(),
            TableKind::Ledger => r#"
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    stage INTEGER,
    event TEXT NOT NULL,                   -- run_started, stage_finished, rollback, ...
    status TEXT,
    counters TEXT,                         -- JSON
    detail TEXT,
    recorded_at TEXT NOT NULL"#
                .to_string(),
        }
    }

    /// Index column lists; the first element names the index suffix.
    fn indexes(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            TableKind::Extraction
            | TableKind::Cleaned
            | TableKind::Identity
            | TableKind::Staged => &[
                ("run", "run_id"),
                ("session", "session_id, message_index"),
            ],
            TableKind::Entity | TableKind::Aggregate | TableKind::Unified => &[
                ("run", "run_id"),
                ("content_date", "content_date"),
                ("cluster", "level, source_name"),
                ("parent", "parent_id"),
            ],
            TableKind::Embedding
            | TableKind::Intent
            | TableKind::Emotion
            | TableKind::Keyword
            | TableKind::Relationship
            | TableKind::Validation
            | TableKind::DeadLetter => &[("run", "run_id")],
            TableKind::Ledger => &[("run", "run_id, stage")],
        }
    }

    /// DDL for a table of this kind, including its indexes.
    pub fn ddl(&self, name: &TableName) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} ({}\n);\n", name, self.body());
        for (suffix, columns) in self.indexes() {
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {}\"{}_{}_idx\" ON \"{}\" ({});\n",
                name.schema_prefix(),
                name.table(),
                suffix,
                name.table(),
                columns
            ));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_is_idempotent_and_indexed() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let name = TableName::parse("main.cc_stage_5", "p").unwrap();
        let ddl = TableKind::Entity.ddl(&name);
        conn.execute_batch(&ddl).unwrap();
        conn.execute_batch(&ddl).unwrap();
        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'cc_stage_5' AND name LIKE '%_idx'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 4);
    }

    #[test]
    fn test_joined_fragments_do_not_end_in_comments() {
        for fragment in [
            EXTRACTION_COLUMNS,
            CLEANED_COLUMNS,
            IDENTITY_COLUMNS,
            STAGED_COLUMNS,
            ENTITY_COLUMNS,
            ENRICHMENT_COLUMNS,
            DLQ_COLUMNS,
        ] {
            let last = fragment.lines().last().unwrap();
            assert!(!last.contains("--"), "trailing comment in {:?}", last);
        }
    }

    #[test]
    fn test_aggregate_and_unified_tables_create() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for (kind, table) in [
            (TableKind::Entity, "cc_stage_8"),
            (TableKind::Aggregate, "cc_stage_14"),
            (TableKind::Unified, "entity_unified"),
        ] {
            let name = TableName::parse(table, "p").unwrap();
            conn.execute_batch(&kind.ddl(&name)).unwrap();
        }
        let ordinal_columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('entity_unified') WHERE name IN ('ordinal', 'intent')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(ordinal_columns, 2);
    }

    #[test]
    fn test_every_kind_produces_valid_sql() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let kinds = [
            TableKind::Extraction,
            TableKind::Cleaned,
            TableKind::Identity,
            TableKind::Staged,
            TableKind::Entity,
            TableKind::Embedding,
            TableKind::Intent,
            TableKind::Emotion,
            TableKind::Keyword,
            TableKind::Relationship,
            TableKind::Aggregate,
            TableKind::Validation,
            TableKind::Unified,
            TableKind::DeadLetter,
            TableKind::Ledger,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            let name = TableName::parse(&format!("t_{i}"), "p").unwrap();
            conn.execute_batch(&kind.ddl(&name)).unwrap();
        }
    }

    #[test]
    fn test_level_check_rejects_reserved_levels() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let name = TableName::parse("l", "p").unwrap();
        conn.execute_batch(&TableKind::Entity.ddl(&name)).unwrap();
        let err = conn.execute(
            "INSERT INTO l (entity_id, session_id, level, text, source_name, run_id, created_at)
             VALUES ('e', 's', 7, 't', 'claude_code', 'r', 'now')",
            [],
        );
        assert!(err.is_err());
    }
}
