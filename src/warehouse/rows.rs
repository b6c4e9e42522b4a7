//! Typed rows for every warehouse table.

use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A row that can be appended to, and read back from, one table shape.
pub trait TableRow: Sized {
    /// Insert / select column order.
    fn columns() -> &'static [&'static str];

    /// Values in `columns()` order.
    fn values(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Key recorded as `input_fingerprint` when the row is dead-lettered.
    fn dlq_key(&self) -> Option<String> {
        None
    }
}

/// SPINE levels. Levels 2, 3 and 7 are reserved and never populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Level {
    Token = 1,
    Sentence = 4,
    Message = 5,
    Turn = 6,
    Conversation = 8,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Token,
        Level::Sentence,
        Level::Message,
        Level::Turn,
        Level::Conversation,
    ];

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Level::Token),
            4 => Some(Level::Sentence),
            5 => Some(Level::Message),
            6 => Some(Level::Turn),
            8 => Some(Level::Conversation),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn name(&self) -> &'static str {
        match self {
            Level::Token => "token",
            Level::Sentence => "sentence",
            Level::Message => "message",
            Level::Turn => "turn",
            Level::Conversation => "conversation",
        }
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn opt_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn json_value<T: Serialize>(value: &T) -> Value {
    Value::Text(serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()))
}

// ============================================
// STAGES 1-4: MESSAGE PIPELINE
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRow {
    pub extraction_id: String,
    pub session_id: String,
    pub message_index: i64,
    pub message_type: String,
    pub role: String,
    pub content_raw: Option<String>,
    pub timestamp_utc: Option<String>,
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
    pub tool_name: Option<String>,
    pub tool_input: Option<String>,
    pub tool_output: Option<String>,
    pub source_file: String,
    pub source_name: String,
    pub run_id: String,
    pub extracted_at: String,
}

impl ExtractionRow {
    fn push_values(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::from(self.extraction_id.clone()),
            Value::from(self.session_id.clone()),
            Value::from(self.message_index),
            Value::from(self.message_type.clone()),
            Value::from(self.role.clone()),
            Value::from(self.content_raw.clone()),
            Value::from(self.timestamp_utc.clone()),
            Value::from(self.model.clone()),
            Value::from(self.cost_usd),
            Value::from(self.tool_name.clone()),
            Value::from(self.tool_input.clone()),
            Value::from(self.tool_output.clone()),
            Value::from(self.source_file.clone()),
            Value::from(self.source_name.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.extracted_at.clone()),
        ]);
    }

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            extraction_id: row.get("extraction_id")?,
            session_id: row.get("session_id")?,
            message_index: row.get("message_index")?,
            message_type: row.get("message_type")?,
            role: row.get("role")?,
            content_raw: row.get("content_raw")?,
            timestamp_utc: row.get("timestamp_utc")?,
            model: row.get("model")?,
            cost_usd: row.get("cost_usd")?,
            tool_name: row.get("tool_name")?,
            tool_input: row.get("tool_input")?,
            tool_output: row.get("tool_output")?,
            source_file: row.get("source_file")?,
            source_name: row.get("source_name")?,
            run_id: row.get("run_id")?,
            extracted_at: row.get("extracted_at")?,
        })
    }
}

impl TableRow for ExtractionRow {
    fn columns() -> &'static [&'static str] {
        &[
            "extraction_id",
            "session_id",
            "message_index",
            "message_type",
            "role",
            "content_raw",
            "timestamp_utc",
            "model",
            "cost_usd",
            "tool_name",
            "tool_input",
            "tool_output",
            "source_file",
            "source_name",
            "run_id",
            "extracted_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(16);
        self.push_values(&mut out);
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::read(row)
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.extraction_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedRow {
    pub extraction: ExtractionRow,
    pub content_cleaned: String,
    pub content_length: i64,
    pub word_count: i64,
    pub content_date: Option<String>,
    pub fingerprint: String,
    pub is_duplicate: bool,
    pub cleaned_at: String,
}

impl CleanedRow {
    fn push_values(&self, out: &mut Vec<Value>) {
        self.extraction.push_values(out);
        out.extend([
            Value::from(self.content_cleaned.clone()),
            Value::from(self.content_length),
            Value::from(self.word_count),
            Value::from(self.content_date.clone()),
            Value::from(self.fingerprint.clone()),
            Value::from(self.is_duplicate),
            Value::from(self.cleaned_at.clone()),
        ]);
    }

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            extraction: ExtractionRow::read(row)?,
            content_cleaned: row.get("content_cleaned")?,
            content_length: row.get("content_length")?,
            word_count: row.get("word_count")?,
            content_date: row.get("content_date")?,
            fingerprint: row.get("fingerprint")?,
            is_duplicate: row.get("is_duplicate")?,
            cleaned_at: row.get("cleaned_at")?,
        })
    }
}

const CLEANED_COLUMNS: [&str; 23] = [
    "extraction_id",
    "session_id",
    "message_index",
    "message_type",
    "role",
    "content_raw",
    "timestamp_utc",
    "model",
    "cost_usd",
    "tool_name",
    "tool_input",
    "tool_output",
    "source_file",
    "source_name",
    "run_id",
    "extracted_at",
    "content_cleaned",
    "content_length",
    "word_count",
    "content_date",
    "fingerprint",
    "is_duplicate",
    "cleaned_at",
];

impl TableRow for CleanedRow {
    fn columns() -> &'static [&'static str] {
        &CLEANED_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(CLEANED_COLUMNS.len());
        self.push_values(&mut out);
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::read(row)
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.fingerprint.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRow {
    pub cleaned: CleanedRow,
    pub entity_id: String,
    pub identified_at: String,
}

const IDENTITY_COLUMNS: [&str; 25] = [
    "extraction_id",
    "session_id",
    "message_index",
    "message_type",
    "role",
    "content_raw",
    "timestamp_utc",
    "model",
    "cost_usd",
    "tool_name",
    "tool_input",
    "tool_output",
    "source_file",
    "source_name",
    "run_id",
    "extracted_at",
    "content_cleaned",
    "content_length",
    "word_count",
    "content_date",
    "fingerprint",
    "is_duplicate",
    "cleaned_at",
    "entity_id",
    "identified_at",
];

impl IdentityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cleaned: CleanedRow::read(row)?,
            entity_id: row.get("entity_id")?,
            identified_at: row.get("identified_at")?,
        })
    }

    fn push_values(&self, out: &mut Vec<Value>) {
        self.cleaned.push_values(out);
        out.push(Value::from(self.entity_id.clone()));
        out.push(Value::from(self.identified_at.clone()));
    }
}

impl TableRow for IdentityRow {
    fn columns() -> &'static [&'static str] {
        &IDENTITY_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(IDENTITY_COLUMNS.len());
        self.push_values(&mut out);
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::read(row)
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.cleaned.fingerprint.clone())
    }
}

/// stage_4: the single message shape the SPINE construction stages read.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub identity: IdentityRow,
    pub level: i64,
    pub parent_id: Option<String>,
}

const STAGED_COLUMNS: [&str; 27] = [
    "extraction_id",
    "session_id",
    "message_index",
    "message_type",
    "role",
    "content_raw",
    "timestamp_utc",
    "model",
    "cost_usd",
    "tool_name",
    "tool_input",
    "tool_output",
    "source_file",
    "source_name",
    "run_id",
    "extracted_at",
    "content_cleaned",
    "content_length",
    "word_count",
    "content_date",
    "fingerprint",
    "is_duplicate",
    "cleaned_at",
    "entity_id",
    "identified_at",
    "level",
    "parent_id",
];

impl StagedRow {
    pub fn session_id(&self) -> &str {
        &self.identity.cleaned.extraction.session_id
    }

    pub fn extraction(&self) -> &ExtractionRow {
        &self.identity.cleaned.extraction
    }

    pub fn cleaned(&self) -> &CleanedRow {
        &self.identity.cleaned
    }
}

impl TableRow for StagedRow {
    fn columns() -> &'static [&'static str] {
        &STAGED_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(STAGED_COLUMNS.len());
        self.identity.push_values(&mut out);
        out.push(Value::from(self.level));
        out.push(Value::from(self.parent_id.clone()));
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: IdentityRow::read(row)?,
            level: row.get("level")?,
            parent_id: row.get("parent_id")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.identity.entity_id.clone())
    }
}

// ============================================
// STAGES 5-8: ENTITIES
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub entity_id: String,
    pub parent_id: Option<String>,
    pub session_id: String,
    pub level: i64,
    pub text: String,
    pub content_date: Option<String>,
    pub source_name: String,
    pub run_id: String,
    pub created_at: String,
    pub fingerprint: Option<String>,
    pub metadata: serde_json::Value,
    pub role: Option<String>,
    pub message_index: Option<i64>,
    pub ordinal: i64,
}

const ENTITY_COLUMNS: [&str; 14] = [
    "entity_id",
    "parent_id",
    "session_id",
    "level",
    "text",
    "content_date",
    "source_name",
    "run_id",
    "created_at",
    "fingerprint",
    "metadata",
    "role",
    "message_index",
    "ordinal",
];

impl EntityRow {
    fn push_values(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::from(self.entity_id.clone()),
            Value::from(self.parent_id.clone()),
            Value::from(self.session_id.clone()),
            Value::from(self.level),
            Value::from(self.text.clone()),
            Value::from(self.content_date.clone()),
            Value::from(self.source_name.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.created_at.clone()),
            Value::from(self.fingerprint.clone()),
            json_value(&self.metadata),
            Value::from(self.role.clone()),
            Value::from(self.message_index),
            Value::from(self.ordinal),
        ]);
    }

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            parent_id: row.get("parent_id")?,
            session_id: row.get("session_id")?,
            level: row.get("level")?,
            text: row.get("text")?,
            content_date: row.get("content_date")?,
            source_name: row.get("source_name")?,
            run_id: row.get("run_id")?,
            created_at: row.get("created_at")?,
            fingerprint: row.get("fingerprint")?,
            metadata: json_column(row, "metadata")?,
            role: row.get("role")?,
            message_index: row.get("message_index")?,
            ordinal: row.get("ordinal")?,
        })
    }
}

impl TableRow for EntityRow {
    fn columns() -> &'static [&'static str] {
        &ENTITY_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(ENTITY_COLUMNS.len());
        self.push_values(&mut out);
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::read(row)
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

// ============================================
// STAGES 9-13: ENRICHMENT AND LINKS
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    pub entity_id: String,
    pub session_id: String,
    pub run_id: String,
    pub embedding_input: String,
    pub input_chars: i64,
    pub truncated: bool,
    pub input_digest: String,
    pub model: String,
    pub created_at: String,
}

impl TableRow for EmbeddingRow {
    fn columns() -> &'static [&'static str] {
        &[
            "entity_id",
            "session_id",
            "run_id",
            "embedding_input",
            "input_chars",
            "truncated",
            "input_digest",
            "model",
            "created_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.entity_id.clone()),
            Value::from(self.session_id.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.embedding_input.clone()),
            Value::from(self.input_chars),
            Value::from(self.truncated),
            Value::from(self.input_digest.clone()),
            Value::from(self.model.clone()),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            session_id: row.get("session_id")?,
            run_id: row.get("run_id")?,
            embedding_input: row.get("embedding_input")?,
            input_chars: row.get("input_chars")?,
            truncated: row.get("truncated")?,
            input_digest: row.get("input_digest")?,
            model: row.get("model")?,
            created_at: row.get("created_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRow {
    pub entity_id: String,
    pub run_id: String,
    pub intent: Option<String>,
    pub task_type: Option<String>,
    pub code_languages: Vec<String>,
    pub complexity: Option<String>,
    pub has_code_block: Option<bool>,
    pub method: String,
    pub raw_response: Option<String>,
    pub created_at: String,
}

impl TableRow for IntentRow {
    fn columns() -> &'static [&'static str] {
        &[
            "entity_id",
            "run_id",
            "intent",
            "task_type",
            "code_languages",
            "complexity",
            "has_code_block",
            "method",
            "raw_response",
            "created_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.entity_id.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.intent.clone()),
            Value::from(self.task_type.clone()),
            json_value(&self.code_languages),
            Value::from(self.complexity.clone()),
            Value::from(self.has_code_block),
            Value::from(self.method.clone()),
            Value::from(self.raw_response.clone()),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            run_id: row.get("run_id")?,
            intent: row.get("intent")?,
            task_type: row.get("task_type")?,
            code_languages: opt_json_column(row, "code_languages")?.unwrap_or_default(),
            complexity: row.get("complexity")?,
            has_code_block: row.get("has_code_block")?,
            method: row.get("method")?,
            raw_response: row.get("raw_response")?,
            created_at: row.get("created_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionRow {
    pub entity_id: String,
    pub run_id: String,
    pub emotion: String,
    pub confidence: f64,
    pub created_at: String,
}

impl TableRow for EmotionRow {
    fn columns() -> &'static [&'static str] {
        &["entity_id", "run_id", "emotion", "confidence", "created_at"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.entity_id.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.emotion.clone()),
            Value::from(self.confidence),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            run_id: row.get("run_id")?,
            emotion: row.get("emotion")?,
            confidence: row.get("confidence")?,
            created_at: row.get("created_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRow {
    pub entity_id: String,
    pub run_id: String,
    pub keywords: Vec<String>,
    pub created_at: String,
}

impl TableRow for KeywordRow {
    fn columns() -> &'static [&'static str] {
        &[
            "entity_id",
            "run_id",
            "keywords",
            "top_keyword",
            "keyword_count",
            "created_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.entity_id.clone()),
            Value::from(self.run_id.clone()),
            json_value(&self.keywords),
            Value::from(self.keywords.first().cloned()),
            Value::from(self.keywords.len() as i64),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            run_id: row.get("run_id")?,
            keywords: json_column(row, "keywords")?,
            created_at: row.get("created_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRow {
    pub relationship_id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub session_id: String,
    pub run_id: String,
    pub created_at: String,
}

impl TableRow for RelationshipRow {
    fn columns() -> &'static [&'static str] {
        &[
            "relationship_id",
            "source_id",
            "target_id",
            "kind",
            "session_id",
            "run_id",
            "created_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.relationship_id.clone()),
            Value::from(self.source_id.clone()),
            Value::from(self.target_id.clone()),
            Value::from(self.kind.clone()),
            Value::from(self.session_id.clone()),
            Value::from(self.run_id.clone()),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            relationship_id: row.get("relationship_id")?,
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            kind: row.get("kind")?,
            session_id: row.get("session_id")?,
            run_id: row.get("run_id")?,
            created_at: row.get("created_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.relationship_id.clone())
    }
}

// ============================================
// STAGES 14-16: AGGREGATE, VALIDATE, PROMOTE
// ============================================

/// Enrichment columns carried from stage_14 onwards; NULL where a level
/// has no such annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub intent: Option<String>,
    pub task_type: Option<String>,
    pub emotion: Option<String>,
    pub emotion_confidence: Option<f64>,
    pub keywords: Option<Vec<String>>,
    pub embedding_model: Option<String>,
    pub embedding_input_chars: Option<i64>,
}

impl Enrichment {
    fn push_values(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::from(self.intent.clone()),
            Value::from(self.task_type.clone()),
            Value::from(self.emotion.clone()),
            Value::from(self.emotion_confidence),
            self.keywords
                .as_ref()
                .map(json_value)
                .unwrap_or(Value::Null),
            Value::from(self.embedding_model.clone()),
            Value::from(self.embedding_input_chars),
        ]);
    }

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            intent: row.get("intent")?,
            task_type: row.get("task_type")?,
            emotion: row.get("emotion")?,
            emotion_confidence: row.get("emotion_confidence")?,
            keywords: opt_json_column(row, "keywords")?,
            embedding_model: row.get("embedding_model")?,
            embedding_input_chars: row.get("embedding_input_chars")?,
        })
    }
}

const AGGREGATE_COLUMNS: [&str; 21] = [
    "entity_id",
    "parent_id",
    "session_id",
    "level",
    "text",
    "content_date",
    "source_name",
    "run_id",
    "created_at",
    "fingerprint",
    "metadata",
    "role",
    "message_index",
    "ordinal",
    "intent",
    "task_type",
    "emotion",
    "emotion_confidence",
    "keywords",
    "embedding_model",
    "embedding_input_chars",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub entity: EntityRow,
    pub enrichment: Enrichment,
}

impl TableRow for AggregateRow {
    fn columns() -> &'static [&'static str] {
        &AGGREGATE_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(AGGREGATE_COLUMNS.len());
        self.entity.push_values(&mut out);
        self.enrichment.push_values(&mut out);
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity: EntityRow::read(row)?,
            enrichment: Enrichment::read(row)?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity.entity_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValidationStatus {
    Passed,
    Warning,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "PASSED",
            ValidationStatus::Warning => "WARNING",
            ValidationStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASSED" => Some(ValidationStatus::Passed),
            "WARNING" => Some(ValidationStatus::Warning),
            "FAILED" => Some(ValidationStatus::Failed),
            _ => None,
        }
    }
}

fn status_column(row: &Row<'_>, column: &str) -> rusqlite::Result<ValidationStatus> {
    let raw: String = row.get(column)?;
    ValidationStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown validation status {raw:?}").into(),
        )
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRow {
    pub entity_id: String,
    pub level: Option<i64>,
    pub run_id: String,
    pub status: ValidationStatus,
    pub score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub validated_at: String,
}

impl TableRow for ValidationRow {
    fn columns() -> &'static [&'static str] {
        &[
            "entity_id",
            "level",
            "run_id",
            "validation_status",
            "score",
            "errors",
            "warnings",
            "validated_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.entity_id.clone()),
            Value::from(self.level),
            Value::from(self.run_id.clone()),
            Value::from(self.status.as_str().to_string()),
            Value::from(self.score),
            json_value(&self.errors),
            json_value(&self.warnings),
            Value::from(self.validated_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get("entity_id")?,
            level: row.get("level")?,
            run_id: row.get("run_id")?,
            status: status_column(row, "validation_status")?,
            score: row.get("score")?,
            errors: json_column(row, "errors")?,
            warnings: json_column(row, "warnings")?,
            validated_at: row.get("validated_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.entity_id.clone())
    }
}

const UNIFIED_COLUMNS: [&str; 24] = [
    "entity_id",
    "parent_id",
    "session_id",
    "level",
    "text",
    "content_date",
    "source_name",
    "run_id",
    "created_at",
    "fingerprint",
    "metadata",
    "role",
    "message_index",
    "ordinal",
    "intent",
    "task_type",
    "emotion",
    "emotion_confidence",
    "keywords",
    "embedding_model",
    "embedding_input_chars",
    "validation_status",
    "validation_score",
    "promoted_at",
];

/// A row of the authoritative `entity_unified` table.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRow {
    pub aggregate: AggregateRow,
    pub validation_status: ValidationStatus,
    pub validation_score: f64,
    pub promoted_at: String,
}

impl TableRow for UnifiedRow {
    fn columns() -> &'static [&'static str] {
        &UNIFIED_COLUMNS
    }

    fn values(&self) -> Vec<Value> {
        let mut out = self.aggregate.values();
        out.push(Value::from(self.validation_status.as_str().to_string()));
        out.push(Value::from(self.validation_score));
        out.push(Value::from(self.promoted_at.clone()));
        out
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            aggregate: AggregateRow::from_row(row)?,
            validation_status: status_column(row, "validation_status")?,
            validation_score: row.get("validation_score")?,
            promoted_at: row.get("promoted_at")?,
        })
    }

    fn dlq_key(&self) -> Option<String> {
        Some(self.aggregate.entity.entity_id.clone())
    }
}

// ============================================
// DEAD-LETTER QUEUE
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRow {
    pub run_id: String,
    pub stage: i64,
    pub input_fingerprint: Option<String>,
    pub error_kind: String,
    pub error_detail: Option<String>,
    pub created_at: String,
}

impl TableRow for DeadLetterRow {
    fn columns() -> &'static [&'static str] {
        &[
            "run_id",
            "stage",
            "input_fingerprint",
            "error_kind",
            "error_detail",
            "created_at",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.run_id.clone()),
            Value::from(self.stage),
            Value::from(self.input_fingerprint.clone()),
            Value::from(self.error_kind.clone()),
            Value::from(self.error_detail.clone()),
            Value::from(self.created_at.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get("run_id")?,
            stage: row.get("stage")?,
            input_fingerprint: row.get("input_fingerprint")?,
            error_kind: row.get("error_kind")?,
            error_detail: row.get("error_detail")?,
            created_at: row.get("created_at")?,
        })
    }
}
