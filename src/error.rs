//! Error kinds shared by every pipeline component.
//!
//! Each variant knows the process exit code it maps to and a one-line
//! restatement for people who do not read stack traces.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid table identifier: {0:?}")]
    InvalidTableIdentifier(String),

    #[error("daily {kind} job budget exceeded (ceiling {ceiling})")]
    DailyJobBudgetExceeded { kind: &'static str, ceiling: u64 },

    #[error("warehouse error: {0}")]
    Warehouse(#[from] rusqlite::Error),

    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("{count} orphaned parent reference(s); first: {sample}")]
    OrphanParent { count: u64, sample: String },

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("language model rate limited: {0}")]
    LlmRateLimited(String),

    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("partial write to {table}: {failed} row(s) rejected; first: {sample}")]
    PartialWrite {
        table: String,
        failed: usize,
        sample: String,
    },

    #[error("identifier collision in {table}: {detail}")]
    IdentifierCollision { table: String, detail: String },

    #[error("input missing: {0}")]
    InputMissing(String),

    #[error("stage {stage} exceeded its {budget_secs}s wall-clock budget")]
    Timeout { stage: u8, budget_secs: u64 },

    #[error("stage {stage} cannot start: {reason}")]
    OutOfOrder { stage: u8, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Process exit code: 1 validation, 2 input missing, 3 budget, 4 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ValidationFailed(_) | Error::OrphanParent { .. } | Error::Cancelled(_) => 1,
            Error::InputMissing(_) => 2,
            Error::DailyJobBudgetExceeded { .. } => 3,
            _ => 4,
        }
    }

    /// Plain-language restatement printed ahead of the technical detail.
    pub fn plain(&self) -> &'static str {
        match self {
            Error::InvalidTableIdentifier(_) => "A table name was not in a safe format, so nothing was run.",
            Error::DailyJobBudgetExceeded { .. } => "Today's allowance of warehouse jobs is used up.",
            Error::Warehouse(_) => "The warehouse refused or failed a request.",
            Error::ParseFailed(_) => "A line in a session file could not be read.",
            Error::SchemaMismatch(_) => "Some data did not fit the table it was meant for.",
            Error::ValidationFailed(_) => "Some entities did not pass the quality checks.",
            Error::OrphanParent { .. } => "Some entities point to a parent that does not exist.",
            Error::LlmUnavailable(_) => "The language model service could not be reached.",
            Error::LlmRateLimited(_) => "The language model service asked us to slow down.",
            Error::EnrichmentFailed(_) => "An optional annotation could not be added to an entity.",
            Error::PartialWrite { .. } => "Only part of a batch was saved.",
            Error::IdentifierCollision { .. } => "Two different entities received the same identifier.",
            Error::InputMissing(_) => "The table or files you need do not exist yet.",
            Error::Timeout { .. } => "A stage ran longer than it is allowed to.",
            Error::OutOfOrder { .. } => "A stage was started before the stage it depends on finished.",
            Error::Config(_) => "The pipeline settings are incomplete or wrong.",
            Error::Cancelled(_) => "Nothing was changed because the operation was cancelled.",
            Error::Io(_) => "A file could not be read or written.",
            Error::Json(_) => "Some structured data could not be encoded or decoded.",
        }
    }

    /// Name written to the `error_kind` column of a DLQ row.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidTableIdentifier(_) => "InvalidTableIdentifier",
            Error::DailyJobBudgetExceeded { .. } => "DailyJobBudgetExceeded",
            Error::Warehouse(_) => "WarehouseError",
            Error::ParseFailed(_) => "ParseFailed",
            Error::SchemaMismatch(_) => "SchemaMismatch",
            Error::ValidationFailed(_) => "ValidationFailed",
            Error::OrphanParent { .. } => "OrphanParent",
            Error::LlmUnavailable(_) => "LLMUnavailable",
            Error::LlmRateLimited(_) => "LLMRateLimited",
            Error::EnrichmentFailed(_) => "EnrichmentFailed",
            Error::PartialWrite { .. } => "PartialWrite",
            Error::IdentifierCollision { .. } => "IdentifierCollision",
            Error::InputMissing(_) => "InputMissing",
            Error::Timeout { .. } => "Timeout",
            Error::OutOfOrder { .. } => "OutOfOrder",
            Error::Config(_) => "Config",
            Error::Cancelled(_) => "Cancelled",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
        }
    }
}
