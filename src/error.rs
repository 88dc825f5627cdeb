use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnrichError>;

/// Failure of an enrichment run. Every kind is fatal to the run and rolls
/// back the in-flight replace.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("source read failed: {0}")]
    SourceRead(String),

    #[error("schema mismatch: column '{field_key}' does not exist on {table}")]
    SchemaMismatch { field_key: String, table: String },

    #[error("write failed: {0}")]
    Write(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EnrichError {
    pub fn source_read(err: impl std::fmt::Display) -> Self {
        Self::SourceRead(err.to_string())
    }

    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write(err.to_string())
    }

    pub fn schema_mismatch(field_key: impl Into<String>, table: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field_key: field_key.into(),
            table: table.into(),
        }
    }

    /// Stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceRead(_) => "source_read",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::Write(_) => "write",
            Self::Cancelled => "cancelled",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::Config(_) => "config",
        }
    }
}
