//! Error types for the migration system.

use std::path::PathBuf;

use c15t_adapter::AdapterError;
use c15t_schema::SchemaError;
use c15t_types::ErrorCode;
use thiserror::Error;

/// Migration errors.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A statement failed; earlier statements stay applied.
    #[error("Migration statement failed: {source}\n  {sql}")]
    Statement {
        sql: String,
        #[source]
        source: AdapterError,
    },

    /// Catalog introspection failed.
    #[error("Failed to introspect database: {0}")]
    Introspection(#[source] AdapterError),

    /// The declared schema is inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration file parse error.
    #[error("Failed to parse migration file {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    /// Stored checksum no longer matches the file body.
    #[error("Checksum mismatch for migration {id}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        id: u32,
        expected: String,
        actual: String,
    },

    /// Invalid migration name.
    #[error("Invalid migration name: {0}")]
    InvalidName(String),
}

impl MigrationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MigrationError::Statement { source, .. } | MigrationError::Introspection(source) => {
                source.code()
            }
            MigrationError::Schema(e) => e.code(),
            MigrationError::InvalidName(_) => ErrorCode::BadRequest,
            MigrationError::Io(_)
            | MigrationError::ParseError { .. }
            | MigrationError::ChecksumMismatch { .. } => ErrorCode::InternalServerError,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
