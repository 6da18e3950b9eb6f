//! Error types for adapters and the hook pipeline.

use c15t_schema::SchemaError;
use c15t_types::{ErrorCode, FieldType};
use thiserror::Error;

use crate::sql::Dialect;

/// Boxed error returned by user hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Adapter errors.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Model name not present in the table map.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Schema validation failed (unknown field, missing required field).
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A value does not fit the declared field type.
    #[error("Invalid value for {model}.{field}: expected {expected}, got {value}")]
    InvalidValue {
        model: String,
        field: String,
        expected: FieldType,
        value: String,
    },

    /// A `Where` clause carries an argument its operator cannot use.
    #[error("Invalid where clause on `{field}`: {reason}")]
    InvalidWhere { field: String, reason: String },

    /// Unique constraint violated.
    #[error("Conflict on {model}: {detail}")]
    Conflict { model: String, detail: String },

    /// Referenced row missing.
    #[error("Foreign key violation on {model}: {detail}")]
    ForeignKey { model: String, detail: String },

    /// Delete blocked by a restricting reference.
    #[error("Cannot delete {model}: still referenced by {referenced_by}")]
    Restricted { model: String, referenced_by: String },

    /// A hook returned an error.
    #[error("Hook failed for {model}: {source}")]
    Hook {
        model: String,
        #[source]
        source: HookError,
    },

    /// A before hook aborted a write that a larger operation depends on.
    #[error("Write to {model} aborted by a hook")]
    Aborted { model: String },

    /// Hook registered for a model that does not exist.
    #[error("Cannot register hook for unknown model: {0}")]
    HookModel(String),

    /// Column value could not be decoded.
    #[error("Failed to decode {model}.{field}: {reason}")]
    Decode {
        model: String,
        field: String,
        reason: String,
    },

    /// Dialect has no runtime driver.
    #[error("Dialect {0} has no runtime driver")]
    UnsupportedDialect(Dialect),

    /// The URL scheme does not match the configured dialect.
    #[error("Connection URL scheme `{scheme}` does not match dialect {dialect}")]
    DialectMismatch { dialect: Dialect, scheme: String },

    /// Transaction used after commit or rollback.
    #[error("Transaction already finished")]
    TransactionClosed,

    /// `begin` called on an open transaction.
    #[error("Nested transactions are not supported")]
    NestedTransaction,

    /// In-memory state lock poisoned by a panicking writer.
    #[error("Memory adapter state is poisoned")]
    LockPoisoned,

    /// Driver error.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl AdapterError {
    /// HTTP-style classification.
    pub fn code(&self) -> ErrorCode {
        match self {
            AdapterError::Schema(err) => err.code(),
            AdapterError::UnknownModel(_)
            | AdapterError::InvalidValue { .. }
            | AdapterError::InvalidWhere { .. } => ErrorCode::BadRequest,
            AdapterError::Conflict { .. }
            | AdapterError::Aborted { .. }
            | AdapterError::ForeignKey { .. }
            | AdapterError::Restricted { .. } => ErrorCode::Conflict,
            AdapterError::Hook { .. }
            | AdapterError::HookModel(_)
            | AdapterError::Decode { .. }
            | AdapterError::UnsupportedDialect(_)
            | AdapterError::DialectMismatch { .. }
            | AdapterError::TransactionClosed
            | AdapterError::NestedTransaction
            | AdapterError::LockPoisoned
            | AdapterError::Database(_) => ErrorCode::InternalServerError,
        }
    }

    /// Classifies a driver error raised while writing `model`.
    pub(crate) fn from_database(model: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return AdapterError::Conflict {
                    model: model.to_string(),
                    detail: db.message().to_string(),
                };
            }
            if db.is_foreign_key_violation() {
                return AdapterError::ForeignKey {
                    model: model.to_string(),
                    detail: db.message().to_string(),
                };
            }
        }
        AdapterError::Database(err)
    }
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
