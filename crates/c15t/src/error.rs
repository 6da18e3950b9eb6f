//! Facade error type.

use c15t_adapter::AdapterError;
use c15t_config::ConfigError;
use c15t_migration::MigrationError;
use c15t_schema::SchemaError;
use c15t_types::ErrorCode;
use thiserror::Error;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, C15tError>;

/// Errors returned by [`C15t`](crate::C15t).
#[derive(Debug, Error)]
pub enum C15tError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A referenced row does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The request is well-formed but cannot be applied.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Migrations were requested on an adapter that is not backed by a SQL pool.
    #[error("The {0} adapter has no SQL database to migrate")]
    NoSqlDatabase(&'static str),
}

impl C15tError {
    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        C15tError::NotFound {
            what,
            id: id.into(),
        }
    }

    /// HTTP-style classification.
    pub fn code(&self) -> ErrorCode {
        match self {
            C15tError::Adapter(e) => e.code(),
            C15tError::Schema(e) => e.code(),
            C15tError::Migration(e) => e.code(),
            C15tError::Config(e) => e.code(),
            C15tError::NotFound { .. } => ErrorCode::NotFound,
            C15tError::InvalidRequest(_) | C15tError::NoSqlDatabase(_) => ErrorCode::BadRequest,
        }
    }
}
