//! Configuration error types

use c15t_schema::SchemaError;
use c15t_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid table configuration: {0}")]
    Schema(#[from] SchemaError),

    #[error("XDG directory error: {0}")]
    XdgError(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::ValidationError(_) => ErrorCode::BadRequest,
            ConfigError::Schema(e) => e.code(),
            ConfigError::XdgError(_) => ErrorCode::InternalServerError,
        }
    }
}
