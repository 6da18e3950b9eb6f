//! Error types for schema construction and validation.

use c15t_types::ErrorCode;
use thiserror::Error;

/// Schema construction and record validation errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A table declares a field named `id`, which collides with the primary key.
    #[error("Field name `id` is reserved (model {model})")]
    ReservedField { model: String },

    /// Model name not present in the table map.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Field not declared on the model.
    #[error("Unknown field `{field}` on model {model}")]
    UnknownField { model: String, field: String },

    /// A reference points at a model that does not exist.
    #[error("Field `{field}` on model {model} references unknown model {target}")]
    UnknownReference {
        model: String,
        field: String,
        target: String,
    },

    /// Two models resolve to the same physical table name.
    #[error("Table name {table_name} is used by both {first} and {second}")]
    DuplicateTableName {
        table_name: String,
        first: String,
        second: String,
    },

    /// A required field was absent on create.
    #[error("Missing required field `{field}` on model {model}")]
    MissingField { model: String, field: String },

    /// A field marked `input: false` was supplied by the caller.
    #[error("Field `{field}` on model {model} cannot be set")]
    InputNotAllowed { model: String, field: String },

    /// Typed entity conversion failed.
    #[error("Failed to convert {model} record: {source}")]
    Entity {
        model: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SchemaError {
    /// HTTP-style classification.
    pub fn code(&self) -> ErrorCode {
        match self {
            SchemaError::UnknownModel(_)
            | SchemaError::UnknownField { .. }
            | SchemaError::MissingField { .. }
            | SchemaError::InputNotAllowed { .. } => ErrorCode::BadRequest,
            SchemaError::ReservedField { .. }
            | SchemaError::UnknownReference { .. }
            | SchemaError::DuplicateTableName { .. }
            | SchemaError::Entity { .. } => ErrorCode::InternalServerError,
        }
    }
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
