//! # c15t-types: Core types for `c15t`
//!
//! This crate contains the types shared by every layer of the consent
//! storage stack:
//! - Dynamic field values ([`Value`]) and rows ([`Record`])
//! - Abstract field types ([`FieldType`])
//! - Identifier generation ([`generate_id`], [`IdGeneration`])
//! - Timestamp formatting and parsing ([`format_timestamp`], [`parse_timestamp`])
//! - HTTP-style error classification ([`ErrorCode`])

use std::fmt::{self, Display};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod value;

pub use value::{Record, Value};

// ============================================================================
// Field Types
// ============================================================================

/// Abstract type of a schema field.
///
/// Each backend projects these onto its own column types; the in-memory
/// adapter stores the [`Value`] variant directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Number,
    /// Boolean flag.
    Boolean,
    /// UTC timestamp.
    Date,
    /// List of strings, stored as JSON text in SQL backends.
    #[serde(rename = "string[]")]
    StringArray,
    /// List of integers, stored as JSON text in SQL backends.
    #[serde(rename = "number[]")]
    NumberArray,
    /// Arbitrary JSON document, stored as text in SQL backends.
    Json,
}

impl FieldType {
    /// Returns true when values of this type are persisted as serialized JSON.
    pub fn is_serialized(self) -> bool {
        matches!(
            self,
            FieldType::StringArray | FieldType::NumberArray | FieldType::Json
        )
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::StringArray => write!(f, "string[]"),
            FieldType::NumberArray => write!(f, "number[]"),
            FieldType::Json => write!(f, "json"),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Generates a prefixed identifier such as `sub_3f2a...`.
///
/// The suffix is a UUID v4 in simple (hyphen-less) form, so identifiers are
/// 36 characters or fewer for prefixes of up to three characters.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Custom identifier generator. Receives the model name.
pub type IdGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Strategy for generating primary keys on create.
#[derive(Clone, Default)]
pub enum IdGeneration {
    /// `<table prefix>_<uuid simple>`.
    #[default]
    Prefixed,
    /// Plain hyphenated UUID v4.
    Uuid,
    /// Caller supplied generator.
    Custom(IdGenerator),
}

impl IdGeneration {
    /// Produces a new identifier for `model`, using `prefix` when prefixed.
    pub fn generate(&self, model: &str, prefix: &str) -> String {
        match self {
            IdGeneration::Prefixed => generate_id(prefix),
            IdGeneration::Uuid => Uuid::new_v4().to_string(),
            IdGeneration::Custom(generator) => generator(model),
        }
    }
}

impl fmt::Debug for IdGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdGeneration::Prefixed => write!(f, "Prefixed"),
            IdGeneration::Uuid => write!(f, "Uuid"),
            IdGeneration::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Canonical text form of a timestamp: RFC 3339, millisecond precision, `Z`.
///
/// Fixed width, so lexicographic order matches chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses the timestamp shapes produced by the supported databases.
///
/// Accepts RFC 3339, Postgres text output (`2024-01-01 10:00:00.5+00`) and
/// naive `YYYY-MM-DD HH:MM:SS[.f]` values, which are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Error Codes
// ============================================================================

/// HTTP-style classification attached to every c15t error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    InternalServerError,
}

impl ErrorCode {
    /// Matching HTTP status code.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::InternalServerError => 500,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BadRequest => write!(f, "BAD_REQUEST"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::Conflict => write!(f, "CONFLICT"),
            ErrorCode::InternalServerError => write!(f, "INTERNAL_SERVER_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test]
    fn test_generate_id_uses_prefix() {
        let id = generate_id("sub");
        assert!(id.starts_with("sub_"));
        assert_eq!(id.len(), 36);
        assert_ne!(id, generate_id("sub"));
    }

    #[test]
    fn test_id_generation_strategies() {
        assert!(IdGeneration::Prefixed.generate("subject", "sub").starts_with("sub_"));
        assert_eq!(IdGeneration::Uuid.generate("subject", "sub").len(), 36);

        let custom = IdGeneration::Custom(Arc::new(|model: &str| format!("{model}-1")));
        assert_eq!(custom.generate("domain", "dom"), "domain-1");
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        assert_eq!(format_timestamp(at), "2024-03-01T09:05:00.000Z");
    }

    #[test_case("2024-03-01T09:05:00.000Z"; "rfc3339")]
    #[test_case("2024-03-01 09:05:00+00"; "postgres text")]
    #[test_case("2024-03-01 09:05:00.000000"; "mysql datetime")]
    #[test_case("2024-03-01T09:05:00"; "naive iso")]
    fn test_parse_timestamp_shapes(text: &str) {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        assert_eq!(parse_timestamp(text), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::BadRequest.to_string(), "BAD_REQUEST");
        assert_eq!(ErrorCode::Conflict.status(), 409);
    }

    #[test]
    fn test_field_type_display_round_trip() {
        let json = serde_json::to_string(&FieldType::StringArray).unwrap();
        assert_eq!(json, "\"string[]\"");
        let back: FieldType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FieldType::StringArray);
        assert_eq!(FieldType::Json.to_string(), "json");
    }
}
