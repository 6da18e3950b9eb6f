//! Dynamic field values.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{FieldType, format_timestamp, parse_timestamp};

/// A row keyed by logical field name.
pub type Record = BTreeMap<String, Value>;

/// A dynamically typed field value.
///
/// Records travel through adapters and hooks as maps of these. The variant
/// set mirrors [`FieldType`] plus `Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    Date(DateTime<Utc>),
    StringArray(Vec<String>),
    NumberArray(Vec<i64>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns true for the two array variants.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::StringArray(_) | Value::NumberArray(_))
    }

    /// Expands an array value into its scalar elements.
    ///
    /// Returns `None` for non-array values.
    pub fn array_elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::StringArray(items) => Some(items.iter().cloned().map(Value::String).collect()),
            Value::NumberArray(items) => Some(items.iter().copied().map(Value::Number).collect()),
            _ => None,
        }
    }

    /// Coerces this value into the representation expected by `field_type`.
    ///
    /// Strings are parsed into dates, JSON arrays into typed arrays, and any
    /// value is accepted by [`FieldType::Json`]. `Null` passes through. On
    /// failure the original value is handed back.
    pub fn coerce(self, field_type: FieldType) -> Result<Value, Value> {
        match (field_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldType::String, v @ Value::String(_))
            | (FieldType::Number, v @ Value::Number(_))
            | (FieldType::Boolean, v @ Value::Bool(_))
            | (FieldType::Date, v @ Value::Date(_))
            | (FieldType::StringArray, v @ Value::StringArray(_))
            | (FieldType::NumberArray, v @ Value::NumberArray(_)) => Ok(v),
            (FieldType::Date, Value::String(s)) => match parse_timestamp(&s) {
                Some(date) => Ok(Value::Date(date)),
                None => Err(Value::String(s)),
            },
            (FieldType::StringArray, Value::NumberArray(items)) if items.is_empty() => {
                Ok(Value::StringArray(Vec::new()))
            }
            (FieldType::NumberArray, Value::StringArray(items)) if items.is_empty() => {
                Ok(Value::NumberArray(Vec::new()))
            }
            (FieldType::StringArray | FieldType::NumberArray, Value::Json(json)) => {
                match Value::from_json_typed(json.clone(), field_type) {
                    Some(v) => Ok(v),
                    None => Err(Value::Json(json)),
                }
            }
            (FieldType::Json, Value::Json(json)) => Ok(Value::Json(json)),
            (FieldType::Json, other) => Ok(Value::Json(other.to_json())),
            (_, other) => Err(other),
        }
    }

    /// Converts to JSON. Dates become canonical RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::from(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(format_timestamp(*d)),
            Value::StringArray(items) => serde_json::Value::from(items.clone()),
            Value::NumberArray(items) => serde_json::Value::from(items.clone()),
            Value::Json(json) => json.clone(),
        }
    }

    /// Converts JSON into the variant matching `field_type`.
    ///
    /// Returns `None` when the JSON shape does not fit the type.
    pub fn from_json_typed(json: serde_json::Value, field_type: FieldType) -> Option<Value> {
        use serde_json::Value as Json;

        if json.is_null() {
            return Some(Value::Null);
        }
        match field_type {
            FieldType::String => json.as_str().map(|s| Value::String(s.to_string())),
            FieldType::Number => json.as_i64().map(Value::Number),
            FieldType::Boolean => json.as_bool().map(Value::Bool),
            FieldType::Date => json.as_str().and_then(parse_timestamp).map(Value::Date),
            FieldType::StringArray => match json {
                Json::Array(items) => items
                    .into_iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::StringArray),
                _ => None,
            },
            FieldType::NumberArray => match json {
                Json::Array(items) => items
                    .iter()
                    .map(serde_json::Value::as_i64)
                    .collect::<Option<Vec<_>>>()
                    .map(Value::NumberArray),
                _ => None,
            },
            FieldType::Json => Some(Value::Json(json)),
        }
    }

    /// Orders two values of the same variant.
    ///
    /// Values of different variants, `Null`, arrays and JSON are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringArray(value)
    }
}

impl From<Vec<&str>> for Value {
    fn from(value: Vec<&str>) -> Self {
        Value::StringArray(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Value::NumberArray(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Schema-less JSON conversion.
///
/// Homogeneous string or integer arrays become typed arrays; objects and
/// mixed arrays stay JSON. Strings are never promoted to dates here.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Number(i),
                None => Value::Json(Json::Number(n)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => {
                if let Some(strings) = items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                {
                    Value::StringArray(strings)
                } else if let Some(numbers) =
                    items.iter().map(Json::as_i64).collect::<Option<Vec<_>>>()
                {
                    Value::NumberArray(numbers)
                } else {
                    Value::Json(Json::Array(items))
                }
            }
            obj @ Json::Object(_) => Value::Json(obj),
        }
    }
}

/// Builds a [`Record`] from `field => value` pairs.
///
/// ```
/// use c15t_types::{record, Value};
///
/// let subject = record! { "isIdentified" => false, "externalId" => "user-1" };
/// assert_eq!(subject["isIdentified"], Value::Bool(false));
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        record
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_coerce_parses_dates() {
        let coerced = Value::from("2024-01-02T03:04:05.000Z")
            .coerce(FieldType::Date)
            .unwrap();
        assert_eq!(
            coerced,
            Value::Date(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        let result = Value::from("yes").coerce(FieldType::Boolean);
        assert_eq!(result, Err(Value::from("yes")));
    }

    #[test]
    fn test_coerce_anything_into_json() {
        let coerced = Value::from(vec!["a", "b"]).coerce(FieldType::Json).unwrap();
        assert_eq!(coerced, Value::Json(serde_json::json!(["a", "b"])));
    }

    #[test]
    fn test_coerce_empty_arrays_between_kinds() {
        let coerced = Value::NumberArray(vec![]).coerce(FieldType::StringArray);
        assert_eq!(coerced, Ok(Value::StringArray(vec![])));
    }

    #[test]
    fn test_schemaless_json_conversion() {
        assert_eq!(
            Value::from(serde_json::json!(["x", "y"])),
            Value::StringArray(vec!["x".into(), "y".into()])
        );
        assert_eq!(
            Value::from(serde_json::json!([1, 2])),
            Value::NumberArray(vec![1, 2])
        );
        assert!(matches!(
            Value::from(serde_json::json!({"marketing": true})),
            Value::Json(_)
        ));
    }

    #[test]
    fn test_from_json_typed_rejects_wrong_shape() {
        assert_eq!(
            Value::from_json_typed(serde_json::json!("x"), FieldType::Number),
            None
        );
        assert_eq!(
            Value::from_json_typed(serde_json::json!(null), FieldType::Number),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_record_macro() {
        let record = record! { "a" => 1, "b" => Option::<String>::None };
        assert_eq!(record["a"], Value::Number(1));
        assert!(record["b"].is_null());
    }

    #[test]
    fn test_compare_mixed_variants_is_unordered() {
        assert_eq!(Value::from(1).compare(&Value::from("1")), None);
        assert_eq!(
            Value::from("a").compare(&Value::from("b")),
            Some(Ordering::Less)
        );
    }

    proptest! {
        #[test]
        fn prop_date_json_round_trip(secs in 0i64..4_000_000_000, millis in 0u32..1000) {
            let at = Utc.timestamp_opt(secs, millis * 1_000_000).unwrap();
            let value = Value::Date(at);
            let back = Value::from_json_typed(value.to_json(), FieldType::Date);
            prop_assert_eq!(back, Some(value));
        }

        #[test]
        fn prop_number_compare_matches_i64(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(Value::Number(a).compare(&Value::Number(b)), Some(a.cmp(&b)));
        }
    }
}
