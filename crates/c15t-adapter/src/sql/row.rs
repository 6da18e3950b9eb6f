//! Row decoding.

use c15t_schema::{ID_FIELD, TableSchema};
use c15t_types::{FieldType, Record, Value, parse_timestamp};
use chrono::DateTime;
use sqlx::any::AnyRow;
use sqlx::{Column, Row};

use crate::error::{AdapterError, Result};

/// Decodes a row whose columns are aliased to logical field names.
pub(crate) fn decode_row(table: &TableSchema, row: &AnyRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let name = column.name();
        let field_type = if name == ID_FIELD {
            FieldType::String
        } else if let Some(field) = table.field(name) {
            field.field_type
        } else {
            continue;
        };
        let value = decode_value(row, column.ordinal(), field_type).map_err(|reason| {
            AdapterError::Decode {
                model: table.model.clone(),
                field: name.to_string(),
                reason,
            }
        })?;
        record.insert(name.to_string(), value);
    }
    Ok(record)
}

/// Reads column `index` as `field_type`.
///
/// The `Any` driver only knows a handful of primitive types, so booleans may
/// arrive as integers and dates, arrays and JSON arrive as text.
fn decode_value(row: &AnyRow, index: usize, field_type: FieldType) -> std::result::Result<Value, String> {
    match field_type {
        FieldType::String => Ok(text(row, index)?.map_or(Value::Null, Value::String)),
        FieldType::Number => {
            if let Ok(n) = row.try_get::<Option<i64>, _>(index) {
                return Ok(n.map_or(Value::Null, Value::Number));
            }
            let f = row
                .try_get::<Option<f64>, _>(index)
                .map_err(|e| e.to_string())?;
            Ok(f.map_or(Value::Null, |f| Value::Number(f.round() as i64)))
        }
        FieldType::Boolean => {
            if let Ok(b) = row.try_get::<Option<bool>, _>(index) {
                return Ok(b.map_or(Value::Null, Value::Bool));
            }
            let n = row
                .try_get::<Option<i64>, _>(index)
                .map_err(|e| e.to_string())?;
            Ok(n.map_or(Value::Null, |n| Value::Bool(n != 0)))
        }
        FieldType::Date => {
            if let Ok(millis) = row.try_get::<Option<i64>, _>(index) {
                return match millis {
                    None => Ok(Value::Null),
                    Some(millis) => DateTime::from_timestamp_millis(millis)
                        .map(Value::Date)
                        .ok_or_else(|| format!("timestamp out of range: {millis}")),
                };
            }
            match text(row, index)? {
                None => Ok(Value::Null),
                Some(s) => parse_timestamp(&s)
                    .map(Value::Date)
                    .ok_or_else(|| format!("unrecognized timestamp: {s}")),
            }
        }
        FieldType::StringArray | FieldType::NumberArray | FieldType::Json => {
            match text(row, index)? {
                None => Ok(Value::Null),
                Some(s) => {
                    let json: serde_json::Value =
                        serde_json::from_str(&s).map_err(|e| e.to_string())?;
                    Value::from_json_typed(json, field_type)
                        .ok_or_else(|| format!("expected {field_type}, found {s}"))
                }
            }
        }
    }
}

fn text(row: &AnyRow, index: usize) -> std::result::Result<Option<String>, String> {
    row.try_get::<Option<String>, _>(index)
        .map_err(|e| e.to_string())
}
