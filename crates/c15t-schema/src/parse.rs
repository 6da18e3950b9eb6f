//! API boundary filtering of records.

use c15t_types::Record;

use crate::error::{Result, SchemaError};
use crate::table::{ID_FIELD, TableSchema};

/// Write operation being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Create,
    Update,
}

/// Validates caller-supplied data against `table`.
///
/// Rejects unknown fields, the generated `id`, and fields declared with
/// `input: false`. On create, required fields without a default must be
/// present.
pub fn parse_input(table: &TableSchema, data: Record, action: WriteAction) -> Result<Record> {
    for name in data.keys() {
        if name == ID_FIELD {
            return Err(SchemaError::InputNotAllowed {
                model: table.model.clone(),
                field: name.clone(),
            });
        }
        let field = table.require_field(name)?;
        if !field.input {
            return Err(SchemaError::InputNotAllowed {
                model: table.model.clone(),
                field: name.clone(),
            });
        }
    }

    if action == WriteAction::Create {
        let missing = table.fields.iter().find(|(name, field)| {
            field.required
                && field.default_value.is_none()
                && data.get(*name).is_none_or(c15t_types::Value::is_null)
        });
        if let Some((name, _)) = missing {
            return Err(SchemaError::MissingField {
                model: table.model.clone(),
                field: name.clone(),
            });
        }
    }

    Ok(data)
}

/// Removes fields declared with `returned: false`.
pub fn parse_output(table: &TableSchema, mut record: Record) -> Record {
    record.retain(|name, _| table.field(name).is_none_or(|field| field.returned));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldAttribute;
    use c15t_types::record;

    fn table() -> TableSchema {
        TableSchema::new("subject", 1, "sub")
            .with_field("isIdentified", FieldAttribute::boolean().required().default_value(false))
            .with_field("externalId", FieldAttribute::string().required())
            .with_field("lastIpAddress", FieldAttribute::string().hidden())
            .with_field("status", FieldAttribute::string().no_input())
    }

    #[test]
    fn test_create_requires_fields_without_default() {
        let err = parse_input(&table(), record! {}, WriteAction::Create).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field, .. } if field == "externalId"));
    }

    #[test]
    fn test_update_skips_required_check() {
        let data = record! { "isIdentified" => true };
        assert_eq!(parse_input(&table(), data.clone(), WriteAction::Update).unwrap(), data);
    }

    #[test]
    fn test_rejects_non_input_fields() {
        let data = record! { "externalId" => "u1", "status" => "deleted" };
        let err = parse_input(&table(), data, WriteAction::Create).unwrap_err();
        assert!(matches!(err, SchemaError::InputNotAllowed { ref field, .. } if field == "status"));
        assert_eq!(err.code(), c15t_types::ErrorCode::BadRequest);
    }

    #[test]
    fn test_rejects_id_and_unknown_fields() {
        let with_id = record! { "id" => "sub-1", "externalId" => "u1" };
        assert!(parse_input(&table(), with_id, WriteAction::Create).is_err());

        let unknown = record! { "nickname" => "x" };
        assert!(matches!(
            parse_input(&table(), unknown, WriteAction::Update),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_output_drops_hidden_fields() {
        let out = parse_output(
            &table(),
            record! { "id" => "sub_1", "lastIpAddress" => "10.0.0.1", "externalId" => "u1" },
        );
        assert!(out.contains_key("id"));
        assert!(out.contains_key("externalId"));
        assert!(!out.contains_key("lastIpAddress"));
    }
}
