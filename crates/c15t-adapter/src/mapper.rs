//! Schema-aware record preparation shared by every adapter.
//!
//! Adapters never touch raw caller data directly; they run it through a
//! [`ModelMapper`] first. The mapper resolves models, generates ids, applies
//! defaults and `on_update` values, checks required fields, coerces values to
//! their declared types and runs the input/output transforms.

use std::sync::Arc;

use c15t_schema::{FieldAttribute, ID_FIELD, SchemaError, TableSchema, Tables};
use c15t_types::{FieldType, IdGeneration, Record, Value};

use crate::error::{AdapterError, Result};
use crate::where_clause::{Operator, Where, validate_where};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort specification for `find_many`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SortBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Maps caller records onto the schema and back.
#[derive(Debug, Clone)]
pub struct ModelMapper {
    tables: Arc<Tables>,
    id_generation: IdGeneration,
}

impl ModelMapper {
    pub fn new(tables: Arc<Tables>, id_generation: IdGeneration) -> Self {
        Self {
            tables,
            id_generation,
        }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn shared_tables(&self) -> Arc<Tables> {
        Arc::clone(&self.tables)
    }

    /// Resolves a model, failing with [`AdapterError::UnknownModel`].
    pub fn table(&self, model: &str) -> Result<&TableSchema> {
        self.tables
            .get(model)
            .ok_or_else(|| AdapterError::UnknownModel(model.to_string()))
    }

    /// Prepares a record for insertion.
    ///
    /// Keeps a caller supplied non-empty string `id`, otherwise generates one.
    pub fn prepare_create(&self, model: &str, data: Record) -> Result<Record> {
        let table = self.table(model)?;
        check_fields(table, &data)?;

        let mut out = Record::new();
        let id = match data.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Null | Value::String(_)) | None => {
                self.id_generation.generate(model, &table.id_prefix)
            }
            Some(other) => {
                return Err(invalid_value(model, ID_FIELD, FieldType::String, other));
            }
        };
        out.insert(ID_FIELD.to_string(), Value::String(id));

        for (name, field) in &table.fields {
            let supplied = data.get(name).filter(|v| !v.is_null()).cloned();
            let value = match supplied {
                Some(value) => value,
                None => match &field.default_value {
                    Some(default) => default.resolve(),
                    None if field.required => {
                        return Err(SchemaError::MissingField {
                            model: model.to_string(),
                            field: name.clone(),
                        }
                        .into());
                    }
                    None => Value::Null,
                },
            };
            out.insert(name.clone(), write_value(model, name, field, value)?);
        }
        Ok(out)
    }

    /// Prepares a partial record for update.
    ///
    /// Applies `on_update` to fields the caller did not set. The `id` cannot
    /// be changed.
    pub fn prepare_update(&self, model: &str, data: Record) -> Result<Record> {
        let table = self.table(model)?;
        check_fields(table, &data)?;
        if data.contains_key(ID_FIELD) {
            return Err(SchemaError::InputNotAllowed {
                model: model.to_string(),
                field: ID_FIELD.to_string(),
            }
            .into());
        }

        let mut out = Record::new();
        for (name, value) in data {
            let Some(field) = table.field(&name) else {
                continue;
            };
            if value.is_null() && field.required {
                return Err(SchemaError::MissingField {
                    model: model.to_string(),
                    field: name,
                }
                .into());
            }
            let value = write_value(model, &name, field, value)?;
            out.insert(name, value);
        }
        for (name, field) in &table.fields {
            if let Some(thunk) = &field.on_update {
                if !out.contains_key(name) {
                    out.insert(name.clone(), write_value(model, name, field, thunk())?);
                }
            }
        }
        Ok(out)
    }

    /// Validates clauses and coerces their values to the field types.
    pub fn prepare_where(&self, model: &str, clauses: Vec<Where>) -> Result<Vec<Where>> {
        let table = self.table(model)?;
        validate_where(&clauses)?;
        clauses
            .into_iter()
            .map(|mut clause| {
                let field_type = field_type(table, &clause.field)?;
                clause.value = match clause.operator {
                    Operator::In => coerce_array(model, &clause.field, field_type, clause.value)?,
                    op if op.is_pattern() && field_type != FieldType::String => {
                        return Err(AdapterError::InvalidWhere {
                            field: clause.field.clone(),
                            reason: format!("`{op}` applies to string fields only"),
                        });
                    }
                    op if op.is_pattern() => clause.value,
                    _ => clause
                        .value
                        .coerce(field_type)
                        .map_err(|v| invalid_value(model, &clause.field, field_type, &v))?,
                };
                Ok(clause)
            })
            .collect()
    }

    /// Checks that a sort field exists.
    pub fn check_sort(&self, model: &str, sort_by: Option<&SortBy>) -> Result<()> {
        if let Some(sort) = sort_by {
            field_type(self.table(model)?, &sort.field)?;
        }
        Ok(())
    }

    /// Checks that every selected field exists.
    pub fn check_select(&self, model: &str, select: Option<&[String]>) -> Result<()> {
        let table = self.table(model)?;
        for name in select.unwrap_or_default() {
            field_type(table, name)?;
        }
        Ok(())
    }

    /// Applies output transforms and the `select` projection to a stored row.
    pub fn transform_output(
        &self,
        model: &str,
        mut record: Record,
        select: Option<&[String]>,
    ) -> Result<Record> {
        let table = self.table(model)?;
        if let Some(select) = select {
            record.retain(|name, _| select.iter().any(|s| s == name));
        }
        for (name, value) in &mut record {
            if let Some(transform) = table.field(name).and_then(|f| f.transform.output.as_ref()) {
                *value = transform(std::mem::take(value));
            }
        }
        Ok(record)
    }
}

fn check_fields(table: &TableSchema, data: &Record) -> Result<()> {
    for name in data.keys() {
        if !table.has_field(name) {
            return Err(SchemaError::UnknownField {
                model: table.model.clone(),
                field: name.clone(),
            }
            .into());
        }
    }
    Ok(())
}

fn field_type(table: &TableSchema, name: &str) -> Result<FieldType> {
    if name == ID_FIELD {
        return Ok(FieldType::String);
    }
    Ok(table.require_field(name)?.field_type)
}

fn write_value(model: &str, name: &str, field: &FieldAttribute, value: Value) -> Result<Value> {
    let value = match &field.transform.input {
        Some(transform) => transform(value),
        None => value,
    };
    value
        .coerce(field.field_type)
        .map_err(|v| invalid_value(model, name, field.field_type, &v))
}

fn coerce_array(model: &str, name: &str, field_type: FieldType, value: Value) -> Result<Value> {
    match (field_type, value) {
        (FieldType::Number, Value::NumberArray(items)) => Ok(Value::NumberArray(items)),
        (FieldType::Number, Value::StringArray(items)) if items.is_empty() => {
            Ok(Value::NumberArray(Vec::new()))
        }
        (FieldType::Number, other) => Err(invalid_value(model, name, field_type, &other)),
        (_, Value::NumberArray(items)) if items.is_empty() => Ok(Value::StringArray(Vec::new())),
        (_, Value::StringArray(items)) => Ok(Value::StringArray(items)),
        (_, other) => Err(invalid_value(model, name, field_type, &other)),
    }
}

fn invalid_value(model: &str, field: &str, expected: FieldType, value: &Value) -> AdapterError {
    AdapterError::InvalidValue {
        model: model.to_string(),
        field: field.to_string(),
        expected,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_schema::{SchemaOptions, get_consent_tables};
    use c15t_types::record;

    fn mapper() -> ModelMapper {
        let tables = get_consent_tables(&SchemaOptions::default()).unwrap();
        ModelMapper::new(Arc::new(tables), IdGeneration::Prefixed)
    }

    #[test]
    fn test_create_generates_id_and_defaults() {
        let out = mapper().prepare_create("subject", record! {}).unwrap();
        assert!(out["id"].as_str().unwrap().starts_with("sub_"));
        assert_eq!(out["isIdentified"], Value::Bool(false));
        assert_eq!(out["status"], Value::from("active"));
        assert!(out["createdAt"].as_date().is_some());
        assert!(out["externalId"].is_null());
    }

    #[test]
    fn test_pattern_operators_need_string_fields() {
        let mapper = mapper();
        let on_array = mapper.prepare_where(
            "geoLocation",
            vec![Where::new("regulatoryZones", Operator::Contains, "gdpr")],
        );
        assert!(matches!(on_array, Err(AdapterError::InvalidWhere { ref field, .. }) if field == "regulatoryZones"));

        let on_json = mapper.prepare_where(
            "consent",
            vec![Where::new("preferences", Operator::StartsWith, "{")],
        );
        assert!(matches!(on_json, Err(AdapterError::InvalidWhere { .. })));

        assert!(
            mapper
                .prepare_where("geoLocation", vec![Where::new("countryCode", Operator::Contains, "de")])
                .is_ok()
        );
    }

    #[test]
    fn test_create_keeps_explicit_id() {
        let out = mapper()
            .prepare_create("subject", record! { "id" => "sub-1" })
            .unwrap();
        assert_eq!(out["id"], Value::from("sub-1"));
    }

    #[test]
    fn test_create_missing_required_field() {
        let err = mapper()
            .prepare_create("consentPurpose", record! { "name" => "Marketing" })
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Schema(SchemaError::MissingField { ref field, .. }) if field == "code"
        ));
        assert_eq!(err.code(), c15t_types::ErrorCode::BadRequest);
    }

    #[test]
    fn test_create_coerces_date_strings() {
        let out = mapper()
            .prepare_create(
                "subject",
                record! { "createdAt" => "2024-01-01T00:00:00.000Z" },
            )
            .unwrap();
        assert!(out["createdAt"].as_date().is_some());
    }

    #[test]
    fn test_create_rejects_wrong_type() {
        let err = mapper()
            .prepare_create("subject", record! { "isIdentified" => "no" })
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidValue { .. }));
    }

    #[test]
    fn test_unknown_model_and_field() {
        assert!(matches!(
            mapper().prepare_create("user", record! {}),
            Err(AdapterError::UnknownModel(_))
        ));
        assert!(matches!(
            mapper().prepare_create("subject", record! { "email" => "a@b.c" }),
            Err(AdapterError::Schema(SchemaError::UnknownField { .. }))
        ));
    }

    #[test]
    fn test_update_applies_on_update() {
        let out = mapper()
            .prepare_update("subject", record! { "isIdentified" => true })
            .unwrap();
        assert_eq!(out["isIdentified"], Value::Bool(true));
        assert!(out["updatedAt"].as_date().is_some());
        assert!(!out.contains_key("createdAt"));
    }

    #[test]
    fn test_update_rejects_id() {
        assert!(
            mapper()
                .prepare_update("subject", record! { "id" => "sub_2" })
                .is_err()
        );
    }

    #[test]
    fn test_where_values_are_coerced() {
        let clauses = mapper()
            .prepare_where(
                "consent",
                vec![Where::new("givenAt", Operator::Gt, "2024-01-01T00:00:00Z")],
            )
            .unwrap();
        assert!(matches!(clauses[0].value, Value::Date(_)));
    }

    #[test]
    fn test_where_unknown_field() {
        assert!(
            mapper()
                .prepare_where("subject", vec![Where::eq("email", "x")])
                .is_err()
        );
    }

    #[test]
    fn test_output_projection() {
        let record = record! { "id" => "sub_1", "isIdentified" => false, "status" => "active" };
        let out = mapper()
            .transform_output("subject", record, Some(&["id".to_string()]))
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
