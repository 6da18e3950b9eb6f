//! Built-in consent tables.
//!
//! # Models
//!
//! ```text
//! order  model                    prefix  references
//!   1    subject                  sub
//!   2    consentPurpose           pur
//!   3    domain                   dom
//!   4    geoLocation              geo
//!   5    consentPolicy            pol
//!   6    consent                  cns     subject, domain, consentPolicy
//!   7    consentPurposeJunction   cpj     consent, consentPurpose
//!   8    consentRecord            rec     subject, consent
//!   9    consentGeoLocation       cgl     consent
//!  10    consentWithdrawal        wdr     consent, subject
//!  11    auditLog                 log     subject
//! ```

use std::collections::BTreeMap;

use c15t_types::{Value, generate_id};
use chrono::Utc;

use crate::error::{Result, SchemaError};
use crate::field::{FieldAttribute, OnDelete};
use crate::plugin::{PluginSchema, merge_plugin_schemas};
use crate::table::{TableSchema, Tables};

/// User customisation of one model.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Physical table name override.
    pub model_name: Option<String>,
    /// Column name overrides keyed by logical field.
    pub fields: BTreeMap<String, String>,
    /// Extra fields appended to the model.
    pub additional_fields: BTreeMap<String, FieldAttribute>,
}

impl TableOptions {
    pub fn model_name(mut self, table_name: impl Into<String>) -> Self {
        self.model_name = Some(table_name.into());
        self
    }

    /// Maps a logical field onto a different column.
    pub fn field(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.insert(field.into(), column.into());
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, field: FieldAttribute) -> Self {
        self.additional_fields.insert(name.into(), field);
        self
    }
}

/// Inputs to [`get_consent_tables`].
#[derive(Debug, Clone, Default)]
pub struct SchemaOptions {
    /// Per-model customisation keyed by model name.
    pub tables: BTreeMap<String, TableOptions>,
    /// Plugin contributions, applied in order.
    pub plugins: Vec<PluginSchema>,
}

impl SchemaOptions {
    pub fn with_table(mut self, model: impl Into<String>, options: TableOptions) -> Self {
        self.tables.insert(model.into(), options);
        self
    }

    pub fn with_plugin(mut self, plugin: PluginSchema) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// Builds the full table map: built-in models, then plugins, then user
/// options.
pub fn get_consent_tables(options: &SchemaOptions) -> Result<Tables> {
    let mut tables = merge_plugin_schemas(builtin_tables(), &options.plugins);

    for (model, table_options) in &options.tables {
        let table = tables
            .get_mut(model)
            .ok_or_else(|| SchemaError::UnknownModel(model.clone()))?;
        if let Some(model_name) = &table_options.model_name {
            table.table_name.clone_from(model_name);
        }
        for (name, field) in &table_options.additional_fields {
            table.fields.insert(name.clone(), field.clone());
        }
        for (name, column) in &table_options.fields {
            let field = table
                .fields
                .get_mut(name)
                .ok_or_else(|| SchemaError::UnknownField {
                    model: model.clone(),
                    field: name.clone(),
                })?;
            field.field_name = Some(column.clone());
        }
    }

    tables.validate()?;
    Ok(tables)
}

fn now() -> Value {
    Value::Date(Utc::now())
}

fn builtin_tables() -> Tables {
    let mut tables = Tables::new();

    tables.insert(
        TableSchema::new("subject", 1, "sub")
            .with_field("isIdentified", FieldAttribute::boolean().required().default_value(false))
            .with_field("externalId", FieldAttribute::string().unique())
            .with_field("identityProvider", FieldAttribute::string())
            .with_field("lastIpAddress", FieldAttribute::string())
            .with_field("status", FieldAttribute::string().default_value("active"))
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("consentPurpose", 2, "pur")
            .with_field("code", FieldAttribute::string().required().unique())
            .with_field("name", FieldAttribute::string().required())
            .with_field("description", FieldAttribute::string())
            .with_field("isEssential", FieldAttribute::boolean().required().default_value(false))
            .with_field("dataCategory", FieldAttribute::string())
            .with_field("legalBasis", FieldAttribute::string())
            .with_field("isActive", FieldAttribute::boolean().required().default_value(true))
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("domain", 3, "dom")
            .with_field("name", FieldAttribute::string().required().unique())
            .with_field("description", FieldAttribute::string())
            .with_field(
                "allowedOrigins",
                FieldAttribute::string_array().default_value(Vec::<String>::new()),
            )
            .with_field("isVerified", FieldAttribute::boolean().required().default_value(false))
            .with_field("isActive", FieldAttribute::boolean().required().default_value(true))
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("geoLocation", 4, "geo")
            .with_field("countryCode", FieldAttribute::string().required())
            .with_field("countryName", FieldAttribute::string().required())
            .with_field("regionCode", FieldAttribute::string())
            .with_field("regionName", FieldAttribute::string())
            .with_field("regulatoryZones", FieldAttribute::string_array())
            .with_field("createdAt", FieldAttribute::created_at()),
    );

    tables.insert(
        TableSchema::new("consentPolicy", 5, "pol")
            .with_field("version", FieldAttribute::string().required())
            .with_field("name", FieldAttribute::string().required())
            .with_field("type", FieldAttribute::string().required())
            .with_field("effectiveDate", FieldAttribute::date().required())
            .with_field("expirationDate", FieldAttribute::date())
            .with_field("content", FieldAttribute::string().required())
            .with_field("contentHash", FieldAttribute::string().required())
            .with_field("isActive", FieldAttribute::boolean().required().default_value(true))
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("consent", 6, "cns")
            .with_field(
                "subjectId",
                FieldAttribute::string()
                    .required()
                    .references("subject", OnDelete::Cascade),
            )
            .with_field(
                "domainId",
                FieldAttribute::string()
                    .required()
                    .references("domain", OnDelete::Cascade),
            )
            .with_field(
                "policyId",
                FieldAttribute::string().references("consentPolicy", OnDelete::Restrict),
            )
            .with_field(
                "purposeIds",
                FieldAttribute::string_array().default_value(Vec::<String>::new()),
            )
            .with_field("preferences", FieldAttribute::json())
            .with_field("metadata", FieldAttribute::json())
            .with_field("ipAddress", FieldAttribute::string())
            .with_field("userAgent", FieldAttribute::string())
            .with_field("region", FieldAttribute::string())
            .with_field("status", FieldAttribute::string().required().default_value("active"))
            .with_field("withdrawalReason", FieldAttribute::string())
            .with_field("givenAt", FieldAttribute::date().required().default_fn(now))
            .with_field("validUntil", FieldAttribute::date())
            .with_field("isActive", FieldAttribute::boolean().required().default_value(true))
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("consentPurposeJunction", 7, "cpj")
            .with_field(
                "consentId",
                FieldAttribute::string()
                    .required()
                    .references("consent", OnDelete::Cascade),
            )
            .with_field(
                "purposeId",
                FieldAttribute::string()
                    .required()
                    .references("consentPurpose", OnDelete::Cascade),
            )
            .with_field("status", FieldAttribute::string().required().default_value("active"))
            .with_field("metadata", FieldAttribute::json())
            .with_field("createdAt", FieldAttribute::created_at())
            .with_field("updatedAt", FieldAttribute::updated_at()),
    );

    tables.insert(
        TableSchema::new("consentRecord", 8, "rec")
            .with_field(
                "subjectId",
                FieldAttribute::string()
                    .required()
                    .references("subject", OnDelete::Cascade),
            )
            .with_field(
                "consentId",
                FieldAttribute::string().references("consent", OnDelete::SetNull),
            )
            .with_field("actionType", FieldAttribute::string().required())
            .with_field("details", FieldAttribute::json())
            .with_field("createdAt", FieldAttribute::created_at()),
    );

    tables.insert(
        TableSchema::new("consentGeoLocation", 9, "cgl")
            .with_field(
                "consentId",
                FieldAttribute::string()
                    .required()
                    .references("consent", OnDelete::Cascade),
            )
            .with_field("ip", FieldAttribute::string().required())
            .with_field("country", FieldAttribute::string())
            .with_field("region", FieldAttribute::string())
            .with_field("city", FieldAttribute::string())
            .with_field("timezone", FieldAttribute::string())
            .with_field("createdAt", FieldAttribute::created_at()),
    );

    tables.insert(
        TableSchema::new("consentWithdrawal", 10, "wdr")
            .with_field(
                "consentId",
                FieldAttribute::string()
                    .required()
                    .references("consent", OnDelete::Cascade),
            )
            .with_field(
                "subjectId",
                FieldAttribute::string()
                    .required()
                    .references("subject", OnDelete::Cascade),
            )
            .with_field("withdrawalReason", FieldAttribute::string())
            .with_field("withdrawalMethod", FieldAttribute::string().required().default_value("api"))
            .with_field("metadata", FieldAttribute::json())
            .with_field("createdAt", FieldAttribute::created_at()),
    );

    tables.insert(
        TableSchema::new("auditLog", 11, "log")
            .with_field("entityType", FieldAttribute::string().required())
            .with_field("entityId", FieldAttribute::string().required())
            .with_field("actionType", FieldAttribute::string().required())
            .with_field(
                "subjectId",
                FieldAttribute::string().references("subject", OnDelete::SetNull),
            )
            .with_field("ipAddress", FieldAttribute::string())
            .with_field("userAgent", FieldAttribute::string())
            .with_field("changes", FieldAttribute::json())
            .with_field("metadata", FieldAttribute::json())
            .with_field("createdAt", FieldAttribute::created_at()),
    );

    tables
}

/// Generates an identifier for `model` using its built-in prefix, falling
/// back to the first three letters of the model name.
pub fn generate_model_id(tables: &Tables, model: &str) -> String {
    match tables.get(model) {
        Some(table) => generate_id(&table.id_prefix),
        None => generate_id(&model.chars().take(3).collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginTable;
    use c15t_types::FieldType;
    use test_case::test_case;

    #[test]
    fn test_builtin_models_in_creation_order() {
        let tables = get_consent_tables(&SchemaOptions::default()).unwrap();
        let models: Vec<&str> = tables.ordered().iter().map(|t| t.model.as_str()).collect();
        assert_eq!(
            models,
            vec![
                "subject",
                "consentPurpose",
                "domain",
                "geoLocation",
                "consentPolicy",
                "consent",
                "consentPurposeJunction",
                "consentRecord",
                "consentGeoLocation",
                "consentWithdrawal",
                "auditLog",
            ]
        );
    }

    #[test]
    fn test_referenced_tables_precede_referencing() {
        let tables = get_consent_tables(&SchemaOptions::default()).unwrap();
        for table in tables.ordered() {
            for field in table.fields.values() {
                if let Some(reference) = &field.references {
                    let target = tables.get(&reference.model).unwrap();
                    assert!(
                        target.order < table.order,
                        "{} must be created before {}",
                        target.model,
                        table.model
                    );
                }
            }
        }
    }

    #[test_case("subject", "sub")]
    #[test_case("consentPurpose", "pur")]
    #[test_case("consentWithdrawal", "wdr")]
    #[test_case("auditLog", "log")]
    fn test_id_prefixes(model: &str, prefix: &str) {
        let tables = get_consent_tables(&SchemaOptions::default()).unwrap();
        assert_eq!(tables.get(model).unwrap().id_prefix, prefix);
        assert!(generate_model_id(&tables, model).starts_with(&format!("{prefix}_")));
    }

    #[test]
    fn test_user_options_rename_table_and_column() {
        let mut fields = BTreeMap::new();
        fields.insert("externalId".to_string(), "external_id".to_string());
        let options = SchemaOptions::default().with_table(
            "subject",
            TableOptions {
                model_name: Some("subjects".to_string()),
                fields,
                additional_fields: BTreeMap::new(),
            },
        );
        let tables = get_consent_tables(&options).unwrap();
        let subject = tables.get("subject").unwrap();
        assert_eq!(subject.table_name, "subjects");
        assert_eq!(subject.column_name("externalId"), "external_id");
    }

    #[test]
    fn test_additional_fields_are_merged() {
        let mut additional = BTreeMap::new();
        additional.insert("locale".to_string(), FieldAttribute::string());
        let options = SchemaOptions::default().with_table(
            "consent",
            TableOptions {
                additional_fields: additional,
                ..TableOptions::default()
            },
        );
        let tables = get_consent_tables(&options).unwrap();
        assert_eq!(
            tables.get("consent").unwrap().fields["locale"].field_type,
            FieldType::String
        );
    }

    #[test]
    fn test_additional_id_field_is_rejected() {
        let mut additional = BTreeMap::new();
        additional.insert("id".to_string(), FieldAttribute::string());
        let options = SchemaOptions::default().with_table(
            "domain",
            TableOptions {
                additional_fields: additional,
                ..TableOptions::default()
            },
        );
        assert!(matches!(
            get_consent_tables(&options),
            Err(SchemaError::ReservedField { model }) if model == "domain"
        ));
    }

    #[test]
    fn test_unknown_model_option_is_rejected() {
        let options = SchemaOptions::default().with_table("user", TableOptions::default());
        assert!(matches!(
            get_consent_tables(&options),
            Err(SchemaError::UnknownModel(model)) if model == "user"
        ));
    }

    #[test]
    fn test_plugin_reference_to_unknown_model_is_rejected() {
        let plugin = PluginSchema::new("broken").with_table(
            "note",
            PluginTable::default().with_field(
                "ownerId",
                FieldAttribute::string().references("owner", OnDelete::Cascade),
            ),
        );
        let options = SchemaOptions::default().with_plugin(plugin);
        assert!(matches!(
            get_consent_tables(&options),
            Err(SchemaError::UnknownReference { .. })
        ));
    }
}
