//! Table schemas and the model map.

use std::collections::BTreeMap;

use crate::error::{Result, SchemaError};
use crate::field::FieldAttribute;

/// Name of the implicit primary key column.
pub const ID_FIELD: &str = "id";

/// A model projected onto one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Logical model key, e.g. `consentPurpose`.
    pub model: String,
    /// Physical table name.
    pub table_name: String,
    /// Fields keyed by logical name. The `id` primary key is implicit.
    pub fields: BTreeMap<String, FieldAttribute>,
    /// Creation order; referenced tables sort first.
    pub order: u32,
    /// Prefix for generated identifiers, e.g. `sub`.
    pub id_prefix: String,
}

impl TableSchema {
    pub fn new(model: impl Into<String>, order: u32, id_prefix: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            table_name: model.clone(),
            model,
            fields: BTreeMap::new(),
            order,
            id_prefix: id_prefix.into(),
        }
    }

    /// Adds a field, replacing any previous definition.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldAttribute) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldAttribute> {
        self.fields.get(name)
    }

    /// Looks up a field, failing with [`SchemaError::UnknownField`].
    pub fn require_field(&self, name: &str) -> Result<&FieldAttribute> {
        self.fields.get(name).ok_or_else(|| SchemaError::UnknownField {
            model: self.model.clone(),
            field: name.to_string(),
        })
    }

    /// Returns true for `id` or any declared field.
    pub fn has_field(&self, name: &str) -> bool {
        name == ID_FIELD || self.fields.contains_key(name)
    }

    /// Physical column for a logical field. `id` maps to itself.
    pub fn column_name<'a>(&'a self, name: &'a str) -> &'a str {
        match self.fields.get(name) {
            Some(field) => field.column_name(name),
            None => name,
        }
    }

    /// Logical field for a physical column, if any.
    pub fn field_for_column(&self, column: &str) -> Option<&str> {
        if column == ID_FIELD {
            return Some(ID_FIELD);
        }
        self.fields
            .iter()
            .find(|(name, field)| field.column_name(name) == column)
            .map(|(name, _)| name.as_str())
    }
}

/// All tables keyed by model name.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: BTreeMap<String, TableSchema>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.model.clone(), table);
    }

    pub fn get(&self, model: &str) -> Option<&TableSchema> {
        self.tables.get(model)
    }

    pub fn get_mut(&mut self, model: &str) -> Option<&mut TableSchema> {
        self.tables.get_mut(model)
    }

    /// Looks up a model, failing with [`SchemaError::UnknownModel`].
    pub fn table(&self, model: &str) -> Result<&TableSchema> {
        self.tables
            .get(model)
            .ok_or_else(|| SchemaError::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.tables.contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Highest `order` in the map, 0 when empty.
    pub fn max_order(&self) -> u32 {
        self.tables.values().map(|t| t.order).max().unwrap_or(0)
    }

    /// Tables sorted by `order`, ties broken by model name.
    pub fn ordered(&self) -> Vec<&TableSchema> {
        let mut tables: Vec<&TableSchema> = self.tables.values().collect();
        tables.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.model.cmp(&b.model)));
        tables
    }

    /// Model whose physical table is `table_name`.
    pub fn by_table_name(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.values().find(|t| t.table_name == table_name)
    }

    /// Tables with a field referencing `model`, paired with that field name.
    pub fn referencing(&self, model: &str) -> Vec<(&TableSchema, &str)> {
        self.ordered()
            .into_iter()
            .flat_map(|table| {
                table.fields.iter().filter_map(move |(name, field)| {
                    field
                        .references
                        .as_ref()
                        .filter(|r| r.model == model)
                        .map(|_| (table, name.as_str()))
                })
            })
            .collect()
    }

    /// Checks reserved names, references and table name collisions.
    pub fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for table in self.ordered() {
            if table.fields.contains_key(ID_FIELD) {
                return Err(SchemaError::ReservedField {
                    model: table.model.clone(),
                });
            }
            if let Some(first) = seen.insert(table.table_name.as_str(), table.model.as_str()) {
                return Err(SchemaError::DuplicateTableName {
                    table_name: table.table_name.clone(),
                    first: first.to_string(),
                    second: table.model.clone(),
                });
            }
            for (name, field) in &table.fields {
                let Some(reference) = &field.references else {
                    continue;
                };
                let target = self.get(&reference.model).ok_or_else(|| {
                    SchemaError::UnknownReference {
                        model: table.model.clone(),
                        field: name.clone(),
                        target: reference.model.clone(),
                    }
                })?;
                if !target.has_field(&reference.field) {
                    return Err(SchemaError::UnknownField {
                        model: target.model.clone(),
                        field: reference.field.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Tables {
    type Item = (&'a String, &'a TableSchema);
    type IntoIter = std::collections::btree_map::Iter<'a, String, TableSchema>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::OnDelete;

    fn sample() -> Tables {
        let mut tables = Tables::new();
        tables.insert(
            TableSchema::new("subject", 1, "sub")
                .with_field("externalId", FieldAttribute::string().field_name("external_id")),
        );
        tables.insert(TableSchema::new("consent", 2, "cns").with_field(
            "subjectId",
            FieldAttribute::string().references("subject", OnDelete::Cascade),
        ));
        tables
    }

    #[test]
    fn test_ordered_by_order() {
        let tables = sample();
        let models: Vec<&str> = tables.ordered().iter().map(|t| t.model.as_str()).collect();
        assert_eq!(models, vec!["subject", "consent"]);
        assert_eq!(tables.max_order(), 2);
    }

    #[test]
    fn test_column_mapping() {
        let tables = sample();
        let subject = tables.get("subject").unwrap();
        assert_eq!(subject.column_name("externalId"), "external_id");
        assert_eq!(subject.field_for_column("external_id"), Some("externalId"));
        assert_eq!(subject.column_name("id"), "id");
    }

    #[test]
    fn test_referencing() {
        let tables = sample();
        let refs = tables.referencing("subject");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.model, "consent");
        assert_eq!(refs[0].1, "subjectId");
    }

    #[test]
    fn test_validate_rejects_id_field() {
        let mut tables = sample();
        tables.insert(TableSchema::new("bad", 3, "bad").with_field("id", FieldAttribute::string()));
        assert!(matches!(
            tables.validate(),
            Err(SchemaError::ReservedField { model }) if model == "bad"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_reference() {
        let mut tables = sample();
        tables.insert(TableSchema::new("orphan", 3, "orp").with_field(
            "ownerId",
            FieldAttribute::string().references("owner", OnDelete::Cascade),
        ));
        assert!(matches!(
            tables.validate(),
            Err(SchemaError::UnknownReference { target, .. }) if target == "owner"
        ));
    }

    #[test]
    fn test_unknown_model() {
        let tables = sample();
        assert!(matches!(tables.table("user"), Err(SchemaError::UnknownModel(_))));
    }
}
