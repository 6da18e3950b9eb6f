//! Plugin schema contributions.
//!
//! Plugins add fields to existing models or declare new models. Merging is a
//! pure fold over the plugin list: plugins apply in list order and a later
//! definition of the same field replaces the earlier one.

use std::collections::BTreeMap;

use tracing::warn;

use crate::field::FieldAttribute;
use crate::table::{TableSchema, Tables};

/// Tables contributed by one plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginSchema {
    /// Plugin identifier, used in log output.
    pub id: String,
    pub tables: BTreeMap<String, PluginTable>,
}

impl PluginSchema {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tables: BTreeMap::new(),
        }
    }

    pub fn with_table(mut self, model: impl Into<String>, table: PluginTable) -> Self {
        self.tables.insert(model.into(), table);
        self
    }
}

/// A plugin's contribution to a single model.
#[derive(Debug, Clone, Default)]
pub struct PluginTable {
    pub fields: BTreeMap<String, FieldAttribute>,
    /// Physical table name for new models.
    pub model_name: Option<String>,
    /// Creation order for new models; defaults to after every existing table.
    pub order: Option<u32>,
    /// Identifier prefix for new models; defaults to the first three letters.
    pub id_prefix: Option<String>,
}

impl PluginTable {
    pub fn with_field(mut self, name: impl Into<String>, field: FieldAttribute) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}

/// Applies `plugins` to `base` in order and returns the merged tables.
pub fn merge_plugin_schemas(base: Tables, plugins: &[PluginSchema]) -> Tables {
    plugins.iter().fold(base, |mut tables, plugin| {
        for (model, contribution) in &plugin.tables {
            if let Some(existing) = tables.get_mut(model) {
                for (name, field) in &contribution.fields {
                    if existing.fields.insert(name.clone(), field.clone()).is_some() {
                        warn!(
                            plugin = %plugin.id,
                            model = %model,
                            field = %name,
                            "plugin overrides existing field definition"
                        );
                    }
                }
                if let Some(model_name) = &contribution.model_name {
                    existing.table_name.clone_from(model_name);
                }
                continue;
            }

            let order = contribution
                .order
                .unwrap_or_else(|| tables.max_order() + 1);
            let prefix = contribution
                .id_prefix
                .clone()
                .unwrap_or_else(|| model.chars().take(3).collect());
            let mut table = TableSchema::new(model.clone(), order, prefix);
            if let Some(model_name) = &contribution.model_name {
                table.table_name.clone_from(model_name);
            }
            table.fields = contribution.fields.clone();
            tables.insert(table);
        }
        tables
    })
}
