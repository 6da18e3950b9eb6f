//! Configuration management for c15t
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (C15T_* prefix, `__` between sections)
//! 2. c15t.local.toml (gitignored, local overrides)
//! 3. c15t.toml (git-tracked, project config)
//! 4. ~/.config/c15t/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! ```toml
//! [database]
//! adapter = "sql"
//! dialect = "postgres"
//! url = "postgres://localhost/consent"
//!
//! [tables.subject]
//! model_name = "visitors"
//! fields = { externalId = "external_ref" }
//!
//! [tables.subject.additional_fields.tenant]
//! type = "string"
//! required = true
//! default = "default"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use c15t_adapter::Dialect;
use c15t_schema::{FieldAttribute, OnDelete, SchemaOptions, TableOptions, Tables, get_consent_tables};
use c15t_types::{FieldType, IdGeneration, Value};
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main c15t configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C15tConfig {
    pub project: ProjectConfig,
    pub database: DatabaseSettings,
    pub advanced: AdvancedConfig,
    pub migrations: MigrationConfig,
    /// Per-model customisation keyed by model name.
    pub tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "c15t-project".to_string(),
        }
    }
}

/// Which adapter backs the instance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    Memory,
    #[default]
    Sql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub adapter: StorageKind,
    pub dialect: Dialect,
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            adapter: StorageKind::Sql,
            dialect: Dialect::Sqlite,
            url: "sqlite://c15t.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    #[default]
    Prefixed,
    Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub id_generation: IdStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Where `c15t generate` writes migration files.
    pub directory: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
        }
    }
}

/// `[tables.<model>]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub model_name: Option<String>,
    /// Column overrides: logical field -> column.
    pub fields: BTreeMap<String, String>,
    pub additional_fields: BTreeMap<String, FieldConfig>,
}

/// `[tables.<model>.additional_fields.<field>]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub bigint: bool,
    /// Excluded from API output.
    #[serde(default)]
    pub hidden: bool,
    pub default: Option<serde_json::Value>,
    pub column: Option<String>,
    /// Referenced model; the field points at its `id`.
    pub references: Option<String>,
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl FieldConfig {
    pub fn to_attribute(&self) -> FieldAttribute {
        let mut field = FieldAttribute::new(self.field_type);
        if self.required {
            field = field.required();
        }
        if self.unique {
            field = field.unique();
        }
        if self.bigint {
            field = field.bigint();
        }
        if self.hidden {
            field = field.hidden();
        }
        if let Some(default) = &self.default {
            field = field.default_value(Value::from(default.clone()));
        }
        if let Some(column) = &self.column {
            field = field.field_name(column.clone());
        }
        if let Some(model) = &self.references {
            field = field.references(model.clone(), self.on_delete);
        }
        field
    }
}

/// Picks the candidate equal to `key`, falling back to an ASCII
/// case-insensitive match.
fn resolve_name(candidates: &[&str], key: &str) -> String {
    candidates
        .iter()
        .find(|c| **c == key)
        .or_else(|| candidates.iter().find(|c| c.eq_ignore_ascii_case(key)))
        .copied()
        .unwrap_or(key)
        .to_string()
}

impl C15tConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks settings the type system cannot.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.database.adapter == StorageKind::Memory {
            return Ok(());
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.url is required for the sql adapter".to_string(),
            ));
        }
        if Dialect::from_url(&self.database.url) != Some(self.database.dialect) {
            return Err(ConfigError::ValidationError(format!(
                "database.url does not match dialect `{}`",
                self.database.dialect
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn id_generation(&self) -> IdGeneration {
        match self.advanced.id_generation {
            IdStrategy::Prefixed => IdGeneration::Prefixed,
            IdStrategy::Uuid => IdGeneration::Uuid,
        }
    }

    /// Converts `[tables]` into schema options.
    ///
    /// Model and field keys match case-insensitively.
    pub fn schema_options(&self) -> std::result::Result<SchemaOptions, ConfigError> {
        let builtin = get_consent_tables(&SchemaOptions::default())?;
        let models: Vec<&str> = builtin.models().collect();
        let mut options = SchemaOptions::default();

        for (key, table) in &self.tables {
            let model = resolve_name(&models, key);
            let mut table_options = TableOptions::default();
            if let Some(name) = &table.model_name {
                table_options = table_options.model_name(name.clone());
            }
            if let Some(schema) = builtin.get(&model) {
                let fields: Vec<&str> = schema.fields.keys().map(String::as_str).collect();
                for (field, column) in &table.fields {
                    let field = resolve_name(&fields, field);
                    table_options = table_options.field(field, column.clone());
                }
            } else {
                for (field, column) in &table.fields {
                    table_options = table_options.field(field.clone(), column.clone());
                }
            }
            for (name, field) in &table.additional_fields {
                let mut attribute = field.to_attribute();
                if let Some(reference) = attribute.references.as_mut() {
                    reference.model = resolve_name(&models, &reference.model);
                }
                table_options = table_options.additional_field(name.clone(), attribute);
            }
            options = options.with_table(model, table_options);
        }
        Ok(options)
    }

    /// The validated table map these settings describe.
    pub fn tables(&self) -> std::result::Result<Tables, ConfigError> {
        Ok(get_consent_tables(&self.schema_options()?)?)
    }

    /// Resolve relative paths against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.migrations.directory.is_relative() {
            self.migrations.directory = base.join(&self.migrations.directory);
        }
        if self.database.dialect == Dialect::Sqlite {
            if let Some(url) = resolve_sqlite_url(&self.database.url, base) {
                self.database.url = url;
            }
        }
    }
}

/// Rewrites a relative SQLite file URL to an absolute one.
fn resolve_sqlite_url(url: &str, base: &Path) -> Option<String> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    if rest.starts_with(":memory:") || rest.contains("mode=memory") {
        return None;
    }
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if path.is_empty() || Path::new(path).is_absolute() {
        return None;
    }
    let joined = base.join(path);
    Some(match query {
        Some(query) => format!("sqlite://{}?{query}", joined.display()),
        None => format!("sqlite://{}", joined.display()),
    })
}
