//! Field attributes.
//!
//! A [`FieldAttribute`] describes one logical column: its abstract type,
//! validation flags, defaults, transforms and an optional foreign key.
//! Attributes are built with chained constructors:
//!
//! ```
//! use c15t_schema::field::{FieldAttribute, OnDelete};
//!
//! let subject_id = FieldAttribute::string()
//!     .required()
//!     .references("subject", OnDelete::Cascade);
//! assert!(subject_id.required);
//! ```

use std::fmt;
use std::sync::Arc;

use c15t_types::{FieldType, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Produces a value on demand (defaults, `on_update`).
pub type ValueThunk = Arc<dyn Fn() -> Value + Send + Sync>;

/// Maps a value on its way into or out of the database.
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Default applied on create when the caller omits the field.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Thunk(ValueThunk),
}

impl DefaultValue {
    /// Produces the default value.
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Thunk(thunk) => thunk(),
        }
    }

    /// Returns the literal when the default is static.
    pub fn literal(&self) -> Option<&Value> {
        match self {
            DefaultValue::Literal(value) => Some(value),
            DefaultValue::Thunk(_) => None,
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => write!(f, "Literal({value:?})"),
            DefaultValue::Thunk(_) => write!(f, "Thunk(..)"),
        }
    }
}

/// Input and output transforms.
#[derive(Clone, Default)]
pub struct Transform {
    /// Applied before the value is written.
    pub input: Option<TransformFn>,
    /// Applied after the value is read.
    pub output: Option<TransformFn>,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .finish()
    }
}

/// Referential action when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
    #[default]
    NoAction,
}

impl OnDelete {
    /// SQL keyword form used in `REFERENCES ... ON DELETE`.
    pub fn as_sql(self) -> &'static str {
        match self {
            OnDelete::Cascade => "cascade",
            OnDelete::Restrict => "restrict",
            OnDelete::SetNull => "set null",
            OnDelete::NoAction => "no action",
        }
    }
}

/// Foreign key declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced model key.
    pub model: String,
    /// Referenced field, normally `id`.
    pub field: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

/// Declaration of a single logical field.
#[derive(Clone)]
pub struct FieldAttribute {
    pub field_type: FieldType,
    /// Use a 64-bit integer column for numbers.
    pub bigint: bool,
    pub required: bool,
    pub unique: bool,
    /// Included in API output.
    pub returned: bool,
    /// Accepted on API writes.
    pub input: bool,
    pub default_value: Option<DefaultValue>,
    /// Recomputed on every update.
    pub on_update: Option<ValueThunk>,
    pub transform: Transform,
    pub references: Option<Reference>,
    /// Physical column name override.
    pub field_name: Option<String>,
}

impl fmt::Debug for FieldAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAttribute")
            .field("field_type", &self.field_type)
            .field("bigint", &self.bigint)
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("returned", &self.returned)
            .field("input", &self.input)
            .field("default_value", &self.default_value)
            .field("on_update", &self.on_update.is_some())
            .field("transform", &self.transform)
            .field("references", &self.references)
            .field("field_name", &self.field_name)
            .finish()
    }
}

impl FieldAttribute {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            bigint: false,
            required: false,
            unique: false,
            returned: true,
            input: true,
            default_value: None,
            on_update: None,
            transform: Transform::default(),
            references: None,
            field_name: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn string_array() -> Self {
        Self::new(FieldType::StringArray)
    }

    pub fn number_array() -> Self {
        Self::new(FieldType::NumberArray)
    }

    pub fn json() -> Self {
        Self::new(FieldType::Json)
    }

    /// Required date defaulting to now.
    pub fn created_at() -> Self {
        Self::date().required().default_fn(|| Value::Date(Utc::now()))
    }

    /// Required date defaulting to now and refreshed on every update.
    pub fn updated_at() -> Self {
        Self::created_at().on_update(|| Value::Date(Utc::now()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn bigint(mut self) -> Self {
        self.bigint = true;
        self
    }

    /// Excludes the field from API output.
    pub fn hidden(mut self) -> Self {
        self.returned = false;
        self
    }

    /// Rejects the field on API writes.
    pub fn no_input(mut self) -> Self {
        self.input = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(DefaultValue::Literal(value.into()));
        self
    }

    pub fn default_fn(mut self, thunk: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default_value = Some(DefaultValue::Thunk(Arc::new(thunk)));
        self
    }

    pub fn on_update(mut self, thunk: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(thunk));
        self
    }

    pub fn transform_input(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform.input = Some(Arc::new(f));
        self
    }

    pub fn transform_output(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform.output = Some(Arc::new(f));
        self
    }

    /// Declares a foreign key to `model.id`.
    pub fn references(mut self, model: impl Into<String>, on_delete: OnDelete) -> Self {
        self.references = Some(Reference {
            model: model.into(),
            field: "id".to_string(),
            on_delete,
        });
        self
    }

    pub fn field_name(mut self, column: impl Into<String>) -> Self {
        self.field_name = Some(column.into());
        self
    }

    /// Physical column name for the logical field `name`.
    pub fn column_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.field_name.as_deref().unwrap_or(name)
    }
}
