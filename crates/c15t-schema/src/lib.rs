//! # c15t-schema: Consent table definitions
//!
//! Declares the logical schema that every adapter and the migration differ
//! work from:
//! - [`field`]: per-field attributes (type, flags, defaults, references)
//! - [`table`]: table schemas and the model map ([`Tables`])
//! - [`consent`]: the built-in consent models and [`get_consent_tables`]
//! - [`plugin`]: pure, ordered plugin schema merging
//! - [`parse`]: input/output filtering at the API boundary
//! - [`entity`]: typed structs for each built-in model
//!
//! # Example
//!
//! ```
//! use c15t_schema::{SchemaOptions, get_consent_tables};
//!
//! let tables = get_consent_tables(&SchemaOptions::default()).unwrap();
//! assert_eq!(tables.len(), 11);
//! assert_eq!(tables.ordered()[0].model, "subject");
//! ```

pub mod consent;
pub mod entity;
pub mod error;
pub mod field;
pub mod parse;
pub mod plugin;
pub mod table;

pub use consent::{SchemaOptions, TableOptions, generate_model_id, get_consent_tables};
pub use entity::{
    AuditLog, Consent, ConsentGeoLocation, ConsentPolicy, ConsentPurpose, ConsentPurposeJunction,
    ConsentRecord, ConsentWithdrawal, Domain, Entity, GeoLocation, Subject,
};
pub use error::{Result, SchemaError};
pub use field::{DefaultValue, FieldAttribute, OnDelete, Reference, Transform};
pub use parse::{WriteAction, parse_input, parse_output};
pub use plugin::{PluginSchema, PluginTable, merge_plugin_schemas};
pub use table::{ID_FIELD, TableSchema, Tables};
