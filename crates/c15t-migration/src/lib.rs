//! Schema migrations for c15t.
//!
//! Provides:
//! - Catalog introspection for Postgres, MySQL and SQLite
//! - A pure differ producing tables to create and columns to add
//! - Per-dialect DDL rendering, including MSSQL
//! - Numbered, checksummed migration files
//!
//! Type mismatches on existing columns are reported, never altered.
//!
//! ```no_run
//! # async fn demo() -> c15t_migration::Result<()> {
//! use c15t_adapter::{Dialect, SqlDatabase};
//! use c15t_schema::{SchemaOptions, get_consent_tables};
//!
//! let db = SqlDatabase::connect(Dialect::Sqlite, "sqlite://c15t.db?mode=rwc", 5)
//!     .await
//!     .map_err(c15t_migration::MigrationError::Introspection)?;
//! let tables = get_consent_tables(&SchemaOptions::default())?;
//! let plan = c15t_migration::get_migrations(&db, &tables).await?;
//! println!("{}", plan.compile());
//! plan.run(&db).await?;
//! # Ok(())
//! # }
//! ```

pub mod ddl;
pub mod error;
pub mod file;
pub mod introspect;
pub mod plan;

pub use error::{MigrationError, Result};
pub use file::{Migration, MigrationFile};
pub use introspect::{LiveColumns, LiveSchema, introspect};
pub use plan::{ColumnAddition, MigrationPlan, TypeMismatch, diff, get_migrations, is_compatible};
