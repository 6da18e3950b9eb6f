//! Live catalog introspection.

use std::collections::BTreeMap;

use c15t_adapter::{Dialect, SqlDatabase};
use tracing::debug;

use crate::error::{MigrationError, Result};

/// Columns of one live table, keyed by column name, valued by the
/// database's type name.
pub type LiveColumns = BTreeMap<String, String>;

/// Live tables keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchema {
    pub tables: BTreeMap<String, LiveColumns>,
}

impl LiveSchema {
    pub fn table(&self, name: &str) -> Option<&LiveColumns> {
        self.tables.get(name)
    }

    /// Adds a column, creating the table entry if needed.
    pub fn with_column(mut self, table: &str, column: &str, data_type: &str) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), data_type.to_string());
        self
    }
}

/// Catalog query listing `(table, column, type)` for the current schema.
fn columns_query(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => {
            "SELECT table_name::text, column_name::text, data_type::text \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() \
             ORDER BY table_name, ordinal_position"
        }
        Dialect::MySql => {
            "SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() \
             ORDER BY TABLE_NAME, ORDINAL_POSITION"
        }
        Dialect::Mssql => {
            "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() \
             ORDER BY TABLE_NAME, ORDINAL_POSITION"
        }
        Dialect::Sqlite => {
            "SELECT m.name, p.name, p.type \
             FROM sqlite_master AS m JOIN pragma_table_info(m.name) AS p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
             ORDER BY m.name, p.cid"
        }
    }
}

/// Reads every table and column visible to the connection.
pub async fn introspect(db: &SqlDatabase) -> Result<LiveSchema> {
    let rows = db
        .fetch_strings(columns_query(db.dialect()), &[])
        .await
        .map_err(MigrationError::Introspection)?;

    let mut schema = LiveSchema::default();
    for row in rows {
        let [table, column, data_type] = row.as_slice() else {
            continue;
        };
        schema
            .tables
            .entry(table.clone())
            .or_default()
            .insert(column.clone(), data_type.clone());
    }
    debug!(dialect = %db.dialect(), tables = schema.tables.len(), "introspected database");
    Ok(schema)
}
