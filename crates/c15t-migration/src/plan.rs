//! Schema diffing and migration plans.

use std::fmt;

use c15t_adapter::{Dialect, SqlDatabase};
use c15t_schema::{ID_FIELD, TableSchema, Tables};
use c15t_types::FieldType;
use tracing::{debug, error, info, warn};

use crate::ddl;
use crate::error::{MigrationError, Result};
use crate::introspect::{LiveSchema, introspect};

/// Columns missing from an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAddition {
    pub model: String,
    pub table_name: String,
    /// Logical field names, in field order.
    pub fields: Vec<String>,
}

/// A live column whose type does not fit the declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub table_name: String,
    pub column: String,
    pub expected: FieldType,
    pub actual: String,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} is `{}` but the schema declares {}",
            self.table_name, self.column, self.actual, self.expected
        )
    }
}

/// Pending schema changes for one database.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub dialect: Dialect,
    /// Tables to create, in creation order.
    pub to_be_created: Vec<TableSchema>,
    pub to_be_added: Vec<ColumnAddition>,
    /// Type mismatches found on existing columns. Never corrected.
    pub warnings: Vec<TypeMismatch>,
    statements: Vec<String>,
}

impl MigrationPlan {
    /// True when the database already matches the schema.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Renders the plan as a SQL script without executing it.
    pub fn compile(&self) -> String {
        self.statements
            .iter()
            .map(|statement| format!("{statement};\n"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Executes every statement in order, stopping at the first failure.
    pub async fn run(&self, db: &SqlDatabase) -> Result<()> {
        for sql in &self.statements {
            debug!(sql = %sql, "applying migration statement");
            if let Err(source) = db.execute(sql).await {
                error!(sql = %sql, error = %source, "migration statement failed");
                return Err(MigrationError::Statement {
                    sql: sql.clone(),
                    source,
                });
            }
        }
        if !self.is_empty() {
            info!(
                dialect = %self.dialect,
                tables_created = self.to_be_created.len(),
                tables_altered = self.to_be_added.len(),
                statements = self.statements.len(),
                "migrations applied"
            );
        }
        Ok(())
    }
}

/// Introspects `db` and diffs it against `tables`.
pub async fn get_migrations(db: &SqlDatabase, tables: &Tables) -> Result<MigrationPlan> {
    let live = introspect(db).await?;
    diff(db.dialect(), tables, &live)
}

/// Compares declared tables with a live schema.
///
/// Missing tables are created in `order`; missing columns are added.
/// Present columns with an incompatible type are reported as warnings.
pub fn diff(dialect: Dialect, tables: &Tables, live: &LiveSchema) -> Result<MigrationPlan> {
    let mut plan = MigrationPlan {
        dialect,
        to_be_created: Vec::new(),
        to_be_added: Vec::new(),
        warnings: Vec::new(),
        statements: Vec::new(),
    };

    for table in tables.ordered() {
        let Some(columns) = live.table(&table.table_name) else {
            plan.statements.push(ddl::create_table(dialect, tables, table)?);
            plan.to_be_created.push(table.clone());
            continue;
        };

        let mut missing = Vec::new();
        for (name, field) in &table.fields {
            let column = field.column_name(name);
            match columns.get(column) {
                None => {
                    plan.statements
                        .extend(ddl::add_column(dialect, tables, table, name, field)?);
                    missing.push(name.clone());
                }
                Some(actual) if !is_compatible(dialect, field.field_type, actual) => {
                    let mismatch = TypeMismatch {
                        table_name: table.table_name.clone(),
                        column: column.to_string(),
                        expected: field.field_type,
                        actual: actual.clone(),
                    };
                    warn!(%mismatch, "column type mismatch");
                    plan.warnings.push(mismatch);
                }
                Some(_) => {}
            }
        }
        if !columns.contains_key(ID_FIELD) {
            warn!(table = %table.table_name, "table has no `id` column");
        }
        if !missing.is_empty() {
            plan.to_be_added.push(ColumnAddition {
                model: table.model.clone(),
                table_name: table.table_name.clone(),
                fields: missing,
            });
        }
    }

    Ok(plan)
}

/// Type-name fragments accepted for each field type, lowercase.
fn compatible_types(dialect: Dialect, field_type: FieldType) -> &'static [&'static str] {
    let string: &[&str] = match dialect {
        Dialect::Postgres => &["character varying", "varchar", "text", "char"],
        Dialect::MySql | Dialect::Mssql => &["varchar", "text", "char"],
        Dialect::Sqlite => &["text", "char", "clob"],
    };
    match field_type {
        FieldType::String | FieldType::StringArray | FieldType::NumberArray | FieldType::Json => {
            string
        }
        FieldType::Number => match dialect {
            Dialect::Postgres => &["int", "numeric", "real", "double precision"],
            Dialect::MySql => &["int", "decimal", "float", "double"],
            Dialect::Sqlite => &["int", "real"],
            Dialect::Mssql => &["int", "decimal", "float", "real", "numeric"],
        },
        FieldType::Boolean => match dialect {
            Dialect::Postgres => &["bool"],
            Dialect::MySql => &["tinyint", "bool"],
            Dialect::Sqlite => &["int", "bool"],
            Dialect::Mssql => &["bit", "smallint"],
        },
        FieldType::Date => match dialect {
            Dialect::Postgres => &["timestamp", "date"],
            Dialect::MySql => &["timestamp", "datetime", "date"],
            Dialect::Sqlite => &["date", "int", "timestamp"],
            Dialect::Mssql => &["datetime", "date"],
        },
    }
}

/// Coarse check that a live column type can hold `field_type`.
pub fn is_compatible(dialect: Dialect, field_type: FieldType, actual: &str) -> bool {
    let actual = actual.to_ascii_lowercase();
    compatible_types(dialect, field_type)
        .iter()
        .any(|fragment| actual.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_schema::{SchemaOptions, TableOptions, get_consent_tables};
    use test_case::test_case;

    fn tables() -> Tables {
        get_consent_tables(&SchemaOptions::default()).unwrap()
    }

    /// A live schema that exactly matches `tables` for `dialect`.
    fn live_for(dialect: Dialect, tables: &Tables) -> LiveSchema {
        let mut live = LiveSchema::default();
        for table in tables.ordered() {
            live = live.with_column(&table.table_name, ID_FIELD, ddl::id_type(dialect));
            for (name, field) in &table.fields {
                live = live.with_column(
                    &table.table_name,
                    field.column_name(name),
                    ddl::column_type(dialect, field),
                );
            }
        }
        live
    }

    #[test]
    fn test_empty_database_creates_all_tables_in_order() {
        let tables = tables();
        let plan = diff(Dialect::Sqlite, &tables, &LiveSchema::default()).unwrap();
        let created: Vec<_> = plan.to_be_created.iter().map(|t| t.model.as_str()).collect();
        assert_eq!(
            created,
            [
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
        assert!(plan.to_be_added.is_empty());
        assert_eq!(plan.statements().len(), 11);
    }

    #[test_case(Dialect::Postgres)]
    #[test_case(Dialect::MySql)]
    #[test_case(Dialect::Sqlite)]
    #[test_case(Dialect::Mssql)]
    fn test_matching_database_has_empty_plan(dialect: Dialect) {
        let tables = tables();
        let plan = diff(dialect, &tables, &live_for(dialect, &tables)).unwrap();
        assert!(plan.is_empty());
        assert!(plan.warnings.is_empty());
        assert_eq!(plan.compile(), "");
    }

    #[test]
    fn test_missing_column_is_added() {
        let options = SchemaOptions::default().with_table(
            "subject",
            TableOptions::default().additional_field("tenant", c15t_schema::FieldAttribute::string()),
        );
        let extended = get_consent_tables(&options).unwrap();
        let live = live_for(Dialect::Sqlite, &tables());

        let plan = diff(Dialect::Sqlite, &extended, &live).unwrap();
        assert!(plan.to_be_created.is_empty());
        assert_eq!(
            plan.to_be_added,
            vec![ColumnAddition {
                model: "subject".into(),
                table_name: "subject".into(),
                fields: vec!["tenant".into()],
            }]
        );
        assert_eq!(
            plan.compile(),
            "ALTER TABLE \"subject\" ADD COLUMN \"tenant\" text;\n"
        );
    }

    #[test]
    fn test_type_mismatch_is_warning_only() {
        let tables = tables();
        let live = live_for(Dialect::Postgres, &tables).with_column("subject", "isIdentified", "text");
        let plan = diff(Dialect::Postgres, &tables, &live).unwrap();
        assert!(plan.is_empty());
        assert_eq!(
            plan.warnings,
            vec![TypeMismatch {
                table_name: "subject".into(),
                column: "isIdentified".into(),
                expected: FieldType::Boolean,
                actual: "text".into(),
            }]
        );
    }

    #[test]
    fn test_renamed_table_is_matched_by_table_name() {
        let options = SchemaOptions::default()
            .with_table("subject", TableOptions::default().model_name("visitors"));
        let renamed = get_consent_tables(&options).unwrap();
        let plan = diff(Dialect::Sqlite, &renamed, &live_for(Dialect::Sqlite, &tables())).unwrap();
        assert_eq!(plan.to_be_created.len(), 1);
        assert_eq!(plan.to_be_created[0].table_name, "visitors");
    }

    #[test_case(Dialect::Postgres, FieldType::Date, "timestamp with time zone", true)]
    #[test_case(Dialect::Postgres, FieldType::Number, "bigint", true)]
    #[test_case(Dialect::Postgres, FieldType::Boolean, "integer", false)]
    #[test_case(Dialect::MySql, FieldType::Boolean, "tinyint", true)]
    #[test_case(Dialect::MySql, FieldType::String, "varchar", true)]
    #[test_case(Dialect::Sqlite, FieldType::String, "TEXT", true)]
    #[test_case(Dialect::Sqlite, FieldType::Number, "text", false)]
    #[test_case(Dialect::Mssql, FieldType::Boolean, "bit", true)]
    fn test_compatibility(dialect: Dialect, field_type: FieldType, actual: &str, expected: bool) {
        assert_eq!(is_compatible(dialect, field_type, actual), expected);
    }
}
