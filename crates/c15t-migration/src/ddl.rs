//! DDL rendering per dialect.
//!
//! | field type            | postgres      | mysql        | sqlite  | mssql     |
//! |-----------------------|---------------|--------------|---------|-----------|
//! | id                    | text          | varchar(36)  | text    | varchar(36) |
//! | string                | text          | text         | text    | text      |
//! | string, unique        | text          | varchar(255) | text    | varchar(255) |
//! | string, reference     | text          | varchar(36)  | text    | varchar(36) |
//! | number                | integer       | integer      | integer | integer   |
//! | number, bigint        | bigint        | bigint       | bigint  | bigint    |
//! | boolean               | boolean       | boolean      | integer | smallint  |
//! | date                  | timestamptz   | datetime(3)  | date    | datetime2 |
//! | arrays, json          | text          | text         | text    | text      |

use c15t_adapter::Dialect;
use c15t_schema::{FieldAttribute, ID_FIELD, OnDelete, TableSchema, Tables};
use c15t_types::FieldType;

use crate::error::Result;

/// Column type for the implicit `id` primary key.
pub fn id_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres | Dialect::Sqlite => "text",
        Dialect::MySql | Dialect::Mssql => "varchar(36)",
    }
}

/// Column type for a declared field.
pub fn column_type(dialect: Dialect, field: &FieldAttribute) -> &'static str {
    match field.field_type {
        FieldType::String => match dialect {
            Dialect::MySql | Dialect::Mssql if field.references.is_some() => "varchar(36)",
            Dialect::MySql | Dialect::Mssql if field.unique => "varchar(255)",
            _ => "text",
        },
        FieldType::Number if field.bigint => "bigint",
        FieldType::Number => "integer",
        FieldType::Boolean => match dialect {
            Dialect::Postgres | Dialect::MySql => "boolean",
            Dialect::Sqlite => "integer",
            Dialect::Mssql => "smallint",
        },
        FieldType::Date => match dialect {
            Dialect::Postgres => "timestamptz",
            Dialect::MySql => "datetime(3)",
            Dialect::Sqlite => "date",
            Dialect::Mssql => "datetime2",
        },
        FieldType::StringArray | FieldType::NumberArray | FieldType::Json => "text",
    }
}

fn on_delete(dialect: Dialect, action: OnDelete) -> String {
    match (dialect, action) {
        (Dialect::Mssql, OnDelete::Restrict) => "NO ACTION".to_string(),
        (_, action) => action.as_sql().to_uppercase(),
    }
}

/// `REFERENCES "table" ("id") ON DELETE ...` for a referencing field.
fn references_clause(dialect: Dialect, tables: &Tables, field: &FieldAttribute) -> Result<Option<String>> {
    let Some(reference) = &field.references else {
        return Ok(None);
    };
    let target = tables.table(&reference.model)?;
    Ok(Some(format!(
        "REFERENCES {} ({}) ON DELETE {}",
        dialect.quote(&target.table_name),
        dialect.quote(target.column_name(&reference.field)),
        on_delete(dialect, reference.on_delete)
    )))
}

/// `CREATE TABLE` with the primary key, constraints and foreign keys.
pub fn create_table(dialect: Dialect, tables: &Tables, table: &TableSchema) -> Result<String> {
    let mut columns = vec![format!(
        "{} {} NOT NULL PRIMARY KEY",
        dialect.quote(ID_FIELD),
        id_type(dialect)
    )];
    let mut foreign_keys = Vec::new();

    for (name, field) in &table.fields {
        let column = dialect.quote(field.column_name(name));
        let mut definition = format!("{column} {}", column_type(dialect, field));
        if field.required {
            definition.push_str(" NOT NULL");
        }
        if field.unique {
            definition.push_str(" UNIQUE");
        }
        columns.push(definition);

        if let Some(references) = references_clause(dialect, tables, field)? {
            foreign_keys.push(format!("FOREIGN KEY ({column}) {references}"));
        }
    }
    columns.extend(foreign_keys);

    Ok(format!(
        "CREATE TABLE {} ({})",
        dialect.quote(&table.table_name),
        columns.join(", ")
    ))
}

/// Statements adding one column to an existing table.
///
/// Added columns are always nullable, since existing rows have no value.
/// Unique constraints become a separate index, which SQLite requires.
pub fn add_column(
    dialect: Dialect,
    tables: &Tables,
    table: &TableSchema,
    name: &str,
    field: &FieldAttribute,
) -> Result<Vec<String>> {
    let table_name = dialect.quote(&table.table_name);
    let column_name = field.column_name(name);
    let column = dialect.quote(column_name);
    let keyword = match dialect {
        Dialect::Mssql => "ADD",
        _ => "ADD COLUMN",
    };
    let mut statement = format!(
        "ALTER TABLE {table_name} {keyword} {column} {}",
        column_type(dialect, field)
    );

    if let Some(references) = references_clause(dialect, tables, field)? {
        match dialect {
            Dialect::MySql => {
                statement.push_str(&format!(", ADD FOREIGN KEY ({column}) {references}"));
            }
            _ => {
                statement.push(' ');
                statement.push_str(&references);
            }
        }
    }

    let mut statements = vec![statement];
    if field.unique {
        statements.push(format!(
            "CREATE UNIQUE INDEX {} ON {table_name} ({column})",
            dialect.quote(&format!("{}_{column_name}_unique", table.table_name))
        ));
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_schema::{SchemaOptions, get_consent_tables};
    use test_case::test_case;

    fn tables() -> Tables {
        get_consent_tables(&SchemaOptions::default()).unwrap()
    }

    #[test_case(Dialect::Postgres, "timestamptz")]
    #[test_case(Dialect::MySql, "datetime(3)")]
    #[test_case(Dialect::Sqlite, "date")]
    #[test_case(Dialect::Mssql, "datetime2")]
    fn test_date_type(dialect: Dialect, expected: &str) {
        assert_eq!(column_type(dialect, &FieldAttribute::date()), expected);
    }

    #[test_case(Dialect::Postgres, "text")]
    #[test_case(Dialect::MySql, "varchar(36)")]
    #[test_case(Dialect::Sqlite, "text")]
    #[test_case(Dialect::Mssql, "varchar(36)")]
    fn test_reference_type(dialect: Dialect, expected: &str) {
        let field = FieldAttribute::string().references("subject", OnDelete::Cascade);
        assert_eq!(column_type(dialect, &field), expected);
        assert_eq!(id_type(dialect), expected);
    }

    #[test]
    fn test_create_subject_sqlite() {
        let tables = tables();
        let sql = create_table(Dialect::Sqlite, &tables, tables.get("subject").unwrap()).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"subject\" (\"id\" text NOT NULL PRIMARY KEY, \
             \"createdAt\" date NOT NULL, \
             \"externalId\" text UNIQUE, \
             \"identityProvider\" text, \
             \"isIdentified\" integer NOT NULL, \
             \"lastIpAddress\" text, \
             \"status\" text, \
             \"updatedAt\" date NOT NULL)"
        );
    }

    #[test]
    fn test_create_consent_has_foreign_keys() {
        let tables = tables();
        let sql = create_table(Dialect::Postgres, &tables, tables.get("consent").unwrap()).unwrap();
        assert!(sql.contains(
            "FOREIGN KEY (\"subjectId\") REFERENCES \"subject\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(sql.contains(
            "FOREIGN KEY (\"policyId\") REFERENCES \"consentPolicy\" (\"id\") ON DELETE RESTRICT"
        ));
    }

    #[test]
    fn test_mssql_restrict_is_no_action() {
        let tables = tables();
        let sql = create_table(Dialect::Mssql, &tables, tables.get("consent").unwrap()).unwrap();
        assert!(sql.contains("REFERENCES [consentPolicy] ([id]) ON DELETE NO ACTION"));
        assert!(!sql.contains("RESTRICT"));
    }

    #[test]
    fn test_add_unique_column_uses_index() {
        let tables = tables();
        let table = tables.get("domain").unwrap();
        let field = FieldAttribute::string().unique();
        let statements = add_column(Dialect::Sqlite, &tables, table, "slug", &field).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"domain\" ADD COLUMN \"slug\" text".to_string(),
                "CREATE UNIQUE INDEX \"domain_slug_unique\" ON \"domain\" (\"slug\")".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_reference_column_per_dialect() {
        let tables = tables();
        let table = tables.get("auditLog").unwrap();
        let field = FieldAttribute::string().references("domain", OnDelete::SetNull);

        let mysql = add_column(Dialect::MySql, &tables, table, "domainId", &field).unwrap();
        assert_eq!(
            mysql[0],
            "ALTER TABLE `auditLog` ADD COLUMN `domainId` varchar(36), \
             ADD FOREIGN KEY (`domainId`) REFERENCES `domain` (`id`) ON DELETE SET NULL"
        );

        let mssql = add_column(Dialect::Mssql, &tables, table, "domainId", &field).unwrap();
        assert_eq!(
            mssql[0],
            "ALTER TABLE [auditLog] ADD [domainId] varchar(36) REFERENCES [domain] ([id]) ON DELETE SET NULL"
        );
    }
}
