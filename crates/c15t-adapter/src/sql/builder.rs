//! Statement construction.
//!
//! Statements are rendered to text plus an ordered bind list so they can be
//! executed through the `Any` driver or inspected in tests. Columns are
//! aliased to their logical field names on the way out.

use c15t_schema::{ID_FIELD, TableSchema};
use c15t_types::{FieldType, Record, Value};

use super::dialect::Dialect;
use crate::mapper::{SortBy, SortDirection};
use crate::where_clause::{Connector, Operator, Where};

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    /// Typed null, so Postgres sees the right parameter type.
    Null(FieldType),
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Rendered SQL with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

/// Row window and ordering for `SELECT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window<'a> {
    pub sort_by: Option<&'a SortBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Renders statements for one table in one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder<'a> {
    dialect: Dialect,
    table: &'a TableSchema,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(dialect: Dialect, table: &'a TableSchema) -> Self {
        Self { dialect, table }
    }

    fn table_name(&self) -> String {
        self.dialect.quote(&self.table.table_name)
    }

    fn column(&self, field: &str) -> String {
        self.dialect.quote(self.table.column_name(field))
    }

    fn field_type(&self, field: &str) -> FieldType {
        self.table
            .field(field)
            .map_or(FieldType::String, |f| f.field_type)
    }

    fn select_expr(&self, field: &str) -> String {
        let column = self.column(field);
        let column = if self.field_type(field) == FieldType::Date {
            self.dialect.date_as_text(&column)
        } else {
            column
        };
        format!("{column} AS {}", self.dialect.quote(field))
    }

    /// `SELECT` of the given fields, or of `id` plus every field.
    pub fn select(&self, fields: Option<&[String]>, clauses: &[Where], window: Window<'_>) -> Statement {
        let columns = match fields {
            Some(fields) if !fields.is_empty() => fields
                .iter()
                .map(|f| self.select_expr(f))
                .collect::<Vec<_>>(),
            _ => std::iter::once(ID_FIELD)
                .chain(self.table.fields.keys().map(String::as_str))
                .map(|f| self.select_expr(f))
                .collect(),
        };
        let mut params = Params::new(self.dialect);
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.table_name());
        sql.push_str(&self.render_where(&mut params, clauses));
        if let Some(sort_by) = window.sort_by {
            sql.push_str(&self.render_order(sort_by));
        }
        sql.push_str(
            &self
                .dialect
                .paging(window.limit, window.offset, window.sort_by.is_some()),
        );
        params.finish(sql)
    }

    /// `SELECT` of matching ids only.
    pub fn select_ids(&self, clauses: &[Where], limit: Option<u64>) -> Statement {
        let mut params = Params::new(self.dialect);
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_expr(ID_FIELD),
            self.table_name()
        );
        sql.push_str(&self.render_where(&mut params, clauses));
        sql.push_str(&self.dialect.paging(limit, None, false));
        params.finish(sql)
    }

    pub fn count(&self, clauses: &[Where]) -> Statement {
        let mut params = Params::new(self.dialect);
        let mut sql = format!(
            "SELECT COUNT(*) AS {} FROM {}",
            self.dialect.quote("count"),
            self.table_name()
        );
        sql.push_str(&self.render_where(&mut params, clauses));
        params.finish(sql)
    }

    pub fn insert(&self, record: &Record) -> Statement {
        let mut params = Params::new(self.dialect);
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (field, value) in record {
            columns.push(self.column(field));
            values.push(params.push(value, self.field_type(field)));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name(),
            columns.join(", "),
            values.join(", ")
        );
        params.finish(sql)
    }

    pub fn update(&self, set: &Record, clauses: &[Where]) -> Statement {
        let mut params = Params::new(self.dialect);
        let assignments = set
            .iter()
            .map(|(field, value)| {
                let placeholder = params.push(value, self.field_type(field));
                format!("{} = {placeholder}", self.column(field))
            })
            .collect::<Vec<_>>();
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table_name(),
            assignments.join(", ")
        );
        sql.push_str(&self.render_where(&mut params, clauses));
        params.finish(sql)
    }

    pub fn delete(&self, clauses: &[Where]) -> Statement {
        let mut params = Params::new(self.dialect);
        let mut sql = format!("DELETE FROM {}", self.table_name());
        sql.push_str(&self.render_where(&mut params, clauses));
        params.finish(sql)
    }

    fn render_order(&self, sort_by: &SortBy) -> String {
        let direction = match sort_by.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        // Nulls sort first ascending everywhere, matching the memory adapter.
        let nulls = match (self.dialect, sort_by.direction) {
            (Dialect::Postgres, SortDirection::Asc) => " NULLS FIRST",
            (Dialect::Postgres, SortDirection::Desc) => " NULLS LAST",
            _ => "",
        };
        format!(" ORDER BY {} {direction}{nulls}", self.column(&sort_by.field))
    }

    fn render_where(&self, params: &mut Params, clauses: &[Where]) -> String {
        let mut and = Vec::new();
        let mut or = Vec::new();
        for clause in clauses {
            let condition = self.render_condition(params, clause);
            match clause.connector {
                Connector::And => and.push(condition),
                Connector::Or => or.push(condition),
            }
        }
        if !or.is_empty() {
            and.push(format!("({})", or.join(" OR ")));
        }
        if and.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", and.join(" AND "))
        }
    }

    fn render_condition(&self, params: &mut Params, clause: &Where) -> String {
        let column = self.column(&clause.field);
        let field_type = self.field_type(&clause.field);
        let value = &clause.value;

        match clause.operator {
            Operator::Eq if value.is_null() => format!("{column} IS NULL"),
            Operator::Ne if value.is_null() => format!("{column} IS NOT NULL"),
            _ if value.is_null() => "1 = 0".to_string(),
            Operator::Eq => format!("{column} = {}", params.push(value, field_type)),
            Operator::Ne => {
                let placeholder = params.push(value, field_type);
                format!("({column} <> {placeholder} OR {column} IS NULL)")
            }
            Operator::Lt => format!("{column} < {}", params.push(value, field_type)),
            Operator::Lte => format!("{column} <= {}", params.push(value, field_type)),
            Operator::Gt => format!("{column} > {}", params.push(value, field_type)),
            Operator::Gte => format!("{column} >= {}", params.push(value, field_type)),
            Operator::In => {
                let items = value.array_elements().unwrap_or_default();
                if items.is_empty() {
                    return "1 = 0".to_string();
                }
                let placeholders = items
                    .iter()
                    .map(|item| params.push(item, field_type))
                    .collect::<Vec<_>>();
                format!("{column} IN ({})", placeholders.join(", "))
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let needle = escape_like(&value.as_str().unwrap_or_default().to_ascii_lowercase());
                let pattern = match clause.operator {
                    Operator::StartsWith => format!("{needle}%"),
                    Operator::EndsWith => format!("%{needle}"),
                    _ => format!("%{needle}%"),
                };
                let placeholder = params.push(&Value::String(pattern), FieldType::String);
                format!("LOWER({column}) LIKE {placeholder} ESCAPE '!'")
            }
        }
    }
}

/// Escapes LIKE wildcards with `!`.
fn escape_like(text: &str) -> String {
    text.replace('!', "!!")
        .replace('%', "!%")
        .replace('_', "!_")
}

/// Converts a value into a bind parameter.
pub fn to_bind(dialect: Dialect, value: &Value, field_type: FieldType) -> Bind {
    match value {
        Value::Null => Bind::Null(field_type),
        Value::Bool(b) if dialect == Dialect::Mssql => Bind::Int(i64::from(*b)),
        Value::Bool(b) => Bind::Bool(*b),
        Value::Number(n) => Bind::Int(*n),
        Value::String(s) => Bind::Text(s.clone()),
        Value::Date(at) => Bind::Text(dialect.format_date(*at)),
        Value::StringArray(_) | Value::NumberArray(_) | Value::Json(_) => {
            Bind::Text(value.to_json().to_string())
        }
    }
}

struct Params {
    dialect: Dialect,
    binds: Vec<Bind>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
        }
    }

    fn push(&mut self, value: &Value, field_type: FieldType) -> String {
        self.binds.push(to_bind(self.dialect, value, field_type));
        self.dialect.placeholder(self.binds.len(), field_type)
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            binds: self.binds,
        }
    }
}
