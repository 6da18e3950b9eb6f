//! SQL dialects.

use std::fmt::{self, Display};
use std::str::FromStr;

use c15t_types::{FieldType, format_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported SQL dialects.
///
/// The dialect is always stated by the caller; connection URLs are checked
/// against it, never used to guess it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
    Mssql,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Sqlite,
        Dialect::Mssql,
    ];

    /// Dialect implied by a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Dialect> {
        let scheme = url.split(':').next()?;
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            "mssql" | "sqlserver" => Some(Dialect::Mssql),
            _ => None,
        }
    }

    /// True when sqlx ships a runtime driver for this dialect.
    pub fn has_driver(self) -> bool {
        !matches!(self, Dialect::Mssql)
    }

    /// Quotes an identifier.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Mssql => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Bind placeholder for the `index`th (1-based) parameter.
    ///
    /// Postgres date parameters are cast, since they are bound as text.
    pub fn placeholder(self, index: usize, field_type: FieldType) -> String {
        match self {
            Dialect::Postgres if field_type == FieldType::Date => {
                format!("CAST(${index} AS TIMESTAMPTZ)")
            }
            Dialect::Postgres => format!("${index}"),
            Dialect::Mssql => format!("@p{index}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Select expression reading a date column back as text.
    pub fn date_as_text(self, column: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("CAST({column} AS TEXT)"),
            Dialect::MySql => format!("CAST({column} AS CHAR)"),
            Dialect::Mssql => format!("CONVERT(NVARCHAR(33), {column}, 127)"),
        }
    }

    /// Text form used when binding a timestamp.
    pub fn format_date(self, at: DateTime<Utc>) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format_timestamp(at),
            Dialect::MySql => at.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            Dialect::Mssql => at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        }
    }

    /// Paging clause appended after `ORDER BY`.
    ///
    /// `ordered` tells whether the statement already has an `ORDER BY`;
    /// MSSQL needs one for `OFFSET ... FETCH`.
    pub fn paging(self, limit: Option<u64>, offset: Option<u64>, ordered: bool) -> String {
        match (self, limit, offset) {
            (_, None, None) => String::new(),
            (Dialect::Mssql, limit, offset) => {
                let mut clause = String::new();
                if !ordered {
                    clause.push_str(" ORDER BY (SELECT NULL)");
                }
                clause.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    clause.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
                clause
            }
            (_, Some(limit), None) => format!(" LIMIT {limit}"),
            (_, Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Dialect::Postgres, None, Some(offset)) => format!(" OFFSET {offset}"),
            (Dialect::Sqlite, None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (Dialect::MySql, None, Some(offset)) => {
                format!(" LIMIT 18446744073709551615 OFFSET {offset}")
            }
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Mssql => write!(f, "mssql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}
