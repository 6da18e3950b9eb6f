//! Numbered migration files.
//!
//! `c15t generate` writes a compiled plan to `<dir>/0001_<name>.sql`:
//!
//! ```text
//! -- Migration: initial_schema
//! -- Created: 2026-02-01T10:00:00+00:00
//! -- Dialect: sqlite
//! -- Checksum: 5f1e...
//!
//! CREATE TABLE "subject" (...);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use c15t_adapter::Dialect;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{MigrationError, Result};

/// A parsed migration.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Sequential id taken from the filename.
    pub id: u32,
    pub name: String,
    /// Statements following the metadata header.
    pub sql: String,
    pub created_at: DateTime<Utc>,
    /// Dialect the SQL was compiled for, when recorded.
    pub dialect: Option<Dialect>,
}

impl Migration {
    /// SHA-256 of the SQL body, hex encoded.
    pub fn checksum(&self) -> String {
        checksum(&self.sql)
    }
}

fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

/// A migration file on disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub migration: Migration,
    pub path: PathBuf,
    pub checksum: String,
}

impl MigrationFile {
    /// Reads and parses a migration file.
    ///
    /// Fails with [`MigrationError::ChecksumMismatch`] when the header's
    /// checksum does not match the body.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let (migration, recorded) = Self::parse(&content, path)?;
        let checksum = migration.checksum();

        if let Some(expected) = recorded {
            if expected != checksum {
                return Err(MigrationError::ChecksumMismatch {
                    id: migration.id,
                    expected,
                    actual: checksum,
                });
            }
        }

        Ok(Self {
            migration,
            path: path.to_path_buf(),
            checksum,
        })
    }

    fn parse(content: &str, path: &Path) -> Result<(Migration, Option<String>)> {
        let parse_error = |reason: String| MigrationError::ParseError {
            path: path.to_path_buf(),
            reason,
        };

        let mut name = None;
        let mut created_at = None;
        let mut dialect = None;
        let mut recorded = None;
        let mut sql_lines = Vec::new();
        let mut in_header = true;

        for line in content.lines() {
            let trimmed = line.trim();
            if in_header && (trimmed.starts_with("--") || trimmed.is_empty()) {
                let comment = trimmed.trim_start_matches("--").trim();
                if let Some(rest) = comment.strip_prefix("Migration:") {
                    name = Some(rest.trim().to_string());
                } else if let Some(rest) = comment.strip_prefix("Created:") {
                    created_at = DateTime::parse_from_rfc3339(rest.trim())
                        .ok()
                        .map(|at| at.with_timezone(&Utc));
                } else if let Some(rest) = comment.strip_prefix("Dialect:") {
                    dialect = Some(rest.trim().parse::<Dialect>().map_err(parse_error)?);
                } else if let Some(rest) = comment.strip_prefix("Checksum:") {
                    recorded = Some(rest.trim().to_string());
                }
                continue;
            }
            in_header = false;
            sql_lines.push(line);
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| parse_error("invalid filename".to_string()))?;
        let stem = filename.trim_end_matches(".sql");
        let (id, rest) = stem
            .split_once('_')
            .ok_or_else(|| parse_error("filename must look like 0001_name.sql".to_string()))?;
        let id: u32 = id
            .parse()
            .map_err(|_| parse_error(format!("invalid migration id: {id}")))?;

        let migration = Migration {
            id,
            name: name.unwrap_or_else(|| rest.to_string()),
            sql: sql_lines.join("\n").trim_end().to_string(),
            created_at: created_at.unwrap_or_else(Utc::now),
            dialect,
        };
        Ok((migration, recorded))
    }

    /// Writes `sql` as the next numbered migration in `migrations_dir`.
    pub fn create(migrations_dir: &Path, name: &str, dialect: Dialect, sql: &str) -> Result<Self> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ' ')
        {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        fs::create_dir_all(migrations_dir)?;
        let id = Self::next_id(migrations_dir)?;
        let slug = name.replace(' ', "_").to_lowercase();
        let path = migrations_dir.join(format!("{id:04}_{slug}.sql"));

        let migration = Migration {
            id,
            name: name.to_string(),
            sql: sql.trim_end().to_string(),
            created_at: Utc::now(),
            dialect: Some(dialect),
        };
        let checksum = migration.checksum();

        let content = format!(
            "-- Migration: {}\n\
             -- Created: {}\n\
             -- Dialect: {}\n\
             -- Checksum: {}\n\n\
             {}\n",
            migration.name,
            migration.created_at.to_rfc3339(),
            dialect,
            checksum,
            migration.sql
        );
        fs::write(&path, content)?;
        info!(path = %path.display(), id, "migration file written");

        Ok(Self {
            migration,
            path,
            checksum,
        })
    }

    /// Loads every `.sql` file in `migrations_dir`, sorted by id.
    pub fn discover(migrations_dir: &Path) -> Result<Vec<Self>> {
        if !migrations_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(migrations_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("sql") {
                files.push(Self::load(&path)?);
            }
        }
        files.sort_by_key(|f| f.migration.id);
        Ok(files)
    }

    fn next_id(migrations_dir: &Path) -> Result<u32> {
        Ok(Self::discover(migrations_dir)?
            .iter()
            .map(|f| f.migration.id)
            .max()
            .unwrap_or(0)
            + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SQL: &str = "CREATE TABLE \"subject\" (\"id\" text NOT NULL PRIMARY KEY);";

    #[test]
    fn test_create_and_load() {
        let temp = TempDir::new().unwrap();
        let created = MigrationFile::create(temp.path(), "initial schema", Dialect::Sqlite, SQL).unwrap();

        assert_eq!(created.migration.id, 1);
        assert!(created.path.ends_with("0001_initial_schema.sql"));

        let loaded = MigrationFile::load(&created.path).unwrap();
        assert_eq!(loaded.migration.name, "initial schema");
        assert_eq!(loaded.migration.sql, SQL);
        assert_eq!(loaded.migration.dialect, Some(Dialect::Sqlite));
        assert_eq!(loaded.checksum, created.checksum);
    }

    #[test]
    fn test_load_without_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("0002_add_domain.sql");
        fs::write(&path, "ALTER TABLE \"domain\" ADD COLUMN \"slug\" text;").unwrap();

        let file = MigrationFile::load(&path).unwrap();
        assert_eq!(file.migration.id, 2);
        assert_eq!(file.migration.name, "add_domain");
        assert_eq!(file.migration.dialect, None);
    }

    #[test]
    fn test_tampered_file_fails_checksum() {
        let temp = TempDir::new().unwrap();
        let created = MigrationFile::create(temp.path(), "initial", Dialect::Postgres, SQL).unwrap();
        let content = fs::read_to_string(&created.path).unwrap();
        fs::write(&created.path, content.replace("PRIMARY KEY", "UNIQUE")).unwrap();

        assert!(matches!(
            MigrationFile::load(&created.path),
            Err(MigrationError::ChecksumMismatch { id: 1, .. })
        ));
    }

    #[test]
    fn test_discover_sorts_by_id() {
        let temp = TempDir::new().unwrap();
        MigrationFile::create(temp.path(), "first", Dialect::Sqlite, SQL).unwrap();
        MigrationFile::create(temp.path(), "second", Dialect::Sqlite, SQL).unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let files = MigrationFile::discover(temp.path()).unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.migration.id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_discover_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(MigrationFile::discover(&temp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        let migration = Migration {
            id: 1,
            name: "test".to_string(),
            sql: "SELECT 1;".to_string(),
            created_at: Utc::now(),
            dialect: None,
        };
        assert_eq!(migration.checksum().len(), 64);
        assert_eq!(migration.checksum(), checksum("SELECT 1;"));
    }

    #[test]
    fn test_invalid_name() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            MigrationFile::create(temp.path(), "invalid/name", Dialect::Sqlite, SQL),
            Err(MigrationError::InvalidName(_))
        ));
    }
}
