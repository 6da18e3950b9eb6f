//! End-to-end tests for the `c15t` binary.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SQLITE_CONFIG: &str = r#"
[project]
name = "shop"

[database]
dialect = "sqlite"
url = "sqlite://c15t.db?mode=rwc"
"#;

/// A project directory with `config` as its c15t.toml.
fn project(config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("c15t.toml"), config).unwrap();
    dir
}

/// The binary, isolated from the caller's user config and environment.
fn c15t(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("c15t").unwrap();
    cmd.env("HOME", project)
        .env("XDG_CONFIG_HOME", project.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("C15T_DATABASE__URL")
        .env_remove("C15T_DATABASE__DIALECT")
        .arg("--no-color")
        .arg("--project")
        .arg(project);
    cmd
}

fn status_json(project: &Path) -> serde_json::Value {
    let output = c15t(project).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("c15t")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn version_prints_package_version() {
    Command::cargo_bin("c15t")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("c15t {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn unknown_dialect_is_rejected() {
    let dir = project(SQLITE_CONFIG);
    c15t(dir.path())
        .args(["generate", "--dialect", "oracle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn migrate_creates_schema_once() {
    let dir = project(SQLITE_CONFIG);

    c15t(dir.path())
        .args(["migrate", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("create table"))
        .stdout(predicate::str::contains("Applied 11 statement(s)"));
    assert!(dir.path().join("c15t.db").exists());

    c15t(dir.path())
        .args(["migrate", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));
}

#[test]
fn migrate_without_terminal_requires_yes() {
    let dir = project(SQLITE_CONFIG);
    c15t(dir.path())
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));

    c15t(dir.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pendingStatements\": 11"));
}

#[test]
fn status_reports_pending_then_clean() {
    let dir = project(SQLITE_CONFIG);

    c15t(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("shop"))
        .stdout(predicate::str::contains("not migrated"))
        .stdout(predicate::str::contains("11 statement(s)"));

    let before = status_json(dir.path());
    assert_eq!(before["status"]["databaseOk"], true);
    assert_eq!(before["status"]["schemaReady"], false);
    assert_eq!(before["pendingStatements"], 11);

    c15t(dir.path()).args(["migrate", "--yes"]).assert().success();

    let report = status_json(dir.path());
    assert_eq!(report["pendingStatements"], 0);
    assert_eq!(report["status"]["adapter"], "sql");
    assert_eq!(report["status"]["databaseOk"], true);
    assert_eq!(report["status"]["schemaReady"], true);
}

#[test]
fn generate_writes_numbered_files() {
    let dir = project(SQLITE_CONFIG);

    c15t(dir.path())
        .args(["generate", "--name", "initial"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0001_initial.sql"));

    let sql = fs::read_to_string(dir.path().join("migrations/0001_initial.sql")).unwrap();
    assert!(sql.contains("-- Dialect: sqlite"));
    assert!(sql.contains("CREATE TABLE \"subject\""));
    assert!(sql.contains("CREATE TABLE \"auditLog\""));
}

#[test]
fn generate_offline_for_another_dialect() {
    let dir = project(SQLITE_CONFIG);
    let out = dir.path().join("pg");

    c15t(dir.path())
        .args(["generate", "--dialect", "postgres", "--output"])
        .arg(&out)
        .assert()
        .success();

    let sql = fs::read_to_string(out.join("0001_schema.sql")).unwrap();
    assert!(sql.contains("-- Dialect: postgres"));
    assert!(sql.contains("timestamptz"));
    assert!(!dir.path().join("c15t.db").exists());
}

#[test]
fn memory_adapter_cannot_migrate() {
    let dir = project("[database]\nadapter = \"memory\"\n");
    c15t(dir.path())
        .args(["migrate", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no SQL database"));
}

#[test]
fn invalid_config_is_reported() {
    let dir = project("[database]\ndialect = \"postgres\"\nurl = \"sqlite://c15t.db\"\n");
    c15t(dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
