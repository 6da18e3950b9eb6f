//! `c15t status`

use std::path::Path;

use anyhow::{Context, Result};
use c15t_migration::MigrationFile;
use serde_json::json;

use super::{command_hint, open, redact_url};
use crate::style::{self, colors::SemanticStyle};

pub async fn run(project: &Path, json: bool) -> Result<()> {
    let (config, c15t) = open(project).await?;
    let status = c15t.status().await;
    let pending = match c15t.database() {
        Some(_) => Some(
            c15t.migration_plan()
                .await
                .context("Failed to compare the database with the schema")?,
        ),
        None => None,
    };
    c15t.close().await;

    let files = MigrationFile::discover(&config.migrations.directory).with_context(|| {
        format!(
            "Failed to read migrations from {}",
            config.migrations.directory.display()
        )
    })?;
    let database = c15t.database().map(|_| redact_url(&config.database.url));

    if json {
        let report = json!({
            "project": config.project.name,
            "database": database,
            "status": status,
            "pendingStatements": pending.as_ref().map(|plan| plan.statements().len()),
            "pendingTables": pending.as_ref().map(|plan| {
                plan.to_be_created
                    .iter()
                    .map(|table| table.table_name.clone())
                    .collect::<Vec<_>>()
            }),
            "migrationFiles": files.len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let pending_text = match &pending {
        Some(plan) if plan.is_empty() => "none".success(),
        Some(plan) => format!(
            "{} statement(s), {} new table(s)",
            plan.statements().len(),
            plan.to_be_created.len()
        )
        .warning(),
        None => "n/a".muted(),
    };
    let entries = [
        ("Project", config.project.name.clone()),
        ("Adapter", status.adapter.clone()),
        (
            "Dialect",
            status.dialect.map_or_else(|| "-".to_string(), |d| d.to_string()),
        ),
        ("Database", database.unwrap_or_else(|| "in-memory".to_string())),
        (
            "Connection",
            if status.database_ok { "ok".success() } else { "failed".error() },
        ),
        (
            "Schema",
            if status.schema_ready { "ready".success() } else { "not migrated".warning() },
        ),
        ("Tables", status.tables.to_string()),
        ("Pending", pending_text),
        (
            "Migration files",
            format!("{} in {}", files.len(), config.migrations.directory.display()),
        ),
        ("Version", status.version.clone()),
    ];
    println!("{}", style::info_table(&entries));

    if pending.as_ref().is_some_and(|plan| !plan.is_empty()) {
        style::print_hint(&format!(
            "Run {} to apply, or {} to write a migration file",
            command_hint("migrate"),
            command_hint("generate")
        ));
    }
    Ok(())
}
