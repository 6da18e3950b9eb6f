//! `c15t generate`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use c15t::Dialect;
use c15t_config::C15tConfig;
use c15t_migration::{LiveSchema, MigrationFile, MigrationPlan, diff};
use c15t_schema::get_consent_tables;

use super::{command_hint, open, print_plan};
use crate::style::{self, colors::SemanticStyle};

pub async fn run(project: &Path, output: Option<PathBuf>, name: &str, dialect: Option<Dialect>) -> Result<()> {
    let (config, plan) = match dialect {
        Some(dialect) => offline_plan(project, dialect)?,
        None => {
            let (config, c15t) = open(project).await?;
            let plan = c15t
                .migration_plan()
                .await
                .context("Failed to compare the database with the schema")?;
            c15t.close().await;
            (config, plan)
        }
    };

    print_plan(&plan);
    if plan.is_empty() {
        style::print_success("Database schema is up to date; nothing to generate");
        return Ok(());
    }

    let directory = output.unwrap_or(config.migrations.directory);
    let file = MigrationFile::create(&directory, name, plan.dialect, &plan.compile())
        .with_context(|| format!("Failed to write migration to {}", directory.display()))?;

    style::print_success(&format!(
        "Created {}",
        file.path.display().to_string().code()
    ));
    println!("  Migration ID: {}", file.migration.id);
    println!("  Statements:   {}", plan.statements().len());
    println!("  Checksum:     {}", file.checksum.muted());
    if dialect.is_none() {
        style::print_hint(&format!("Apply it directly with {}", command_hint("migrate")));
    }
    Ok(())
}

/// The full schema for `dialect`, as if the database were empty.
fn offline_plan(project: &Path, dialect: Dialect) -> Result<(C15tConfig, MigrationPlan)> {
    let config = C15tConfig::load_from_dir(project)
        .with_context(|| format!("Failed to load configuration from {}", project.display()))?;
    let tables = get_consent_tables(&config.schema_options()?)?;
    let plan = diff(dialect, &tables, &LiveSchema::default())?;
    Ok((config, plan))
}
