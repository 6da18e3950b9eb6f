//! `c15t migrate`

use std::path::Path;

use anyhow::{Context, Result};
use dialoguer::Confirm;

use super::{command_hint, open, print_plan};
use crate::style;

pub async fn run(project: &Path, yes: bool) -> Result<()> {
    let (_, c15t) = open(project).await?;
    let plan = c15t
        .migration_plan()
        .await
        .context("Failed to compare the database with the schema")?;

    print_plan(&plan);
    if plan.is_empty() {
        style::print_success("Database schema is up to date");
        c15t.close().await;
        return Ok(());
    }

    let count = plan.statements().len();

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Apply {count} statement(s) to the {} database?", plan.dialect))
            .default(false)
            .interact()
            .context("Confirmation requires a terminal; pass --yes to apply non-interactively")?;
        if !confirmed {
            style::print_hint(&format!(
                "Nothing applied. Review the SQL with {}",
                command_hint("generate")
            ));
            c15t.close().await;
            return Ok(());
        }
    }

    let db = c15t
        .database()
        .context("The configured adapter has no SQL database to migrate")?;
    let result = plan.run(db).await;
    c15t.close().await;
    if let Err(err) = result {
        style::print_error("Migration stopped at the first failing statement");
        return Err(err).context("Failed to apply migrations");
    }

    style::print_success(&format!(
        "Applied {count} statement(s): {} table(s) created, {} table(s) altered",
        plan.to_be_created.len(),
        plan.to_be_added.len()
    ));
    Ok(())
}
