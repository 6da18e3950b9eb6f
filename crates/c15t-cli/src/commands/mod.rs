//! CLI command implementations.

pub mod generate;
pub mod migrate;
pub mod status;
pub mod version;

use std::path::Path;

use anyhow::{Context, Result};
use c15t::{C15t, C15tConfig, MigrationPlan};

use crate::style::{self, colors::SemanticStyle};

/// Loads the project configuration and opens its database.
pub async fn open(project: &Path) -> Result<(C15tConfig, C15t)> {
    let config = C15tConfig::load_from_dir(project)
        .with_context(|| format!("Failed to load configuration from {}", project.display()))?;
    let c15t = C15t::from_config(&config)
        .await
        .with_context(|| format!("Failed to open database {}", redact_url(&config.database.url)))?;
    Ok((config, c15t))
}

/// Prints what a plan will change, then any type warnings.
pub fn print_plan(plan: &MigrationPlan) {
    let mut rows: Vec<Vec<String>> = plan
        .to_be_created
        .iter()
        .map(|table| {
            vec![
                table.table_name.clone(),
                "create table".to_string(),
                table.fields.keys().cloned().collect::<Vec<_>>().join(", "),
            ]
        })
        .collect();
    rows.extend(plan.to_be_added.iter().map(|addition| {
        vec![
            addition.table_name.clone(),
            "add columns".to_string(),
            addition.fields.join(", "),
        ]
    }));
    if !rows.is_empty() {
        println!("{}", style::data_table(&["Table", "Action", "Fields"], &rows));
    }
    for warning in &plan.warnings {
        style::print_warn(&warning.to_string());
    }
}

/// Hides the password in a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

/// `c15t <command>` styled for hints.
pub fn command_hint(command: &str) -> String {
    format!("c15t {command}").code()
}
