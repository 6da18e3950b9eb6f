//! c15t command line.
//!
//! Keeps a consent database in step with the declared schema.
//!
//! # Quick Start
//!
//! ```bash
//! # Show what the database is missing
//! c15t status
//!
//! # Create missing tables and columns
//! c15t migrate --yes
//!
//! # Write the pending changes to migrations/0001_schema.sql instead
//! c15t generate --name schema
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use c15t::Dialect;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// c15t - consent management storage.
#[derive(Parser)]
#[command(name = "c15t")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory containing c15t.toml.
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Log debug output, including generated SQL.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables and columns in the configured database.
    Migrate {
        /// Apply without asking for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Write pending schema changes to a numbered migration file.
    Generate {
        /// Directory for the migration file (default: [migrations].directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Migration name, used in the file name.
        #[arg(short, long, default_value = "schema")]
        name: String,

        /// Compile the full schema for this dialect without connecting.
        #[arg(short, long)]
        dialect: Option<Dialect>,
    },

    /// Show the database connection and pending migrations.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show version information.
    Version,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.no_color {
        style::set_no_color(true);
    }

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Migrate { yes } => commands::migrate::run(&cli.project, yes).await,
        Commands::Generate {
            output,
            name,
            dialect,
        } => commands::generate::run(&cli.project, output, &name, dialect).await,
        Commands::Status { json } => commands::status::run(&cli.project, json).await,
    }
}
