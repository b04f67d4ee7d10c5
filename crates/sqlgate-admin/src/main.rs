//! Administrative CLI for sqlgate databases.
//!
//! Lists and inspects tables, runs single SQL statements and performs
//! confirmation-gated bulk drops and clears against whichever backend
//! `sqlgate.yaml` selects.
//!
//! # Startup Sequence
//!
//! 1. Parse arguments
//! 2. Load configuration (file if present, then environment overrides)
//! 3. Initialize structured logging (tracing, to stderr)
//! 4. Open the database and run the subcommand
//! 5. Close the pool and print the result

mod cli;
mod commands;
mod config;
mod error;
mod render;

use std::process::ExitCode;

use clap::Parser;
use sqlgate_db::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{AdminConfig, LogFormat, LoggingConfig};
use crate::error::AdminError;

/// Application entry point.
///
/// Errors are printed shortened, since they may echo SQL or engine text.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e.truncated());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String, AdminError> {
    let config = AdminConfig::load(&cli.config)?;
    init_tracing(&config.logging);
    info!(
        config = %cli.config.display(),
        dialect = %config.database.dialect,
        "sqlgate-admin starting"
    );

    let db = Database::from_config(&config.database)?;
    db.init().await?;
    let result = commands::run(&db, &cli.command, cli.format).await;
    db.close().await;
    result
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
