//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::render::OutputFormat;

/// Administrative access to a sqlgate database.
#[derive(Debug, Parser)]
#[command(name = "sqlgate-admin", version, about)]
pub struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(long, env = "SQLGATE_CONFIG", default_value = "sqlgate.yaml", global = true)]
    pub config: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Admin subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List user tables
    Tables,

    /// Show a table's columns and its first rows
    Schema {
        /// Table name, as printed by `tables`
        table: String,
    },

    /// Run a single SQL statement
    Sql {
        /// The statement. `SELECT` and `WITH` print rows, anything else
        /// prints the affected row count.
        sql: String,

        /// Row count above which results are printed as JSON lines
        #[arg(long, default_value_t = 200)]
        max_rows: usize,
    },

    /// Drop every table (asks for a confirmation token first)
    DropAll {
        /// Token printed by a run without this flag
        #[arg(long, value_name = "TOKEN")]
        confirm: Option<String>,
    },

    /// Delete every row of every table (asks for a confirmation token first)
    ClearAll {
        /// Token printed by a run without this flag
        #[arg(long, value_name = "TOKEN")]
        confirm: Option<String>,
    },

    /// Create the bot tables if they are missing
    InitSchema,

    /// Show the dialect and pool occupancy
    Status,
}
