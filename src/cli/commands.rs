//! CLI commands and argument parsing

use crate::types::EventType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Gap-aware change-log router
#[derive(Parser, Debug)]
#[command(name = "datagap-router")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Engine definition file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// DuckDB database holding the change log, gaps and batches
    #[arg(short, long, global = true, default_value = "routing.duckdb")]
    pub database: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the routing schema
    Init,

    /// Append a change row, as a capture trigger would
    Append {
        /// Channel the row belongs to
        #[arg(long, default_value = "default")]
        channel: String,

        /// Source table
        #[arg(long)]
        table: String,

        /// Kind of change
        #[arg(long, value_enum, default_value = "insert")]
        event: EventArg,

        /// Row values after the change (JSON object)
        #[arg(long)]
        row_data: Option<String>,

        /// Primary-key values (JSON object)
        #[arg(long)]
        pk_data: Option<String>,

        /// Row values before the change (JSON object)
        #[arg(long)]
        old_data: Option<String>,

        /// Source transaction id
        #[arg(long)]
        transaction: Option<String>,

        /// Node the change came from
        #[arg(long)]
        source_node: Option<String>,
    },

    /// Run a routing pass
    Route {
        /// Channel to route (empty = every enabled channel)
        #[arg(long)]
        channel: Option<String>,
    },

    /// Print the gaps of a channel
    Gaps {
        /// Channel id
        #[arg(long, default_value = "default")]
        channel: String,
    },

    /// Print the SQL the next pass would run
    Plan {
        /// Channel id
        #[arg(long, default_value = "default")]
        channel: String,
    },

    /// Validate the engine definition
    Validate,
}

/// Event type argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl From<EventArg> for EventType {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Insert => EventType::Insert,
            EventArg::Update => EventType::Update,
            EventArg::Delete => EventType::Delete,
        }
    }
}
