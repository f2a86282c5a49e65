//! CLI module
//!
//! Command-line interface for a routing engine backed by DuckDB.
//!
//! # Commands
//!
//! - `init` - Create the routing schema
//! - `append` - Append a change row
//! - `route` - Run routing passes
//! - `gaps` - Print a channel's gaps
//! - `plan` - Print the SQL of the next pass
//! - `validate` - Validate the engine definition

mod commands;
mod runner;

pub use commands::{Cli, Commands, EventArg};
pub use runner::Runner;
