//! Store module
//!
//! # Overview
//!
//! The routing core talks to storage through two traits:
//! - `ChangeLogStore` - range queries and counts over the change log
//! - `RoutingStore` - gap snapshots and the atomic commit of a pass
//!
//! Implementations:
//! - `InMemoryStore` - everything in process memory
//! - `DuckDbStore` - DuckDB tables, rendered SQL and streamed results

mod duckdb_store;
mod memory;
mod types;

pub use duckdb_store::DuckDbStore;
pub use memory::InMemoryStore;
pub use types::{
    BufferedRows, ChangeLogStore, GapSnapshot, PassCommit, RoutingStore, RowStream,
};
