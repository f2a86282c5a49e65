// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # datagap-router
//!
//! Routing core of a trigger-based replication engine. Capture triggers
//! append rows to a change log under a monotonically assigned data id; the
//! router reads the log channel by channel, decides which nodes receive each
//! row and groups the rows into outgoing batches.
//!
//! Ids can become visible out of order, or never (rolled back transactions).
//! The router therefore tracks *gaps*: id ranges it has not yet seen fully
//! routed. Every pass queries only the gaps, closes what it found and opens
//! new gaps for the holes it left, so no committed row is ever skipped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use datagap_router::engine::RoutingCoordinator;
//! use datagap_router::store::InMemoryStore;
//! use datagap_router::{load_config, Result};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config("engine.yaml")?;
//!     let store = Arc::new(InMemoryStore::new());
//!     let coordinator = Arc::new(RoutingCoordinator::new(&config, store.clone(), store)?);
//!
//!     let round = coordinator.route_all(&CancellationToken::new()).await;
//!     println!("routed {} rows", round.stats.rows_routed);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     RoutingCoordinator                          │
//! │  route_channel(id) → PassReport     route_all() → RoutingRound  │
//! │  GapSnapshot → Querying → Routing → Batching → Committing       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌───────────┬──────────────┬───┴──────────┬───────────┬───────────┐
//! │ GapLedger │ QueryPlanner │ RowCursor    │ Router    │ Batches   │
//! ├───────────┼──────────────┼──────────────┼───────────┼───────────┤
//! │ Holes     │ Per gap      │ Retry once   │ Default   │ Per node  │
//! │ Tail gap  │ Greater-than │ Peek-ahead   │ Column    │ Limits    │
//! │ Stale     │ Multi-query  │ Gap filter   │ Node      │ Tx bounds │
//! │ Repair    │ SQL render   │ Memory sort  │ tokens    │           │
//! └───────────┴──────────────┴──────────────┴───────────┴───────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │         ChangeLogStore + RoutingStore (memory, DuckDB)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the router
pub mod error;

/// Common types and type aliases
pub mod types;

/// Engine, channel, node and router configuration
pub mod config;

/// YAML loader for engine definitions
pub mod loader;

/// Template interpolation
pub mod template;

/// Gap bookkeeping
pub mod gap;

/// Range query planning and SQL rendering
pub mod query;

/// Change rows and the change-log cursor
pub mod cursor;

/// Routing predicates
pub mod route;

/// Outgoing batches
pub mod batch;

/// Change-log and routing stores
pub mod store;

/// Routing passes, registry and topology
pub mod engine;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{EngineRegistry, PassReport, RoutingCoordinator};
pub use loader::{load_config, load_config_from_str};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
