//! Routing engine module
//!
//! Drives routing passes over the change log.
//!
//! # Overview
//!
//! The engine module provides:
//! - `RoutingCoordinator` - Runs routing passes per channel
//! - `TopologyCache` - Channels and routers behind a refreshable snapshot
//! - `EngineRegistry` - Named coordinators of one process
//! - `PassReport` / `RoutingStats` - Outcome of passes and rounds

mod coordinator;
mod registry;
mod topology;
mod types;

pub use coordinator::RoutingCoordinator;
pub use registry::EngineRegistry;
pub use topology::{Topology, TopologyCache, TopologyLoader};
pub use types::{PassReport, PassState, RoutingRound, RoutingStats};

#[cfg(test)]
mod tests;
