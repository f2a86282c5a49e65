//! Outgoing batch module
//!
//! # Overview
//!
//! The batch module provides:
//! - `OutgoingBatch` - routed row ids for one node on one channel
//! - `BatchAccumulator` - closes batches on row, byte or age limits
//! - `BatchSequence` - engine-wide batch id allocation

mod accumulator;
mod types;

pub use accumulator::BatchAccumulator;
pub use types::{BatchLimits, BatchSequence, BatchStatus, OutgoingBatch};

#[cfg(test)]
mod tests;
