//! Gap tracking module
//!
//! A gap is a range of data ids that may still receive rows from writer
//! transactions that have not committed yet.
//!
//! # Overview
//!
//! The gap module provides:
//! - `DataGap` - an inclusive id range with its detection time
//! - `GapDelta` - gap deletes and inserts committed with a pass
//! - `GapLedger` - per-channel bookkeeping between routing passes

mod ledger;
mod types;

pub use ledger::GapLedger;
pub use types::{DataGap, GapDelta};
