//! Engine types
//!
//! Pass states, per-pass reports and aggregated routing statistics.

use crate::types::DataId;
use serde::Serialize;
use std::fmt;

/// Stage of a channel's routing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    /// No pass running
    #[default]
    Idle,
    /// Loading and repairing the gap snapshot
    GapSnapshot,
    /// Planning and opening change-log queries
    Querying,
    /// Reading and routing rows
    Routing,
    /// Closing the remaining batches
    Batching,
    /// Persisting gap changes and batches
    Committing,
    /// The last pass failed and was rolled back; holds until the next pass
    Failed,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassState::Idle => "idle",
            PassState::GapSnapshot => "gap_snapshot",
            PassState::Querying => "querying",
            PassState::Routing => "routing",
            PassState::Batching => "batching",
            PassState::Committing => "committing",
            PassState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one committed routing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Channel id
    pub channel_id: String,
    /// Rows read from the change log
    pub rows_read: usize,
    /// Rows routed to at least one node
    pub rows_routed: usize,
    /// Rows routed nowhere
    pub rows_unrouted: usize,
    /// Batches committed
    pub batches_created: usize,
    /// Gaps removed
    pub gaps_deleted: usize,
    /// Gaps added
    pub gaps_inserted: usize,
    /// Queries executed, retries included
    pub queries_executed: u32,
    /// Whether the pass read everything its queries selected
    pub all_data_read: bool,
    /// Highest id read
    pub last_data_id: Option<DataId>,
    /// Gap version after the commit
    pub gap_version: u64,
    /// Rows of the channel beyond the last id read, if they could be counted
    pub backlog: Option<u64>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl PassReport {
    /// Create an empty report
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }
}

/// Statistics over a round of passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingStats {
    /// Passes committed
    pub channels_routed: usize,
    /// Passes that failed
    pub channels_failed: usize,
    /// Rows read
    pub rows_read: usize,
    /// Rows routed to at least one node
    pub rows_routed: usize,
    /// Batches committed
    pub batches_created: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl RoutingStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a committed pass
    pub fn add_report(&mut self, report: &PassReport) {
        self.channels_routed += 1;
        self.rows_read += report.rows_read;
        self.rows_routed += report.rows_routed;
        self.batches_created += report.batches_created;
    }

    /// Add a failed pass
    pub fn add_failure(&mut self) {
        self.channels_failed += 1;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// Results of routing every enabled channel once
#[derive(Debug, Default)]
pub struct RoutingRound {
    /// Committed passes, ordered by channel id
    pub reports: Vec<PassReport>,
    /// Failed passes
    pub failures: Vec<crate::error::Error>,
    /// Totals
    pub stats: RoutingStats,
}
