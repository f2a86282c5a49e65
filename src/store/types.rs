//! Store traits
//!
//! The routing core reads the change log and persists gaps and batches
//! only through these interfaces.

use crate::batch::OutgoingBatch;
use crate::cursor::ChangeRow;
use crate::error::Result;
use crate::gap::{DataGap, GapDelta};
use crate::query::QuerySpec;
use crate::types::{DataId, Timestamp};
use async_trait::async_trait;
use std::collections::VecDeque;

/// A stream of change rows from one executed query
///
/// Dropping the stream releases the underlying query resources.
#[async_trait]
pub trait RowStream: Send {
    /// Next row, or `None` once the query is exhausted
    async fn next_row(&mut self) -> Result<Option<ChangeRow>>;
}

/// Row stream over rows already in memory
#[derive(Debug, Default)]
pub struct BufferedRows {
    rows: VecDeque<ChangeRow>,
}

impl BufferedRows {
    /// Create a stream over rows
    pub fn new(rows: impl IntoIterator<Item = ChangeRow>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    /// Rows left
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the stream is exhausted
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl RowStream for BufferedRows {
    async fn next_row(&mut self) -> Result<Option<ChangeRow>> {
        Ok(self.rows.pop_front())
    }
}

/// Read side of the change log
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Execute one planned query
    async fn execute_range_query(&self, query: &QuerySpec) -> Result<Box<dyn RowStream>>;

    /// Number of rows of a channel with ids in `[start, end]`
    async fn count_data_in_range(&self, channel_id: &str, start: DataId, end: DataId)
        -> Result<u64>;

    /// Number of rows of a channel with ids above `after`
    async fn count_unrouted(&self, channel_id: &str, after: DataId) -> Result<u64>;

    /// Start time of the oldest transaction still open on the source
    /// database, if the platform can report it
    async fn earliest_transaction_start(&self) -> Result<Option<Timestamp>> {
        Ok(None)
    }
}

/// Gaps of a channel together with the version they were read at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapSnapshot {
    /// Persisted gaps in ascending order
    pub gaps: Vec<DataGap>,
    /// Version of the channel's gap state
    pub version: u64,
    /// When the last busy pass expired stale gaps, or started waiting to
    pub last_busy_expire: Option<Timestamp>,
}

/// Everything one pass persists
#[derive(Debug, Clone, Default)]
pub struct PassCommit {
    /// Channel the pass ran for
    pub channel_id: String,
    /// Gap version the pass started from
    pub expected_version: u64,
    /// Gap changes
    pub gap_delta: GapDelta,
    /// Produced batches
    pub batches: Vec<OutgoingBatch>,
    /// Busy-expire timer to carry into the next pass
    pub last_busy_expire: Option<Timestamp>,
}

impl PassCommit {
    /// Create an empty commit for a channel
    pub fn new(channel_id: impl Into<String>, expected_version: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            expected_version,
            ..Default::default()
        }
    }

    /// Number of routed rows across the batches
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(OutgoingBatch::len).sum()
    }
}

/// Write side used by the coordinator
///
/// `commit` applies gap changes and batches as one atomic unit and fails
/// with [`crate::Error::GapConflict`] when the channel's gap version moved
/// since it was loaded.
#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// Load the persisted gaps of a channel
    async fn load_gaps(&self, channel_id: &str) -> Result<GapSnapshot>;

    /// Highest data id routed into a batch for a channel
    async fn last_routed_data_id(&self, channel_id: &str) -> Result<Option<DataId>>;

    /// Highest batch id ever persisted
    async fn max_batch_id(&self) -> Result<i64>;

    /// Atomically persist a pass, returning the new gap version
    async fn commit(&self, commit: PassCommit) -> Result<u64>;

    /// Committed batches of a channel in batch id order
    async fn batches(&self, channel_id: &str) -> Result<Vec<OutgoingBatch>>;
}
