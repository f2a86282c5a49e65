//! Batch types

use crate::config::Channel;
use crate::types::{BatchAlgorithm, DataId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Lifecycle of an outgoing batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Still being filled by a routing pass
    Routing,
    /// Committed and ready for transport
    New,
}

impl BatchStatus {
    /// Two-letter code used in storage
    pub fn code(self) -> &'static str {
        match self {
            BatchStatus::Routing => "RT",
            BatchStatus::New => "NE",
        }
    }

    /// Parse a storage code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "RT" => Some(BatchStatus::Routing),
            "NE" => Some(BatchStatus::New),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Rows routed to one node on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingBatch {
    /// Batch id
    pub batch_id: i64,
    /// Channel id
    pub channel_id: String,
    /// Destination node
    pub node_id: String,
    /// Routed row ids in emission order
    pub data_ids: Vec<DataId>,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Approximate payload bytes
    pub byte_count: u64,
    /// When the batch was opened
    pub create_time: Timestamp,
}

impl OutgoingBatch {
    /// Open an empty batch
    pub fn new(
        batch_id: i64,
        channel_id: impl Into<String>,
        node_id: impl Into<String>,
        create_time: Timestamp,
    ) -> Self {
        Self {
            batch_id,
            channel_id: channel_id.into(),
            node_id: node_id.into(),
            data_ids: Vec::new(),
            status: BatchStatus::Routing,
            byte_count: 0,
            create_time,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.data_ids.len()
    }

    /// Whether the batch holds no rows
    pub fn is_empty(&self) -> bool {
        self.data_ids.is_empty()
    }

    /// Highest row id in the batch
    pub fn max_data_id(&self) -> Option<DataId> {
        self.data_ids.iter().copied().max()
    }

    /// Mark the batch ready for transport
    pub fn mark_ready(&mut self) {
        self.status = BatchStatus::New;
    }
}

/// When a channel closes a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Rows per batch
    pub max_rows: usize,
    /// Approximate bytes per batch
    pub max_bytes: Option<u64>,
    /// Time a batch may stay open
    pub max_age: Option<Duration>,
    /// Transaction boundary policy
    pub algorithm: BatchAlgorithm,
}

impl BatchLimits {
    /// Limits configured on a channel
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            max_rows: channel.max_batch_size.max(1),
            max_bytes: channel.max_batch_bytes,
            max_age: channel.max_batch_age_ms.map(Duration::from_millis),
            algorithm: channel.batch_algorithm,
        }
    }
}

/// Batch id generator shared by every channel of an engine
#[derive(Debug, Default)]
pub struct BatchSequence {
    last: AtomicI64,
}

impl BatchSequence {
    /// Sequence whose first id is `last + 1`
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id handed out
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
