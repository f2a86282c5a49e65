//! Batch accumulator
//!
//! Keeps one open batch per destination node of a channel.

use super::types::{BatchLimits, BatchSequence, OutgoingBatch};
use crate::cursor::ChangeRow;
use crate::types::BatchAlgorithm;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct OpenBatch {
    batch: OutgoingBatch,
    opened_at: Instant,
}

/// Groups routed rows into bounded batches per destination node
#[derive(Debug)]
pub struct BatchAccumulator {
    channel_id: String,
    limits: BatchLimits,
    sequence: Arc<BatchSequence>,
    open: BTreeMap<String, OpenBatch>,
    closed_count: usize,
}

impl BatchAccumulator {
    /// Create an accumulator for a channel
    pub fn new(
        channel_id: impl Into<String>,
        limits: BatchLimits,
        sequence: Arc<BatchSequence>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            limits,
            sequence,
            open: BTreeMap::new(),
            closed_count: 0,
        }
    }

    /// Add a routed row to the batch of a node
    ///
    /// `at_boundary` tells whether the row ends its source transaction run.
    /// Returns the batch if adding the row closed it.
    pub fn offer(
        &mut self,
        row: &ChangeRow,
        node_id: &str,
        at_boundary: bool,
    ) -> Option<OutgoingBatch> {
        let open = self.open.entry(node_id.to_string()).or_insert_with(|| OpenBatch {
            batch: OutgoingBatch::new(
                self.sequence.next_id(),
                self.channel_id.clone(),
                node_id,
                chrono::Utc::now(),
            ),
            opened_at: Instant::now(),
        });
        open.batch.data_ids.push(row.data_id);
        open.batch.byte_count += row.approximate_size();

        let limit_reached = open.batch.len() >= self.limits.max_rows
            || self
                .limits
                .max_bytes
                .is_some_and(|max| open.batch.byte_count >= max)
            || self
                .limits
                .max_age
                .is_some_and(|max| open.opened_at.elapsed() >= max);

        let close = match self.limits.algorithm {
            BatchAlgorithm::Default => limit_reached && at_boundary,
            BatchAlgorithm::Transactional => at_boundary,
            BatchAlgorithm::Nontransactional => limit_reached,
        };
        if !close {
            return None;
        }

        let closed = self.open.remove(node_id).map(|open| open.batch)?;
        self.closed_count += 1;
        debug!(
            channel_id = %self.channel_id,
            node_id,
            batch_id = closed.batch_id,
            rows = closed.len(),
            "Closed outgoing batch"
        );
        Some(closed)
    }

    /// Number of batches currently open
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Number of batches closed so far, excluding those returned by `finish`
    pub fn closed_count(&self) -> usize {
        self.closed_count
    }

    /// Close every open batch at the end of a pass
    pub fn finish(self) -> Vec<OutgoingBatch> {
        self.open
            .into_values()
            .map(|open| open.batch)
            .filter(|batch| !batch.is_empty())
            .collect()
    }
}
