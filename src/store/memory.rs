//! In-memory store
//!
//! Reference implementation of both store traits. Rows are kept in commit
//! order, which is also the "natural" order of an unordered query.

use super::types::{
    BufferedRows, ChangeLogStore, GapSnapshot, PassCommit, RoutingStore, RowStream,
};
use crate::batch::{BatchStatus, OutgoingBatch};
use crate::cursor::{sort_rows, ChangeRow};
use crate::error::{Error, Result};
use crate::gap::DataGap;
use crate::query::QuerySpec;
use crate::types::{DataId, Timestamp};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    /// Committed change rows in commit order
    rows: Vec<ChangeRow>,
    last_data_id: DataId,
    gaps: HashMap<String, BTreeSet<DataGap>>,
    gap_versions: HashMap<String, u64>,
    busy_expire: HashMap<String, Timestamp>,
    batches: Vec<OutgoingBatch>,
    earliest_open_transaction: Option<Timestamp>,
}

/// Change log, gaps and batches held in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next data id without committing a row, like a trigger
    /// inside a transaction that has not committed yet
    pub async fn reserve_data_id(&self) -> DataId {
        let mut state = self.state.write().await;
        state.last_data_id += 1;
        state.last_data_id
    }

    /// Append a row under the next data id
    pub async fn append(&self, mut row: ChangeRow) -> DataId {
        let mut state = self.state.write().await;
        state.last_data_id += 1;
        row.data_id = state.last_data_id;
        state.rows.push(row);
        state.last_data_id
    }

    /// Commit a row under the id it already carries
    pub async fn insert_row(&self, row: ChangeRow) -> Result<()> {
        let mut state = self.state.write().await;
        if state.rows.iter().any(|r| r.data_id == row.data_id) {
            return Err(Error::store(format!("Data id {} already exists", row.data_id)));
        }
        state.last_data_id = state.last_data_id.max(row.data_id);
        state.rows.push(row);
        Ok(())
    }

    /// Report the start time of the oldest open source transaction
    pub async fn set_earliest_open_transaction(&self, started_at: Option<Timestamp>) {
        self.state.write().await.earliest_open_transaction = started_at;
    }

    /// Replace the persisted gaps of a channel, bumping its version
    pub async fn replace_gaps(&self, channel_id: &str, gaps: impl IntoIterator<Item = DataGap>) {
        let mut state = self.state.write().await;
        state
            .gaps
            .insert(channel_id.to_string(), gaps.into_iter().collect());
        *state.gap_versions.entry(channel_id.to_string()).or_default() += 1;
    }

    /// Number of committed rows
    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }
}

#[async_trait]
impl ChangeLogStore for InMemoryStore {
    async fn execute_range_query(&self, query: &QuerySpec) -> Result<Box<dyn RowStream>> {
        let state = self.state.read().await;
        let mut rows: Vec<ChangeRow> = state
            .rows
            .iter()
            .filter(|r| r.channel_id == query.channel_id && query.predicate.matches(r.data_id))
            .map(|r| {
                let mut row = r.clone();
                if !query.projection.row_data {
                    row.row_data = None;
                }
                if !query.projection.pk_data {
                    row.pk_data = None;
                }
                if !query.projection.old_data {
                    row.old_data = None;
                }
                row
            })
            .collect();
        sort_rows(&mut rows, query.order);
        debug!(
            channel_id = %query.channel_id,
            rows = rows.len(),
            "Executed in-memory range query"
        );
        Ok(Box::new(BufferedRows::new(rows)))
    }

    async fn count_data_in_range(
        &self,
        channel_id: &str,
        start: DataId,
        end: DataId,
    ) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.channel_id == channel_id && r.data_id >= start && r.data_id <= end)
            .count() as u64)
    }

    async fn count_unrouted(&self, channel_id: &str, after: DataId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.channel_id == channel_id && r.data_id > after)
            .count() as u64)
    }

    async fn earliest_transaction_start(&self) -> Result<Option<Timestamp>> {
        Ok(self.state.read().await.earliest_open_transaction)
    }
}

#[async_trait]
impl RoutingStore for InMemoryStore {
    async fn load_gaps(&self, channel_id: &str) -> Result<GapSnapshot> {
        let state = self.state.read().await;
        Ok(GapSnapshot {
            gaps: state
                .gaps
                .get(channel_id)
                .map(|gaps| gaps.iter().cloned().collect())
                .unwrap_or_default(),
            version: state.gap_versions.get(channel_id).copied().unwrap_or(0),
            last_busy_expire: state.busy_expire.get(channel_id).copied(),
        })
    }

    async fn last_routed_data_id(&self, channel_id: &str) -> Result<Option<DataId>> {
        let state = self.state.read().await;
        Ok(state
            .batches
            .iter()
            .filter(|b| b.channel_id == channel_id)
            .filter_map(OutgoingBatch::max_data_id)
            .max())
    }

    async fn max_batch_id(&self) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.batches.iter().map(|b| b.batch_id).max().unwrap_or(0))
    }

    async fn commit(&self, commit: PassCommit) -> Result<u64> {
        let mut state = self.state.write().await;
        let version = state
            .gap_versions
            .get(&commit.channel_id)
            .copied()
            .unwrap_or(0);
        if version != commit.expected_version {
            return Err(Error::gap_conflict(&commit.channel_id));
        }

        let gaps = state.gaps.entry(commit.channel_id.clone()).or_default();
        commit.gap_delta.apply(gaps);
        let new_version = version + 1;
        state
            .gap_versions
            .insert(commit.channel_id.clone(), new_version);
        match commit.last_busy_expire {
            Some(at) => state.busy_expire.insert(commit.channel_id.clone(), at),
            None => state.busy_expire.remove(&commit.channel_id),
        };
        state.batches.extend(commit.batches.into_iter().map(|mut batch| {
            batch.status = BatchStatus::New;
            batch
        }));
        Ok(new_version)
    }

    async fn batches(&self, channel_id: &str) -> Result<Vec<OutgoingBatch>> {
        let state = self.state.read().await;
        let mut batches: Vec<OutgoingBatch> = state
            .batches
            .iter()
            .filter(|b| b.channel_id == channel_id)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.batch_id);
        Ok(batches)
    }
}
