//! Change row cursor
//!
//! Executes a query plan lazily and hands rows out one at a time in the
//! plan's order, holding rows back while a source transaction continues.

use super::types::{ChangeRow, CursorStats};
use crate::error::{Error, Result};
use crate::gap::DataGap;
use crate::query::{QueryPlan, QuerySpec};
use crate::store::{BufferedRows, ChangeLogStore, RowStream};
use crate::types::{DataId, OrderMode};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per query before a failure is fatal
const QUERY_ATTEMPTS: u32 = 2;

/// Cursor behaviour knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorOptions {
    /// Rows buffered ahead of the emitted row while a transaction continues
    pub peek_ahead_window: usize,
    /// Keep rows of one transaction together
    pub track_transactions: bool,
    /// Stop after this many rows, at the next transaction boundary
    pub max_rows: usize,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            peek_ahead_window: 1000,
            track_transactions: true,
            max_rows: usize::MAX,
        }
    }
}

/// A lazily fetched, forward-only sequence of change rows
///
/// Not resumable: after a pass a new cursor is created from the updated
/// gaps.
pub struct ChangeRowCursor {
    store: Arc<dyn ChangeLogStore>,
    plan: QueryPlan,
    /// Query gaps; rows outside them are dropped when the plan is not exact
    gaps: Vec<DataGap>,
    options: CursorOptions,
    next_query: usize,
    current: Option<Box<dyn RowStream>>,
    window: VecDeque<ChangeRow>,
    source_done: bool,
    stopped_early: bool,
    at_boundary: bool,
    last_data_id: Option<DataId>,
    closed: bool,
    stats: CursorStats,
}

impl std::fmt::Debug for ChangeRowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRowCursor")
            .field("queries", &self.plan.queries.len())
            .field("next_query", &self.next_query)
            .field("window", &self.window.len())
            .field("closed", &self.closed)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ChangeRowCursor {
    /// Create a cursor; no query runs until the first `next`
    pub fn new(
        store: Arc<dyn ChangeLogStore>,
        plan: QueryPlan,
        gaps: Vec<DataGap>,
        options: CursorOptions,
    ) -> Self {
        Self {
            store,
            plan,
            gaps,
            options,
            next_query: 0,
            current: None,
            window: VecDeque::new(),
            source_done: false,
            stopped_early: false,
            at_boundary: true,
            last_data_id: None,
            closed: false,
            stats: CursorStats::default(),
        }
    }

    /// Next row in plan order
    pub async fn next(&mut self) -> Result<Option<ChangeRow>> {
        if self.closed || self.stopped_early {
            return Ok(None);
        }
        if self.stats.rows_emitted as usize >= self.options.max_rows && self.at_boundary {
            self.stopped_early = true;
            debug!(
                rows = self.stats.rows_emitted,
                max_rows = self.options.max_rows,
                "Stopping read at transaction boundary after reaching the row limit"
            );
            self.release();
            return Ok(None);
        }

        self.fill_window().await?;
        let Some(row) = self.window.pop_front() else {
            self.release();
            return Ok(None);
        };

        self.at_boundary = match (&row.transaction_id, self.window.front()) {
            _ if !self.options.track_transactions => true,
            (None, _) => true,
            (Some(_), None) => self.source_done,
            (Some(tx), Some(next)) => next.transaction_id.as_ref() != Some(tx),
        };
        self.last_data_id = Some(row.data_id);
        self.stats.rows_emitted += 1;
        Ok(Some(row))
    }

    /// Whether the last emitted row ended its transaction run
    pub fn at_transaction_boundary(&self) -> bool {
        self.at_boundary
    }

    /// Whether every row the plan selects has been read
    ///
    /// False when the cursor stopped at the row limit or was closed early.
    pub fn all_data_read(&self) -> bool {
        self.source_done && self.window.is_empty() && !self.stopped_early
    }

    /// Id of the last emitted row
    pub fn last_data_id(&self) -> Option<DataId> {
        self.last_data_id
    }

    /// Counters
    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    /// Release the open query and drop buffered rows
    pub fn close(&mut self) {
        if !self.closed {
            self.release();
            self.window.clear();
            self.closed = true;
        }
    }

    fn release(&mut self) {
        self.current = None;
    }

    async fn fill_window(&mut self) -> Result<()> {
        let limit = if self.options.track_transactions {
            self.options.peek_ahead_window.max(1) + 1
        } else {
            1
        };
        loop {
            if self.window.len() >= limit {
                return Ok(());
            }
            if let Some(head) = self.window.front() {
                let same_run = head.transaction_id.is_some()
                    && self
                        .window
                        .back()
                        .is_some_and(|last| last.transaction_id == head.transaction_id);
                if !same_run || !self.options.track_transactions {
                    return Ok(());
                }
            }
            match self.fetch().await? {
                Some(row) => self.window.push_back(row),
                None => return Ok(()),
            }
        }
    }

    /// Next row from the open query, opening queries in order
    async fn fetch(&mut self) -> Result<Option<ChangeRow>> {
        loop {
            if self.source_done {
                return Ok(None);
            }
            if self.current.is_none() {
                let Some(query) = self.plan.queries.get(self.next_query).cloned() else {
                    self.source_done = true;
                    return Ok(None);
                };
                self.next_query += 1;
                self.current = Some(self.open(&query).await?);
            }
            let Some(stream) = self.current.as_mut() else {
                continue;
            };
            let next = stream.next_row().await?;
            match next {
                Some(row) => {
                    self.stats.rows_fetched += 1;
                    if self.plan.each_gap_queried || in_gaps(&self.gaps, row.data_id) {
                        return Ok(Some(row));
                    }
                    self.stats.rows_filtered += 1;
                }
                None => self.current = None,
            }
        }
    }

    async fn open(&mut self, query: &QuerySpec) -> Result<Box<dyn RowStream>> {
        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            self.stats.queries_executed += 1;
            match self.store.execute_range_query(query).await {
                Ok(stream) => break stream,
                Err(e) if e.is_retryable() && attempt < QUERY_ATTEMPTS => {
                    warn!(
                        channel_id = %query.channel_id,
                        attempt,
                        error = %e,
                        "Change-log query failed, retrying"
                    );
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::QueryRetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        };

        match self.plan.memory_sort {
            Some(order) => {
                let mut rows = drain(stream).await?;
                sort_rows(&mut rows, order);
                Ok(Box::new(BufferedRows::new(rows)))
            }
            None => Ok(stream),
        }
    }
}

fn in_gaps(gaps: &[DataGap], id: DataId) -> bool {
    let idx = gaps.partition_point(|g| g.end_id < id);
    gaps.get(idx).is_some_and(|g| g.contains(id))
}

async fn drain(mut stream: Box<dyn RowStream>) -> Result<Vec<ChangeRow>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.next_row().await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Sort rows by the ordering key
pub fn sort_rows(rows: &mut [ChangeRow], order: OrderMode) {
    match order {
        OrderMode::DataId => rows.sort_by_key(|r| r.data_id),
        OrderMode::CreateTime => rows.sort_by_key(|r| (r.create_time, r.data_id)),
        OrderMode::Natural => {}
    }
}
