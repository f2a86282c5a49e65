//! Gap ledger
//!
//! Tracks the gaps of one channel across routing passes and computes the
//! gap changes a pass has to commit.

use super::types::{DataGap, GapDelta};
use crate::config::RoutingParams;
use crate::types::{DataId, Timestamp, MAX_DATA_ID};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Gap bookkeeping for one channel
///
/// The last gap of the ledger is the tail gap. It is persisted with a finite
/// end (`start + largest_gap_size`) but queried as open ended, and every id
/// read above its start is mapped into it.
#[derive(Debug, Clone)]
pub struct GapLedger {
    channel_id: String,
    largest_gap_size: i64,
    increment: i64,
    stale_gap_time_ms: i64,
    busy_expire_ms: i64,
    detect_invalid_gaps: bool,
    gaps: Vec<DataGap>,
    repairs: GapDelta,
    observed: Vec<DataId>,
    pass_started_at: Timestamp,
    earliest_open_transaction: Option<Timestamp>,
    transaction_view: bool,
    last_busy_expire: Option<Timestamp>,
}

impl GapLedger {
    /// Create an empty ledger for a channel
    pub fn new(channel_id: impl Into<String>, params: &RoutingParams) -> Self {
        Self {
            channel_id: channel_id.into(),
            largest_gap_size: params.largest_gap_size.max(1),
            increment: params.data_id_increment_by.max(1),
            stale_gap_time_ms: i64::try_from(params.stale_gap_time_ms).unwrap_or(i64::MAX),
            busy_expire_ms: i64::try_from(params.stale_gap_busy_expire_ms).unwrap_or(i64::MAX),
            detect_invalid_gaps: params.detect_invalid_gaps,
            gaps: Vec::new(),
            repairs: GapDelta::new(),
            observed: Vec::new(),
            pass_started_at: chrono::Utc::now(),
            earliest_open_transaction: None,
            transaction_view: false,
            last_busy_expire: None,
        }
    }

    /// Channel this ledger belongs to
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Current gaps in ascending order
    pub fn gaps(&self) -> &[DataGap] {
        &self.gaps
    }

    /// The tail gap, if any
    pub fn tail(&self) -> Option<&DataGap> {
        self.gaps.last()
    }

    /// Highest id known to precede the tail gap
    pub fn watermark(&self) -> Option<DataId> {
        self.tail().map(|gap| gap.start_id - self.increment)
    }

    /// Start time of the pass in progress
    pub fn pass_started_at(&self) -> Timestamp {
        self.pass_started_at
    }

    /// Start time of the oldest open database transaction, when the platform
    /// can report it
    ///
    /// When set, a gap is stale once it predates every open transaction.
    pub fn set_earliest_open_transaction(&mut self, started_at: Option<Timestamp>) {
        self.earliest_open_transaction = started_at;
    }

    /// Whether the platform exposes its open transactions
    ///
    /// With a transaction view and no open transaction reported, every gap
    /// is stale. Without one, staleness falls back to gap age.
    pub fn set_transaction_view(&mut self, enabled: bool) {
        self.transaction_view = enabled;
    }

    /// When a busy pass last expired stale gaps, or started waiting to
    pub fn last_busy_expire(&self) -> Option<Timestamp> {
        self.last_busy_expire
    }

    /// Restore the busy-expire timer persisted by an earlier pass
    pub fn set_last_busy_expire(&mut self, at: Option<Timestamp>) {
        self.last_busy_expire = at;
    }

    /// Load the gap snapshot for a new pass
    ///
    /// `persisted` is the stored gap list, `last_routed` the highest id ever
    /// routed on the channel. Repairs made here are folded into the delta
    /// returned by [`GapLedger::after_routing_pass`].
    pub fn before_routing_pass(
        &mut self,
        persisted: Vec<DataGap>,
        last_routed: Option<DataId>,
        started_at: Timestamp,
    ) -> &[DataGap] {
        self.pass_started_at = started_at;
        self.observed.clear();
        self.repairs = GapDelta::new();

        let mut gaps = persisted;
        gaps.sort();
        gaps.dedup();

        if self.detect_invalid_gaps {
            gaps = self.repair(gaps);
        }

        if !gaps.iter().any(|gap| self.is_tail_sized(gap)) {
            let floor = last_routed.map_or(0, |id| id + self.increment);
            let start = gaps
                .last()
                .map_or(floor, |gap| floor.max(gap.end_id + self.increment));
            let tail = DataGap::new(start, start + self.largest_gap_size, started_at);
            info!(channel_id = %self.channel_id, gap = %tail, "Starting new tail gap");
            self.repairs.to_insert.insert(tail.clone());
            gaps.push(tail);
        }

        debug!(
            channel_id = %self.channel_id,
            gaps = gaps.len(),
            "Loaded gap snapshot"
        );
        self.gaps = gaps;
        &self.gaps
    }

    /// Gaps as they should be queried: the tail gap is open ended
    pub fn query_gaps(&self) -> Vec<DataGap> {
        let mut gaps = self.gaps.clone();
        if let Some(tail) = gaps.last_mut() {
            tail.end_id = MAX_DATA_ID;
        }
        gaps
    }

    /// Record ids read during the pass
    pub fn record_observed_ids(&mut self, ids: impl IntoIterator<Item = DataId>) {
        self.observed.extend(ids);
    }

    /// Record one id read during the pass
    pub fn record_observed_id(&mut self, id: DataId) {
        self.observed.push(id);
    }

    /// Number of ids recorded so far
    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }

    /// Stale gaps that must be confirmed empty before a busy channel may
    /// expire them
    ///
    /// Returns nothing when all data was read, since expiry then needs no
    /// confirmation, or when the busy sweep is not yet due.
    pub fn stale_gaps_to_verify(&self, all_data_read: bool) -> Vec<DataGap> {
        if all_data_read || !self.busy_expire_due(all_data_read) {
            return Vec::new();
        }

        let ids = self.sorted_observed();
        let last = self.gaps.len().saturating_sub(1);
        self.gaps
            .iter()
            .enumerate()
            .filter(|(i, gap)| *i != last && self.is_stale(gap) && !any_within(&ids, gap))
            .map(|(_, gap)| gap.clone())
            .collect()
    }

    /// Compute the gap changes of the pass
    ///
    /// `verified_empty` holds the gaps from [`GapLedger::stale_gaps_to_verify`]
    /// that the change log confirmed empty.
    pub fn after_routing_pass(
        &mut self,
        all_data_read: bool,
        verified_empty: &BTreeSet<DataGap>,
    ) -> GapDelta {
        let ids = self.sorted_observed();
        let busy_expire = self.busy_expire_due(all_data_read);
        let now = self.pass_started_at;

        let mut current: BTreeSet<DataGap> = self.gaps.iter().cloned().collect();
        let mut deleted = BTreeSet::new();
        let mut added = BTreeSet::new();
        let mut expired = Vec::new();
        let mut tail_last_id = None;

        let last_index = self.gaps.len().saturating_sub(1);
        let mut next = 0;
        for (index, gap) in self.gaps.iter().enumerate() {
            let is_last = index == last_index;
            let upper = if is_last { MAX_DATA_ID } else { gap.end_id };

            while next < ids.len() && ids[next] < gap.start_id {
                next += 1;
            }
            let first = next;
            while next < ids.len() && ids[next] <= upper {
                next += 1;
            }
            let in_gap = &ids[first..next];

            if !in_gap.is_empty() {
                deleted.insert(gap.clone());
                current.remove(gap);
            } else if !is_last
                && (all_data_read || busy_expire)
                && self.is_stale(gap)
                && (all_data_read || verified_empty.contains(gap))
            {
                expired.push(gap.clone());
                deleted.insert(gap.clone());
                current.remove(gap);
            }

            let mut last_id: Option<DataId> = None;
            for &id in in_gap {
                match last_id {
                    None if gap.start_id + self.increment <= id => {
                        self.add_hole(gap.start_id, id - 1, now, &mut current, &mut added);
                    }
                    Some(prev) if prev + self.increment != id && prev != id => {
                        self.add_hole(prev + 1, id - 1, now, &mut current, &mut added);
                    }
                    _ => {}
                }
                last_id = Some(id);
            }

            if let Some(prev) = last_id {
                if is_last {
                    tail_last_id = Some(prev);
                } else if prev + self.increment <= gap.end_id {
                    self.add_hole(prev + self.increment, gap.end_id, now, &mut current, &mut added);
                }
            }
        }

        if let Some(prev) = tail_last_id {
            let tail = DataGap::new(prev + 1, prev.saturating_add(self.largest_gap_size), now);
            if self.add_gap(tail.clone(), &mut current, &mut added) {
                debug!(channel_id = %self.channel_id, gap = %tail, "Inserting new tail gap");
            }
        }

        self.log_expired(&expired);

        if all_data_read {
            self.last_busy_expire = None;
        } else if self.last_busy_expire.is_none() || busy_expire {
            self.last_busy_expire = Some(now);
        }

        let mut delta = std::mem::take(&mut self.repairs);
        delta.merge(GapDelta {
            to_delete: deleted,
            to_insert: added,
        });

        self.gaps = current.into_iter().collect();
        self.observed.clear();
        delta
    }

    fn sorted_observed(&self) -> Vec<DataId> {
        let mut ids = self.observed.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn is_tail_sized(&self, gap: &DataGap) -> bool {
        gap.gap_size() >= self.largest_gap_size - 1
    }

    fn is_stale(&self, gap: &DataGap) -> bool {
        match self.earliest_open_transaction {
            Some(earliest) => gap.create_time < earliest,
            None if self.transaction_view => true,
            None => {
                (self.pass_started_at - gap.create_time).num_milliseconds()
                    > self.stale_gap_time_ms
            }
        }
    }

    fn busy_expire_due(&self, all_data_read: bool) -> bool {
        if all_data_read {
            return false;
        }
        self.last_busy_expire.is_some_and(|last| {
            (self.pass_started_at - last).num_milliseconds() >= self.busy_expire_ms
        })
    }

    /// Open a gap for a hole, split into pieces narrower than a tail gap
    fn add_hole(
        &self,
        start: DataId,
        end: DataId,
        now: Timestamp,
        current: &mut BTreeSet<DataGap>,
        added: &mut BTreeSet<DataGap>,
    ) {
        let span = (self.largest_gap_size - 1).max(1);
        let mut chunk_start = start;
        loop {
            let chunk_end = end.min(chunk_start.saturating_add(span - 1));
            self.add_gap(DataGap::new(chunk_start, chunk_end, now), current, added);
            if chunk_end >= end {
                break;
            }
            chunk_start = chunk_end + 1;
        }
    }

    fn add_gap(
        &self,
        gap: DataGap,
        current: &mut BTreeSet<DataGap>,
        added: &mut BTreeSet<DataGap>,
    ) -> bool {
        if self.detect_invalid_gaps {
            if current.contains(&gap) {
                warn!(channel_id = %self.channel_id, gap = %gap, "Detected a duplicate data gap");
                return false;
            }
            if !gap.is_valid() {
                warn!(channel_id = %self.channel_id, gap = %gap, "Detected an invalid gap range");
                return false;
            }
        }
        current.insert(gap.clone());
        added.insert(gap);
        true
    }

    /// Merge overlapping gaps and drop gaps positioned after the tail gap
    fn repair(&mut self, gaps: Vec<DataGap>) -> Vec<DataGap> {
        let mut fixed: Vec<DataGap> = Vec::with_capacity(gaps.len());
        let mut tail_seen = false;

        for gap in gaps {
            if !gap.is_valid() {
                warn!(channel_id = %self.channel_id, gap = %gap, "Removing invalid gap");
                self.repairs.to_delete.insert(gap);
                continue;
            }
            if tail_seen {
                warn!(channel_id = %self.channel_id, gap = %gap, "Removing gap found after last gap");
                self.repairs.to_delete.insert(gap);
                continue;
            }

            let is_tail = self.is_tail_sized(&gap);
            match fixed.last_mut() {
                Some(prev) if prev.overlaps(&gap) => {
                    let merged_end = if is_tail {
                        prev.start_id + self.largest_gap_size - 1
                    } else {
                        prev.end_id.max(gap.end_id)
                    };
                    let merged = DataGap::new(
                        prev.start_id,
                        merged_end,
                        prev.create_time.min(gap.create_time),
                    );
                    warn!(
                        channel_id = %self.channel_id,
                        first = %prev,
                        second = %gap,
                        merged = %merged,
                        "Merging overlapping gaps"
                    );
                    self.repairs.to_delete.insert(prev.clone());
                    self.repairs.to_delete.insert(gap);
                    self.repairs.to_insert.insert(merged.clone());
                    *prev = merged;
                }
                _ => fixed.push(gap),
            }
            tail_seen = is_tail;
        }

        self.repairs.normalize();
        fixed
    }

    fn log_expired(&self, expired: &[DataGap]) {
        let (Some(first), Some(last)) = (expired.first(), expired.last()) else {
            return;
        };
        let oldest = expired.iter().map(|g| g.create_time).min();
        let newest = expired.iter().map(|g| g.create_time).max();
        if expired.len() == 1 {
            info!(channel_id = %self.channel_id, gap = %first, "Expired stale data gap");
        } else {
            info!(
                channel_id = %self.channel_id,
                count = expired.len(),
                from_id = first.start_id,
                to_id = last.end_id,
                oldest = ?oldest,
                newest = ?newest,
                "Expired stale data gaps"
            );
        }
    }
}

/// Whether any sorted id falls inside the gap
fn any_within(ids: &[DataId], gap: &DataGap) -> bool {
    let index = ids.partition_point(|id| *id < gap.start_id);
    ids.get(index).is_some_and(|id| *id <= gap.end_id)
}
