//! Range query planner
//!
//! Turns the gap snapshot of a channel into bounded change-log queries.

use super::types::{IdRange, PlannerThresholds, Projection, QueryPlan, QuerySpec, RangePredicate};
use crate::config::Channel;
use crate::gap::DataGap;
use crate::types::OrderMode;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Plans change-log queries from gaps
#[derive(Debug)]
pub struct RangeQueryPlanner {
    thresholds: PlannerThresholds,
    last_used_greater_query: AtomicBool,
}

impl RangeQueryPlanner {
    /// Create a planner
    pub fn new(thresholds: PlannerThresholds) -> Self {
        Self {
            thresholds,
            last_used_greater_query: AtomicBool::new(false),
        }
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &PlannerThresholds {
        &self.thresholds
    }

    /// Plan the queries for a channel
    ///
    /// `gaps` must be in ascending order with the tail gap last, as returned
    /// by [`crate::gap::GapLedger::query_gaps`].
    pub fn plan(&self, channel: &Channel, gaps: &[DataGap]) -> QueryPlan {
        let t = &self.thresholds;
        let projection = Projection::for_channel(channel);
        let (order, memory_sort) = if t.into_memory {
            (OrderMode::Natural, Some(t.row_order()))
        } else {
            (t.row_order(), None)
        };
        let query = |predicate| QuerySpec {
            channel_id: channel.channel_id.clone(),
            predicate,
            order,
            projection,
        };

        let mut each_gap_queried = true;
        let queries = if gaps.is_empty() {
            Vec::new()
        } else if t.use_multiple_queries {
            gaps.chunks(t.max_gaps_to_qualify)
                .map(|chunk| query(RangePredicate::Between(chunk.iter().map(to_range).collect())))
                .collect()
        } else if t.greater_query_threshold > 0 && gaps.len() > t.greater_query_threshold {
            each_gap_queried = false;
            self.note_greater_query(true, gaps.len());
            vec![query(RangePredicate::AtLeast(gaps[0].start_id))]
        } else {
            self.note_greater_query(false, gaps.len());
            let mut ranges: Vec<IdRange> = gaps
                .iter()
                .take(t.max_gaps_to_qualify)
                .map(to_range)
                .collect();
            if gaps.len() > t.max_gaps_to_qualify {
                each_gap_queried = false;
                if let (Some(range), Some(last)) = (ranges.last_mut(), gaps.last()) {
                    range.end = last.end_id;
                }
            }
            vec![query(RangePredicate::Between(ranges))]
        };

        debug!(
            channel_id = %channel.channel_id,
            gaps = gaps.len(),
            queries = queries.len(),
            each_gap_queried,
            order = ?order,
            "Planned change-log queries"
        );

        QueryPlan {
            queries,
            each_gap_queried,
            memory_sort,
        }
    }

    fn note_greater_query(&self, greater: bool, gap_count: usize) {
        let previous = self.last_used_greater_query.swap(greater, Ordering::Relaxed);
        if greater && !previous {
            info!(
                gaps = gap_count,
                threshold = self.thresholds.greater_query_threshold,
                "Switching to select where data_id >= start gap because the gap count exceeds the threshold"
            );
        } else if !greater && previous {
            info!("Switching to select where data_id between gaps");
        }
    }
}

fn to_range(gap: &DataGap) -> IdRange {
    IdRange::new(gap.start_id, gap.end_id)
}
