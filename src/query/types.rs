//! Query plan types
//!
//! Describes the change-log selects a routing pass will run, independent of
//! any SQL dialect.

use crate::config::{Channel, PlatformCapabilities, RoutingParams};
use crate::types::{DataId, OrderMode};
use serde::Serialize;
use std::fmt;

/// Inclusive id range of a `between` predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdRange {
    /// First id
    pub start: DataId,
    /// Last id (inclusive)
    pub end: DataId,
}

impl IdRange {
    /// Create a range
    pub fn new(start: DataId, end: DataId) -> Self {
        Self { start, end }
    }

    /// Whether the range holds the id
    pub fn contains(&self, id: DataId) -> bool {
        id >= self.start && id <= self.end
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

/// Data id restriction of one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePredicate {
    /// `data_id between ? and ?` for each range, OR'd together
    Between(Vec<IdRange>),
    /// `data_id >= ?`
    AtLeast(DataId),
}

impl RangePredicate {
    /// Whether a row id satisfies the predicate
    pub fn matches(&self, id: DataId) -> bool {
        match self {
            RangePredicate::Between(ranges) => ranges.iter().any(|r| r.contains(id)),
            RangePredicate::AtLeast(start) => id >= *start,
        }
    }

    /// Number of bind parameters the predicate needs
    pub fn parameter_count(&self) -> usize {
        match self {
            RangePredicate::Between(ranges) => ranges.len() * 2,
            RangePredicate::AtLeast(_) => 1,
        }
    }
}

/// Which payload column groups a query selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Projection {
    /// Primary-key values
    pub pk_data: bool,
    /// Row values
    pub row_data: bool,
    /// Values before an update or delete
    pub old_data: bool,
}

impl Projection {
    /// Every column group
    pub fn all() -> Self {
        Self {
            pk_data: true,
            row_data: true,
            old_data: true,
        }
    }

    /// No payload at all
    pub fn none() -> Self {
        Self {
            pk_data: false,
            row_data: false,
            old_data: false,
        }
    }

    /// Column groups enabled on a channel
    pub fn for_channel(channel: &Channel) -> Self {
        Self {
            pk_data: channel.use_pk_data,
            row_data: channel.use_row_data,
            old_data: channel.use_old_data,
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::all()
    }
}

/// One change-log select
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySpec {
    /// Channel whose rows are selected
    pub channel_id: String,
    /// Data id restriction
    pub predicate: RangePredicate,
    /// Database-side ordering
    pub order: OrderMode,
    /// Selected payload columns
    pub projection: Projection,
}

/// Thresholds and hints that shape a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerThresholds {
    /// Up to this many gaps are listed individually
    pub max_gaps_to_qualify: usize,
    /// Above this many gaps a `data_id >= ?` query is used (0 disables)
    pub greater_query_threshold: usize,
    /// Chunk gaps into several queries
    pub use_multiple_queries: bool,
    /// Sort each query result in memory instead of in the database
    pub into_memory: bool,
    /// Ask the database to order by data id
    pub order_by_data_id: bool,
    /// The id sequence can become visible out of commit order
    pub id_sequence_noorder: bool,
}

impl Default for PlannerThresholds {
    fn default() -> Self {
        Self::from_config(&RoutingParams::default(), &PlatformCapabilities::default())
    }
}

impl PlannerThresholds {
    /// Thresholds from routing parameters and platform hints
    pub fn from_config(params: &RoutingParams, platform: &PlatformCapabilities) -> Self {
        Self {
            max_gaps_to_qualify: params.max_gaps_to_qualify_in_sql.max(1),
            greater_query_threshold: params.gaps_threshold_for_greater_query,
            use_multiple_queries: params.use_multiple_queries,
            into_memory: params.into_memory,
            order_by_data_id: params.order_by_data_id,
            id_sequence_noorder: platform.id_sequence_noorder,
        }
    }

    /// Key used to order rows, either by the database or in memory
    pub fn row_order(&self) -> OrderMode {
        if self.id_sequence_noorder {
            OrderMode::CreateTime
        } else if self.order_by_data_id || self.into_memory {
            OrderMode::DataId
        } else {
            OrderMode::Natural
        }
    }
}

/// The queries of one routing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    /// Queries, executed in order
    pub queries: Vec<QuerySpec>,
    /// Every query lists exact gaps, so no client-side gap filter is needed
    pub each_gap_queried: bool,
    /// Sort key applied in memory to each query result
    pub memory_sort: Option<OrderMode>,
}

impl QueryPlan {
    /// Drop every payload column, for channels whose routers never look at
    /// column values
    #[must_use]
    pub fn without_payload(mut self) -> Self {
        for query in &mut self.queries {
            query.projection = Projection::none();
        }
        self
    }

    /// Ordering rows are delivered in
    pub fn effective_order(&self) -> OrderMode {
        self.memory_sort
            .or_else(|| self.queries.first().map(|q| q.order))
            .unwrap_or_default()
    }
}
