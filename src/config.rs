//! Configuration types for routing engines
//!
//! This module contains the structures that describe one engine in YAML:
//! routing thresholds, platform capability hints, channels, nodes and
//! router definitions.

use crate::types::BatchAlgorithm;
use serde::{Deserialize, Serialize};

// ============================================================================
// Top-Level Engine Config
// ============================================================================

/// Complete engine configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine name (registry key)
    pub engine_name: String,

    /// Id of the local node; rows are never routed back to it
    pub node_id: String,

    /// Node group the local node belongs to
    #[serde(default)]
    pub node_group_id: String,

    /// Routing thresholds
    #[serde(default)]
    pub routing: RoutingParams,

    /// Capability hints of the database platform
    #[serde(default)]
    pub platform: PlatformCapabilities,

    /// Channel definitions
    #[serde(default)]
    pub channels: Vec<Channel>,

    /// Known destination nodes
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Router definitions
    #[serde(default)]
    pub routers: Vec<RouterDefinition>,
}

impl EngineConfig {
    /// Create an engine config with no channels, nodes or routers
    pub fn new(engine_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            engine_name: engine_name.into(),
            node_id: node_id.into(),
            node_group_id: String::new(),
            routing: RoutingParams::default(),
            platform: PlatformCapabilities::default(),
            channels: Vec::new(),
            nodes: Vec::new(),
            routers: Vec::new(),
        }
    }

    /// Look up a channel by id
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }
}

// ============================================================================
// Routing Parameters
// ============================================================================

/// Operator-tunable thresholds of the routing pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingParams {
    /// Age after which an unfilled gap is assumed abandoned
    pub stale_gap_time_ms: u64,

    /// Minimum interval between stale-gap sweeps on a busy channel
    pub stale_gap_busy_expire_ms: u64,

    /// Maximum width of a newly opened gap
    pub largest_gap_size: i64,

    /// Step of the data id sequence
    pub data_id_increment_by: i64,

    /// Up to this many gaps are listed individually in the WHERE clause
    pub max_gaps_to_qualify_in_sql: usize,

    /// Above this many gaps a single `data_id >= ?` query is issued (0 disables)
    pub gaps_threshold_for_greater_query: usize,

    /// Chunk gaps into several queries of `max_gaps_to_qualify_in_sql` each
    pub use_multiple_queries: bool,

    /// Buffer and sort each query result in memory
    pub into_memory: bool,

    /// Ask the database to order by data id
    pub order_by_data_id: bool,

    /// Rows the cursor may hold back to keep a transaction together
    pub peek_ahead_window: usize,

    /// Wall-clock limit of one pass (0 disables)
    pub pass_timeout_ms: u64,

    /// Repair overlapping or misplaced gaps when a pass starts
    pub detect_invalid_gaps: bool,

    /// Refresh interval of the topology snapshot
    pub topology_ttl_ms: u64,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            stale_gap_time_ms: 1_200_000,
            stale_gap_busy_expire_ms: 60_000,
            largest_gap_size: 50_000_000,
            data_id_increment_by: 1,
            max_gaps_to_qualify_in_sql: 100,
            gaps_threshold_for_greater_query: 100,
            use_multiple_queries: false,
            into_memory: false,
            order_by_data_id: true,
            peek_ahead_window: 1000,
            pass_timeout_ms: 300_000,
            detect_invalid_gaps: true,
            topology_ttl_ms: 60_000,
        }
    }
}

impl RoutingParams {
    /// Create routing params with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stale gap time
    #[must_use]
    pub fn with_stale_gap_time_ms(mut self, ms: u64) -> Self {
        self.stale_gap_time_ms = ms;
        self
    }

    /// Set the largest gap size
    #[must_use]
    pub fn with_largest_gap_size(mut self, size: i64) -> Self {
        self.largest_gap_size = size;
        self
    }

    /// Set the gap qualification threshold
    #[must_use]
    pub fn with_max_gaps_to_qualify(mut self, count: usize) -> Self {
        self.max_gaps_to_qualify_in_sql = count;
        self
    }

    /// Set the greater-than query threshold (0 disables)
    #[must_use]
    pub fn with_greater_query_threshold(mut self, count: usize) -> Self {
        self.gaps_threshold_for_greater_query = count;
        self
    }

    /// Enable multi-query mode
    #[must_use]
    pub fn with_multiple_queries(mut self, enabled: bool) -> Self {
        self.use_multiple_queries = enabled;
        self
    }

    /// Enable in-memory sorting
    #[must_use]
    pub fn with_into_memory(mut self, enabled: bool) -> Self {
        self.into_memory = enabled;
        self
    }

    /// Set the peek-ahead window
    #[must_use]
    pub fn with_peek_ahead_window(mut self, rows: usize) -> Self {
        self.peek_ahead_window = rows;
        self
    }

    /// Set the pass timeout (0 disables)
    #[must_use]
    pub fn with_pass_timeout_ms(mut self, ms: u64) -> Self {
        self.pass_timeout_ms = ms;
        self
    }
}

// ============================================================================
// Platform Capabilities
// ============================================================================

/// Capability hints reported by the database platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformCapabilities {
    /// Triggers record a transaction id per row
    pub supports_transaction_id: bool,

    /// The id sequence can become visible out of commit order
    pub id_sequence_noorder: bool,

    /// The database reports its open transactions
    pub supports_transaction_view: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            supports_transaction_id: true,
            id_sequence_noorder: false,
            supports_transaction_view: false,
        }
    }
}

// ============================================================================
// Channels
// ============================================================================

/// A named partition of the change log with its own batching rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id
    pub channel_id: String,

    /// Disabled channels are skipped by `route_all`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rows per outgoing batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Upper bound on rows read in one pass
    #[serde(default = "default_max_data_to_route")]
    pub max_data_to_route: usize,

    /// Approximate byte size per outgoing batch
    #[serde(default)]
    pub max_batch_bytes: Option<u64>,

    /// Age at which an open batch is closed
    #[serde(default)]
    pub max_batch_age_ms: Option<u64>,

    /// Batch boundary policy
    #[serde(default)]
    pub batch_algorithm: BatchAlgorithm,

    /// Select the primary-key column group
    #[serde(default = "default_true")]
    pub use_pk_data: bool,

    /// Select the row data column group
    #[serde(default = "default_true")]
    pub use_row_data: bool,

    /// Select the old data column group
    #[serde(default = "default_true")]
    pub use_old_data: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    10_000
}

fn default_max_data_to_route() -> usize {
    100_000
}

impl Channel {
    /// Create a channel with default limits
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            enabled: true,
            max_batch_size: default_max_batch_size(),
            max_data_to_route: default_max_data_to_route(),
            max_batch_bytes: None,
            max_batch_age_ms: None,
            batch_algorithm: BatchAlgorithm::Default,
            use_pk_data: true,
            use_row_data: true,
            use_old_data: true,
        }
    }

    /// Set rows per batch
    #[must_use]
    pub fn with_max_batch_size(mut self, rows: usize) -> Self {
        self.max_batch_size = rows;
        self
    }

    /// Set max rows per pass
    #[must_use]
    pub fn with_max_data_to_route(mut self, rows: usize) -> Self {
        self.max_data_to_route = rows;
        self
    }

    /// Set the byte limit per batch
    #[must_use]
    pub fn with_max_batch_bytes(mut self, bytes: u64) -> Self {
        self.max_batch_bytes = Some(bytes);
        self
    }

    /// Set the batch algorithm
    #[must_use]
    pub fn with_batch_algorithm(mut self, algorithm: BatchAlgorithm) -> Self {
        self.batch_algorithm = algorithm;
        self
    }

    /// Set which column groups are selected
    #[must_use]
    pub fn with_columns(mut self, pk_data: bool, row_data: bool, old_data: bool) -> Self {
        self.use_pk_data = pk_data;
        self.use_row_data = row_data;
        self.use_old_data = old_data;
        self
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// A destination node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node id
    pub node_id: String,

    /// Node group id
    pub node_group_id: String,

    /// External id (defaults to the node id)
    #[serde(default)]
    pub external_id: Option<String>,

    /// Disabled nodes receive nothing
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Node {
    /// Create an enabled node
    pub fn new(node_id: impl Into<String>, node_group_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_group_id: node_group_id.into(),
            external_id: None,
            enabled: true,
        }
    }

    /// External id, falling back to the node id
    pub fn external_id(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.node_id)
    }
}

// ============================================================================
// Routers
// ============================================================================

/// Binds a routing predicate to a channel, source table and target group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDefinition {
    /// Router id
    pub router_id: String,

    /// Channel whose rows this router sees
    pub channel: String,

    /// Source table name, or `*` for every table
    #[serde(default = "default_source_table")]
    pub source_table: String,

    /// Node group that receives the rows
    pub target_node_group_id: String,

    /// Route inserts
    #[serde(default = "default_true")]
    pub sync_on_insert: bool,

    /// Route updates
    #[serde(default = "default_true")]
    pub sync_on_update: bool,

    /// Route deletes
    #[serde(default = "default_true")]
    pub sync_on_delete: bool,

    /// Predicate type
    #[serde(default)]
    pub kind: RouterKind,
}

fn default_source_table() -> String {
    "*".to_string()
}

/// Routing predicate definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterKind {
    /// Every enabled node of the target group
    #[default]
    Default,
    /// Column-match expression
    Column {
        /// Expression such as `STATUS=:NODE_ID OR REGION=NULL`
        expression: String,
    },
}

impl RouterDefinition {
    /// Create a default router for every table of a channel
    pub fn new(
        router_id: impl Into<String>,
        channel: impl Into<String>,
        target_node_group_id: impl Into<String>,
    ) -> Self {
        Self {
            router_id: router_id.into(),
            channel: channel.into(),
            source_table: default_source_table(),
            target_node_group_id: target_node_group_id.into(),
            sync_on_insert: true,
            sync_on_update: true,
            sync_on_delete: true,
            kind: RouterKind::Default,
        }
    }

    /// Restrict to one source table
    #[must_use]
    pub fn with_source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table = table.into();
        self
    }

    /// Use a column-match expression
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.kind = RouterKind::Column {
            expression: expression.into(),
        };
        self
    }
}
