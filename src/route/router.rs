//! Row router
//!
//! Evaluates the routers bound to a channel and unions their destinations.

use super::routers::{ColumnMatchRouter, DefaultRouter};
use super::types::RoutingPredicate;
use crate::config::{Channel, EngineConfig, Node, RouterDefinition, RouterKind};
use crate::cursor::ChangeRow;
use crate::error::Result;
use crate::types::EventType;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A router definition with its compiled predicate
#[derive(Debug)]
struct BoundRouter {
    definition: RouterDefinition,
    predicate: Box<dyn RoutingPredicate>,
}

impl BoundRouter {
    fn applies_to(&self, row: &ChangeRow, channel_id: &str) -> bool {
        let def = &self.definition;
        let event_enabled = match row.event_type {
            EventType::Insert => def.sync_on_insert,
            EventType::Update => def.sync_on_update,
            EventType::Delete => def.sync_on_delete,
        };
        def.channel == channel_id
            && event_enabled
            && (def.source_table == "*" || def.source_table.eq_ignore_ascii_case(&row.table_name))
    }
}

/// Assigns destination nodes to change rows
#[derive(Debug)]
pub struct Router {
    local_node_id: String,
    nodes: Vec<Node>,
    routers: Vec<BoundRouter>,
}

impl Router {
    /// Compile the routers of an engine definition
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut router = Self::new(config.node_id.clone(), config.nodes.clone());
        for definition in &config.routers {
            let predicate: Box<dyn RoutingPredicate> = match &definition.kind {
                RouterKind::Default => Box::new(DefaultRouter),
                RouterKind::Column { expression } => {
                    Box::new(ColumnMatchRouter::parse(expression)?)
                }
            };
            router = router.with_predicate(definition.clone(), predicate);
        }
        Ok(router)
    }

    /// Create a router without any bound predicates
    pub fn new(local_node_id: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            nodes,
            routers: Vec::new(),
        }
    }

    /// Bind a predicate
    #[must_use]
    pub fn with_predicate(
        mut self,
        definition: RouterDefinition,
        predicate: Box<dyn RoutingPredicate>,
    ) -> Self {
        self.routers.push(BoundRouter {
            definition,
            predicate,
        });
        self
    }

    /// Number of bound routers
    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    /// Whether any router of the channel reads column values
    pub fn needs_payload(&self, channel_id: &str) -> bool {
        self.routers
            .iter()
            .any(|r| r.definition.channel == channel_id && r.predicate.uses_column_values())
    }

    /// Destination node ids for a row
    ///
    /// Never contains the local node or the node the row originated from.
    /// A row no router applies to is dropped and logged.
    pub fn route(&self, row: &ChangeRow, channel: &Channel) -> BTreeSet<String> {
        let mut destinations = BTreeSet::new();
        let mut applied = 0;

        for bound in self.routers.iter().filter(|r| r.applies_to(row, &channel.channel_id)) {
            applied += 1;
            let candidates: Vec<&Node> = self
                .nodes
                .iter()
                .filter(|n| {
                    n.enabled
                        && n.node_group_id == bound.definition.target_node_group_id
                        && self.is_eligible(&n.node_id, row)
                })
                .collect();
            destinations.extend(bound.predicate.route_to_nodes(row, &candidates));
        }
        destinations.retain(|node_id| self.is_eligible(node_id, row));

        if applied == 0 {
            warn!(
                channel_id = %channel.channel_id,
                data_id = row.data_id,
                table = %row.table_name,
                "No router matched row, dropping it"
            );
        } else if destinations.is_empty() {
            debug!(
                channel_id = %channel.channel_id,
                data_id = row.data_id,
                "Row routed to zero nodes"
            );
        }
        destinations
    }

    fn is_eligible(&self, node_id: &str, row: &ChangeRow) -> bool {
        node_id != self.local_node_id && row.source_node_id.as_deref() != Some(node_id)
    }
}
