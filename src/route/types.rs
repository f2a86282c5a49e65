//! Routing types and traits

use crate::config::Node;
use crate::cursor::ChangeRow;
use std::collections::BTreeSet;
use std::fmt;

/// Decides which of the candidate nodes receive a row
///
/// Candidates are the enabled nodes of the router's target group, already
/// excluding the local node and the node the row came from. Whether a
/// predicate stops at its first match or accumulates is up to the
/// implementation.
pub trait RoutingPredicate: Send + Sync + fmt::Debug {
    /// Node ids the row is routed to
    fn route_to_nodes(&self, row: &ChangeRow, nodes: &[&Node]) -> BTreeSet<String>;

    /// Whether the predicate looks at column values
    ///
    /// When no predicate of a channel does, the change-log query can skip
    /// the payload columns.
    fn uses_column_values(&self) -> bool {
        false
    }
}

/// Comparison of a column match expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
    /// `contains`, against a comma separated column value
    Contains,
    /// `not contains`
    NotContains,
}

impl MatchOperator {
    /// Operators in the order they are tried when parsing
    pub const PARSE_ORDER: [MatchOperator; 4] = [
        MatchOperator::NotEquals,
        MatchOperator::Equals,
        MatchOperator::NotContains,
        MatchOperator::Contains,
    ];

    /// Operator text
    pub fn symbol(self) -> &'static str {
        match self {
            MatchOperator::Equals => "=",
            MatchOperator::NotEquals => "!=",
            MatchOperator::Contains => "contains",
            MatchOperator::NotContains => "not contains",
        }
    }

    /// Compare a column value with a compare value
    pub fn evaluate(self, column: Option<&str>, compare: Option<&str>) -> bool {
        match self {
            MatchOperator::Equals => column == compare,
            MatchOperator::NotEquals => column != compare,
            MatchOperator::Contains => match (column, compare) {
                (Some(column), Some(compare)) => column.split(',').any(|v| v == compare),
                _ => false,
            },
            MatchOperator::NotContains => match (column, compare) {
                (Some(column), Some(compare)) => !column.split(',').any(|v| v == compare),
                _ => false,
            },
        }
    }
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a column match expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOperand {
    /// `:NODE_ID`, compared per candidate node
    NodeId,
    /// `:EXTERNAL_ID`, compared per candidate node
    ExternalId,
    /// `:NODE_GROUP_ID`, compared per candidate node
    NodeGroupId,
    /// `:COLUMN`, another column of the same row
    Column(String),
    /// `NULL`
    Null,
    /// Plain or quoted literal
    Literal(String),
}

impl MatchOperand {
    /// Value of a node token for a node, `None` for other operands
    pub fn node_value<'a>(&self, node: &'a Node) -> Option<&'a str> {
        match self {
            MatchOperand::NodeId => Some(&node.node_id),
            MatchOperand::ExternalId => Some(node.external_id()),
            MatchOperand::NodeGroupId => Some(&node.node_group_id),
            _ => None,
        }
    }

    /// Whether the operand is compared against each node
    pub fn is_node_token(&self) -> bool {
        matches!(
            self,
            MatchOperand::NodeId | MatchOperand::ExternalId | MatchOperand::NodeGroupId
        )
    }
}

/// One `COLUMN <op> VALUE` term; terms of an expression are OR'd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpression {
    /// Upper-cased column name
    pub column: String,
    /// Comparison
    pub operator: MatchOperator,
    /// Compare value
    pub operand: MatchOperand,
}
