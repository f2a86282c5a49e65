//! Routing predicate implementations

use super::types::{ColumnExpression, MatchOperand, MatchOperator, RoutingPredicate};
use crate::config::Node;
use crate::cursor::ChangeRow;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::warn;

/// Splits an expression into OR'd terms: newlines (optionally joined with
/// `or`) or a spaced `or`/`OR`
static TERM_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(\s+or|\s+OR)?(\r\n|\r|\n)(or\s+|OR\s+)?\s*|\s+or\s+|\s+OR\s+").unwrap()
});

// ============================================================================
// Default Router
// ============================================================================

/// Routes every row to every candidate node
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRouter;

impl RoutingPredicate for DefaultRouter {
    fn route_to_nodes(&self, _row: &ChangeRow, nodes: &[&Node]) -> BTreeSet<String> {
        nodes.iter().map(|n| n.node_id.clone()).collect()
    }
}

// ============================================================================
// Column Match Router
// ============================================================================

/// Routes on column values of the row
///
/// Terms are OR'd. A term compared against a node token (`:NODE_ID`,
/// `:EXTERNAL_ID`, `:NODE_GROUP_ID`) selects the matching nodes, any other
/// matching term selects every candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMatchRouter {
    expression: String,
    terms: Vec<ColumnExpression>,
}

impl ColumnMatchRouter {
    /// Parse an expression such as `STATUS=OPEN OR REGION=:NODE_GROUP_ID`
    ///
    /// A blank expression parses to a router that matches nothing.
    pub fn parse(expression: &str) -> Result<Self> {
        let mut terms = Vec::new();
        if expression.trim().is_empty() {
            warn!("Column match expression is empty");
        }
        for term in TERM_SEPARATOR.split(expression) {
            if term.trim().is_empty() {
                continue;
            }
            let parsed = MatchOperator::PARSE_ORDER
                .iter()
                .find_map(|op| parse_term(term, *op));
            match parsed {
                Some(parsed) => terms.push(parsed),
                None => {
                    return Err(Error::expression(
                        expression,
                        format!("invalid term '{}'", term.trim()),
                    ))
                }
            }
        }
        Ok(Self {
            expression: expression.to_string(),
            terms,
        })
    }

    /// Source expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Parsed terms
    pub fn terms(&self) -> &[ColumnExpression] {
        &self.terms
    }
}

fn parse_term(term: &str, operator: MatchOperator) -> Option<ColumnExpression> {
    let parts: Vec<&str> = term.split(operator.symbol()).collect();
    let [column, value] = parts.as_slice() else {
        return None;
    };
    let (column, value) = (column.trim(), value.trim());
    if column.is_empty() || value.is_empty() {
        return None;
    }
    Some(ColumnExpression {
        column: column.to_uppercase(),
        operator,
        operand: parse_operand(value),
    })
}

fn parse_operand(value: &str) -> MatchOperand {
    if value.eq_ignore_ascii_case(":NODE_ID") {
        MatchOperand::NodeId
    } else if value.eq_ignore_ascii_case(":EXTERNAL_ID") {
        MatchOperand::ExternalId
    } else if value.eq_ignore_ascii_case(":NODE_GROUP_ID") {
        MatchOperand::NodeGroupId
    } else if let Some(column) = value.strip_prefix(':') {
        MatchOperand::Column(column.to_uppercase())
    } else if value == "NULL" {
        MatchOperand::Null
    } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        MatchOperand::Literal(value[1..value.len() - 1].replace("''", "'"))
    } else {
        MatchOperand::Literal(value.to_string())
    }
}

impl RoutingPredicate for ColumnMatchRouter {
    fn route_to_nodes(&self, row: &ChangeRow, nodes: &[&Node]) -> BTreeSet<String> {
        let mut selected = BTreeSet::new();
        let columns = row.column_values();
        if columns.is_empty() {
            warn!(
                data_id = row.data_id,
                table = %row.table_name,
                "There were no columns to match"
            );
            return selected;
        }

        for term in &self.terms {
            let column_value = columns.get(&term.column).cloned().flatten();
            if term.operand.is_node_token() {
                for node in nodes {
                    if term
                        .operator
                        .evaluate(column_value.as_deref(), term.operand.node_value(node))
                    {
                        selected.insert(node.node_id.clone());
                    }
                }
                continue;
            }

            let compare = match &term.operand {
                MatchOperand::Column(name) => columns.get(name).cloned().flatten(),
                MatchOperand::Literal(value) => Some(value.clone()),
                _ => None,
            };
            if term
                .operator
                .evaluate(column_value.as_deref(), compare.as_deref())
            {
                selected.extend(nodes.iter().map(|n| n.node_id.clone()));
            }
        }
        selected
    }

    fn uses_column_values(&self) -> bool {
        true
    }
}
