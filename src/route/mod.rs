//! Row routing module
//!
//! # Overview
//!
//! Routers are bound to a channel, a source table (or `*`) and the event
//! types they route. Each carries a predicate:
//! - `DefaultRouter` - every enabled node of the target group
//! - `ColumnMatchRouter` - column-match expressions
//!
//! `Router` evaluates every applicable predicate and unions the results.

mod router;
mod routers;
mod types;

pub use router::Router;
pub use routers::{ColumnMatchRouter, DefaultRouter};
pub use types::{ColumnExpression, MatchOperand, MatchOperator, RoutingPredicate};
