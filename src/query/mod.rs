//! Range query planning module
//!
//! # Overview
//!
//! The query module provides:
//! - `RangeQueryPlanner` - picks per-gap, greater-than or multi-query plans
//! - `QuerySpec` / `QueryPlan` - dialect-neutral description of the selects
//! - `render_sql` - renders a `QuerySpec` with bind parameters

mod planner;
mod sql;
mod types;

pub use planner::RangeQueryPlanner;
pub use sql::{render_sql, RenderedQuery, SqlDialect, SqlParam};
pub use types::{
    IdRange, PlannerThresholds, Projection, QueryPlan, QuerySpec, RangePredicate,
};
