//! SQL rendering for change-log queries

use super::types::{QuerySpec, RangePredicate};
use crate::error::Result;
use crate::template::{self, TemplateParams};
use crate::types::{DataId, OrderMode};
use serde::Serialize;

/// Select over the change-log table
const SELECT_TEMPLATE: &str =
    "select {{ columns }} from {{ table }} d where d.channel_id = ?{{ range }}{{ order }}";

/// Dialect-specific pieces of the change-log select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDialect {
    /// Change-log table
    pub data_table: String,
    /// Expression yielding the create time in microseconds since the epoch
    pub create_time_expr: String,
}

impl SqlDialect {
    /// DuckDB flavour
    pub fn duckdb() -> Self {
        Self {
            data_table: "sym_data".to_string(),
            create_time_expr: "epoch_us(d.create_time)".to_string(),
        }
    }
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self::duckdb()
    }
}

/// A bind parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Id(DataId),
}

/// SQL text with its bind parameters in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedQuery {
    /// Statement with `?` placeholders
    pub sql: String,
    /// Bind parameters
    pub params: Vec<SqlParam>,
}

/// Render a query for a dialect
///
/// Fixed columns come first: data id, table name, event type, transaction
/// id, source node id and create time. The enabled payload groups follow in
/// the order row data, pk data, old data.
pub fn render_sql(spec: &QuerySpec, dialect: &SqlDialect) -> Result<RenderedQuery> {
    let mut columns = vec![
        "d.data_id".to_string(),
        "d.table_name".to_string(),
        "d.event_type".to_string(),
        "d.transaction_id".to_string(),
        "d.source_node_id".to_string(),
        dialect.create_time_expr.clone(),
    ];
    if spec.projection.row_data {
        columns.push("d.row_data".to_string());
    }
    if spec.projection.pk_data {
        columns.push("d.pk_data".to_string());
    }
    if spec.projection.old_data {
        columns.push("d.old_data".to_string());
    }

    let mut params = vec![SqlParam::Text(spec.channel_id.clone())];
    let range = match &spec.predicate {
        RangePredicate::Between(ranges) if ranges.is_empty() => " and 1=0".to_string(),
        RangePredicate::Between(ranges) => {
            let clauses: Vec<&str> = ranges
                .iter()
                .map(|range| {
                    params.push(SqlParam::Id(range.start));
                    params.push(SqlParam::Id(range.end));
                    "(d.data_id between ? and ?)"
                })
                .collect();
            format!(" and ({})", clauses.join(" or "))
        }
        RangePredicate::AtLeast(start) => {
            params.push(SqlParam::Id(*start));
            " and d.data_id >= ?".to_string()
        }
    };

    let order = match spec.order {
        OrderMode::DataId => " order by d.data_id",
        OrderMode::CreateTime => " order by d.create_time, d.data_id",
        OrderMode::Natural => "",
    };

    let template_params = TemplateParams::new()
        .with("columns", columns.join(", "))
        .with("table", dialect.data_table.as_str())
        .with("range", range)
        .with("order", order);

    Ok(RenderedQuery {
        sql: template::render(SELECT_TEMPLATE, &template_params)?,
        params,
    })
}
