//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands};
use crate::config::EngineConfig;
use crate::cursor::ChangeRow;
use crate::engine::{PassReport, RoutingCoordinator, Topology, TopologyCache};
use crate::error::{Error, Result, ResultExt};
use crate::gap::GapLedger;
use crate::loader::load_config;
use crate::query::{PlannerThresholds, RangeQueryPlanner};
use crate::store::{ChangeLogStore, DuckDbStore, RoutingStore};
use crate::types::{EventType, JsonObject};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Init => self.init(),
            Commands::Append {
                channel,
                table,
                event,
                row_data,
                pk_data,
                old_data,
                transaction,
                source_node,
            } => {
                let mut row = ChangeRow::new(
                    0,
                    channel.as_str(),
                    table.as_str(),
                    EventType::from(*event),
                    chrono::Utc::now(),
                );
                if let Some(values) = row_data {
                    row = row.with_row_data(&parse_object("row-data", values)?);
                }
                if let Some(values) = pk_data {
                    row = row.with_pk_data(&parse_object("pk-data", values)?);
                }
                if let Some(values) = old_data {
                    row = row.with_old_data(&parse_object("old-data", values)?);
                }
                if let Some(tx) = transaction {
                    row = row.with_transaction(tx.as_str());
                }
                if let Some(node) = source_node {
                    row = row.with_source_node(node.as_str());
                }
                self.append(&row)
            }
            Commands::Route { channel } => self.route(channel.as_deref()).await,
            Commands::Gaps { channel } => self.gaps(channel).await,
            Commands::Plan { channel } => self.plan(channel).await,
            Commands::Validate => self.validate(),
        }
    }

    /// Path of the engine definition
    fn config_path(&self) -> Result<&Path> {
        self.cli
            .config
            .as_deref()
            .ok_or_else(|| Error::config("Engine definition not specified (use -c flag)"))
    }

    /// Load the engine definition
    fn load_config(&self) -> Result<EngineConfig> {
        load_config(self.config_path()?)
    }

    fn open_store(&self) -> Result<Arc<DuckDbStore>> {
        let store = DuckDbStore::open(&self.cli.database).with_context(|| {
            format!("Cannot open routing store {}", self.cli.database.display())
        })?;
        Ok(Arc::new(store))
    }

    /// Create the schema
    fn init(&self) -> Result<()> {
        self.open_store()?;
        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!("Initialized routing store at {}", self.cli.database.display())
            }
        }));
        Ok(())
    }

    /// Append a change row
    fn append(&self, row: &ChangeRow) -> Result<()> {
        let store = self.open_store()?;
        let data_id = store.append(row)?;
        self.output_message(&json!({
            "type": "DATA",
            "data": {
                "data_id": data_id,
                "channel_id": row.channel_id,
                "table_name": row.table_name,
                "event_type": row.event_type.code(),
            }
        }));
        Ok(())
    }

    /// Run routing passes
    async fn route(&self, channel: Option<&str>) -> Result<()> {
        let config = self.load_config()?;
        let store = self.open_store()?;
        let topology = TopologyCache::from_file(
            self.config_path()?,
            Duration::from_millis(config.routing.topology_ttl_ms),
        )?;
        let coordinator = Arc::new(RoutingCoordinator::with_topology(
            &config,
            topology,
            store.clone(),
            store,
        ));

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling routing");
                on_signal.cancel();
            }
        });

        if let Some(channel_id) = channel {
            let report = coordinator.route_channel(channel_id, &cancel).await?;
            self.output_report(&report);
            return Ok(());
        }

        let round = coordinator.route_all(&cancel).await;
        for report in &round.reports {
            self.output_report(report);
        }
        for failure in &round.failures {
            self.output_message(&json!({
                "type": "LOG",
                "log": {
                    "level": "ERROR",
                    "message": failure.to_string()
                }
            }));
        }
        self.output_message(&json!({
            "type": "STATS",
            "stats": round.stats,
        }));
        info!(
            channels = round.stats.channels_routed,
            failed = round.stats.channels_failed,
            duration_ms = round.stats.duration_ms,
            "Routing round finished"
        );

        if round.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "{} channel(s) failed to route",
                round.failures.len()
            )))
        }
    }

    /// Print the gaps of a channel
    async fn gaps(&self, channel: &str) -> Result<()> {
        let store = self.open_store()?;
        let snapshot = store.load_gaps(channel).await?;
        for gap in &snapshot.gaps {
            self.output_message(&json!({
                "type": "GAP",
                "gap": {
                    "channel_id": channel,
                    "start_id": gap.start_id,
                    "end_id": gap.end_id,
                    "create_time": gap.create_time,
                }
            }));
        }
        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!(
                    "Channel '{channel}' has {} gaps at version {}",
                    snapshot.gaps.len(),
                    snapshot.version
                )
            }
        }));
        Ok(())
    }

    /// Print the SQL of the next pass without running it
    async fn plan(&self, channel_id: &str) -> Result<()> {
        let config = self.load_config()?;
        let topology = Topology::from_config(&config)?;
        let channel = topology
            .channel(channel_id)
            .ok_or_else(|| Error::ChannelNotFound {
                channel_id: channel_id.to_string(),
            })?;
        let store = self.open_store()?;

        let snapshot = store.load_gaps(channel_id).await?;
        let last_routed = store.last_routed_data_id(channel_id).await?;
        let mut ledger = GapLedger::new(channel_id, &config.routing);
        ledger.set_transaction_view(config.platform.supports_transaction_view);
        ledger.set_earliest_open_transaction(store.earliest_transaction_start().await?);
        ledger.set_last_busy_expire(snapshot.last_busy_expire);
        ledger.before_routing_pass(snapshot.gaps, last_routed, chrono::Utc::now());

        let planner = RangeQueryPlanner::new(PlannerThresholds::from_config(
            &config.routing,
            &config.platform,
        ));
        let mut plan = planner.plan(channel, &ledger.query_gaps());
        if !topology.router().needs_payload(channel_id) {
            plan = plan.without_payload();
        }

        for (index, query) in plan.queries.iter().enumerate() {
            let rendered = store.render(query)?;
            self.output_message(&json!({
                "type": "QUERY",
                "query": {
                    "index": index,
                    "order": query.order,
                    "sql": rendered.sql,
                    "params": rendered.params,
                }
            }));
        }
        self.output_message(&json!({
            "type": "PLAN",
            "plan": {
                "queries": plan.queries.len(),
                "each_gap_queried": plan.each_gap_queried,
                "memory_sort": plan.memory_sort,
            }
        }));
        Ok(())
    }

    /// Validate the engine definition
    fn validate(&self) -> Result<()> {
        let config = self.load_config()?;

        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!(
                    "Engine '{}' is valid with {} channels, {} nodes and {} routers",
                    config.engine_name,
                    config.channels.len(),
                    config.nodes.len(),
                    config.routers.len()
                )
            }
        }));

        Ok(())
    }

    fn output_report(&self, report: &PassReport) {
        self.output_message(&json!({
            "type": "PASS",
            "pass": report,
        }));
    }

    /// Output one JSON document per line
    fn output_message(&self, msg: &Value) {
        println!("{}", serde_json::to_string(msg).unwrap_or_default());
    }
}

fn parse_object(flag: &str, raw: &str) -> Result<JsonObject> {
    serde_json::from_str(raw)
        .map_err(|e| Error::invalid_value(flag, format!("expected a JSON object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::EventArg;

    #[test]
    fn test_parse_object() {
        let values = parse_object("row-data", r#"{"ID":"1","NAME":null}"#).unwrap();
        assert_eq!(values.len(), 2);
        assert!(parse_object("row-data", "[1,2]").is_err());
        assert!(parse_object("row-data", "not json").is_err());
    }

    #[test]
    fn test_event_arg_maps_to_event_type() {
        assert_eq!(EventType::from(EventArg::Delete), EventType::Delete);
    }
}
