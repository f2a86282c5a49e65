//! YAML parser for engine definitions
//!
//! Parses and validates engine YAML files.

use crate::config::{EngineConfig, RouterKind};
use crate::error::{Error, Result};
use crate::route::ColumnMatchRouter;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Load an engine definition from a file path
///
/// # Examples
///
/// ```ignore
/// let config = load_config("./engine.yaml")?;
/// println!("{} channels", config.channels.len());
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read engine file '{}': {}",
            path.display(),
            e
        ))
    })?;
    load_config_from_str(&content)
}

/// Load an engine definition from a YAML string
pub fn load_config_from_str(yaml: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse engine YAML: {e}")))?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate an engine definition
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.engine_name.is_empty() {
        return Err(Error::config("Engine name cannot be empty"));
    }

    if config.node_id.is_empty() {
        return Err(Error::missing_field("node_id"));
    }

    let routing = &config.routing;
    if routing.largest_gap_size < 2 {
        return Err(Error::invalid_value(
            "routing.largest_gap_size",
            "must be at least 2",
        ));
    }
    if routing.data_id_increment_by <= 0 {
        return Err(Error::invalid_value(
            "routing.data_id_increment_by",
            "must be positive",
        ));
    }
    if routing.max_gaps_to_qualify_in_sql == 0 {
        return Err(Error::invalid_value(
            "routing.max_gaps_to_qualify_in_sql",
            "must be at least 1",
        ));
    }
    if routing.peek_ahead_window == 0 {
        return Err(Error::invalid_value(
            "routing.peek_ahead_window",
            "must be at least 1",
        ));
    }

    let channel_ids: HashSet<_> = config.channels.iter().map(|c| &c.channel_id).collect();
    if channel_ids.len() != config.channels.len() {
        return Err(Error::config("Duplicate channel ids found"));
    }

    for channel in &config.channels {
        if channel.channel_id.is_empty() {
            return Err(Error::config("Channel id cannot be empty"));
        }
        if channel.max_batch_size == 0 {
            return Err(Error::invalid_value(
                format!("channels.{}.max_batch_size", channel.channel_id),
                "must be at least 1",
            ));
        }
        if channel.max_data_to_route == 0 {
            return Err(Error::invalid_value(
                format!("channels.{}.max_data_to_route", channel.channel_id),
                "must be at least 1",
            ));
        }
    }

    let node_ids: HashSet<_> = config.nodes.iter().map(|n| &n.node_id).collect();
    if node_ids.len() != config.nodes.len() {
        return Err(Error::config("Duplicate node ids found"));
    }

    let router_ids: HashSet<_> = config.routers.iter().map(|r| &r.router_id).collect();
    if router_ids.len() != config.routers.len() {
        return Err(Error::config("Duplicate router ids found"));
    }

    for router in &config.routers {
        if !channel_ids.contains(&router.channel) {
            return Err(Error::config(format!(
                "Router '{}' references unknown channel '{}'",
                router.router_id, router.channel
            )));
        }
        if let RouterKind::Column { expression } = &router.kind {
            ColumnMatchRouter::parse(expression)?;
        }
    }

    Ok(())
}
