//! Engine registry
//!
//! Maps engine names to coordinators for processes hosting several
//! replication engines. Owned by the caller and passed by reference.

use super::coordinator::RoutingCoordinator;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named routing engines
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<RoutingCoordinator>>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its name
    pub fn register(&mut self, engine: Arc<RoutingCoordinator>) -> Result<()> {
        let name = engine.engine_name().to_string();
        if self.engines.contains_key(&name) {
            return Err(Error::config(format!("Engine '{name}' is already registered")));
        }
        self.engines.insert(name, engine);
        Ok(())
    }

    /// Look up an engine
    pub fn get(&self, name: &str) -> Result<Arc<RoutingCoordinator>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EngineNotFound {
                engine: name.to_string(),
            })
    }

    /// Remove an engine
    pub fn remove(&mut self, name: &str) -> Option<Arc<RoutingCoordinator>> {
        self.engines.remove(name)
    }

    /// Registered names in order
    pub fn names(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    /// Number of engines
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether no engine is registered
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
