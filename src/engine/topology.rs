//! Topology snapshot
//!
//! Channels, nodes and compiled routers are read through an immutable
//! snapshot. A stale snapshot is rebuilt from its loader and swapped in
//! whole; readers keep whatever `Arc` they already hold.

use crate::config::{Channel, EngineConfig};
use crate::error::Result;
use crate::loader::load_config;
use crate::route::Router;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Source of the engine definition a snapshot is built from
pub type TopologyLoader = Arc<dyn Fn() -> Result<EngineConfig> + Send + Sync>;

/// Read-only view of the routing topology
#[derive(Debug)]
pub struct Topology {
    channels: Vec<Channel>,
    router: Router,
    loaded_at: Instant,
}

impl Topology {
    /// Build a snapshot from an engine definition
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            channels: config.channels.clone(),
            router: Router::from_config(config)?,
            loaded_at: Instant::now(),
        })
    }

    /// Look up a channel
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// All channels
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Compiled routers
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Age of the snapshot
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }
}

/// Holds the current topology and refreshes it on a TTL
pub struct TopologyCache {
    current: RwLock<Arc<Topology>>,
    ttl: Duration,
    loader: Option<TopologyLoader>,
}

impl std::fmt::Debug for TopologyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyCache")
            .field("ttl", &self.ttl)
            .field("reloadable", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl TopologyCache {
    /// Cache that never reloads
    pub fn fixed(topology: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(topology)),
            ttl: Duration::MAX,
            loader: None,
        }
    }

    /// Cache that rebuilds from `loader` once the snapshot is older than `ttl`
    pub fn reloading(loader: TopologyLoader, ttl: Duration) -> Result<Self> {
        let topology = Topology::from_config(&loader()?)?;
        Ok(Self {
            current: RwLock::new(Arc::new(topology)),
            ttl,
            loader: Some(loader),
        })
    }

    /// Cache that reloads a YAML engine definition
    pub fn from_file(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let path = path.into();
        Self::reloading(Arc::new(move || load_config(&path)), ttl)
    }

    /// Current snapshot, refreshed first if it has expired
    ///
    /// A failed refresh keeps serving the previous snapshot.
    pub fn snapshot(&self) -> Arc<Topology> {
        let current = self.peek();
        if self.loader.is_none() || current.age() < self.ttl {
            return current;
        }
        match self.refresh() {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "Failed to refresh routing topology, keeping previous snapshot");
                current
            }
        }
    }

    /// Current snapshot without checking its age
    pub fn peek(&self) -> Arc<Topology> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rebuild the snapshot now
    pub fn refresh(&self) -> Result<Arc<Topology>> {
        let Some(loader) = &self.loader else {
            return Ok(self.peek());
        };
        let fresh = Arc::new(Topology::from_config(&loader()?)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        debug!(
            channels = fresh.channels().len(),
            routers = fresh.router().router_count(),
            "Refreshed routing topology"
        );
        Ok(fresh)
    }
}
