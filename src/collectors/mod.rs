//! Metric collectors and the collector registry
//!
//! A collector produces a batch of [`MetricSample`]s per tick. Collectors
//! never enforce their own timeout; the scheduler bounds every call, so a
//! hung collector only ever costs its own samples for that tick.

pub mod service;
pub mod system;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::MetricSample;
use crate::config::CollectorsConfig;

pub use service::{SERVICE_COLLECTOR, ServiceCollector};
pub use system::SystemCollector;

/// Transient failure of a single collector during a single tick
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("collector timed out after {0:?}")]
    Timeout(Duration),

    #[error("collection failed: {0}")]
    Failed(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a collector named '{name}' is already registered")]
pub struct DuplicateCollectorError {
    pub name: String,
}

/// Failure to assemble a [`CollectorRegistry`]
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateCollectorError),

    #[error("failed to build collector '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: CollectionError,
    },
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Unique identifier, also used to order samples within a tick's batch
    fn name(&self) -> &str;

    /// Per-collector timeout. `None` falls back to the scheduler default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError>;
}

/// Collectors keyed by name, iterated in name order
#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry for the enabled collectors in `config`.
    pub fn from_config(config: &CollectorsConfig) -> Result<Self, RegistryError> {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

        if config.system.enabled {
            collectors.push(Arc::new(SystemCollector::new(config.system.timeout())));
        }

        if config.service.enabled && !config.service.services.is_empty() {
            let collector = ServiceCollector::new(
                config.service.services.clone(),
                config.service.timeout(),
            )
            .map_err(|source| RegistryError::Build {
                name: SERVICE_COLLECTOR.to_string(),
                source,
            })?;
            collectors.push(Arc::new(collector));
        }

        let registry = Self::with_collectors(collectors)?;
        info!(collectors = ?registry.names(), "collector registry built");
        Ok(registry)
    }

    /// Registers every collector, failing on the first duplicate name.
    pub fn with_collectors(
        collectors: impl IntoIterator<Item = Arc<dyn Collector>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for collector in collectors {
            registry.register(collector)?;
        }
        Ok(registry)
    }

    /// Adds a collector. A duplicate name fails and leaves the registry as it was.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), DuplicateCollectorError> {
        let name = collector.name().to_string();
        if self.collectors.contains_key(&name) {
            return Err(DuplicateCollectorError { name });
        }
        self.collectors.insert(name, collector);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.collectors.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.names())
            .finish()
    }
}
