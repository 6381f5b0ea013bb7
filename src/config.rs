use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::alerts::{RuleConfigError, RuleSet};
use crate::util;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("service '{name}': {reason}")]
    InvalidService { name: String, reason: String },

    #[error("storage backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),

    #[error(transparent)]
    Rules(#[from] RuleConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Seconds between ticks
    #[serde(default = "default_collection_interval")]
    pub collection_interval: u64,

    #[serde(default)]
    pub collectors: CollectorsConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// How long in-flight collectors may keep running after shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_max_concurrent_collectors")]
    pub max_concurrent_collectors: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection_interval: default_collection_interval(),
            collectors: CollectorsConfig::default(),
            alerts: AlertsConfig::default(),
            storage: StorageConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_concurrent_collectors: default_max_concurrent_collectors(),
        }
    }
}

fn default_collection_interval() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_max_concurrent_collectors() -> usize {
    8
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default)]
    pub system: SystemCollectorConfig,

    #[serde(default)]
    pub service: ServiceCollectorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds; falls back to the collection interval
    pub timeout: Option<u64>,
}

impl Default for SystemCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: None,
        }
    }
}

impl SystemCollectorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_service_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub services: Vec<ServiceEndpoint>,
}

impl Default for ServiceCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: default_service_timeout(),
            services: Vec::new(),
        }
    }
}

impl ServiceCollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_service_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub health_url: String,
    pub metrics_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub rules: Vec<AlertRuleConfig>,

    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,

    pub webhook_url: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
            history_retention_days: default_history_retention_days(),
            webhook_url: None,
        }
    }
}

fn default_history_retention_days() -> u32 {
    90
}

/// Raw rule as written in the configuration file; validated by
/// [`AlertRule::from_config`](crate::alerts::AlertRule::from_config).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertRuleConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Metric selector, e.g. `cpu.usage_percent` or `service.healthy{service="api"}`
    #[serde(alias = "metric_selector")]
    pub metric: String,

    pub condition: String,

    pub threshold: f64,

    /// Seconds the condition must hold before the alert fires
    pub duration: i64,

    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "warning".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// In-memory storage (no persistence)
    Memory,

    /// SQLite database file
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    /// Samples older than this are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub deduplicate: bool,

    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StorageBackendKind::default(),
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            deduplicate: false,
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./auto-monitor.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Applies `AUTO_MONITOR_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(interval) = util::get_interval_override() {
            debug!("collection interval overridden from environment: {interval}s");
            self.collection_interval = interval;
        }
        if let Some(path) = util::get_database_path_override() {
            debug!("database path overridden from environment: {}", path.display());
            self.storage.path = path;
        }
        if let Some(days) = util::get_retention_days_override() {
            debug!("retention overridden from environment: {days} days");
            self.storage.retention_days = days;
        }
    }

    /// Checks every value and compiles the rule set. Any error here is
    /// fatal at startup.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        if self.collection_interval == 0 {
            return Err(ConfigError::NotPositive {
                field: "collection_interval",
            });
        }
        if self.max_concurrent_collectors == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_concurrent_collectors",
            });
        }
        if self.collectors.system.timeout == Some(0) {
            return Err(ConfigError::NotPositive {
                field: "collectors.system.timeout",
            });
        }
        if self.collectors.service.enabled && self.collectors.service.timeout == 0 {
            return Err(ConfigError::NotPositive {
                field: "collectors.service.timeout",
            });
        }
        if self.storage.enabled && self.storage.cleanup_interval_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "storage.cleanup_interval_secs",
            });
        }

        let mut names = std::collections::HashSet::new();
        for service in &self.collectors.service.services {
            if service.name.trim().is_empty() {
                return Err(ConfigError::InvalidService {
                    name: service.name.clone(),
                    reason: "name must not be empty".to_string(),
                });
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::InvalidService {
                    name: service.name.clone(),
                    reason: "duplicate service name".to_string(),
                });
            }
            if !service.health_url.starts_with("http://")
                && !service.health_url.starts_with("https://")
            {
                return Err(ConfigError::InvalidService {
                    name: service.name.clone(),
                    reason: format!("health_url '{}' is not an HTTP URL", service.health_url),
                });
            }
        }

        #[cfg(not(feature = "storage-sqlite"))]
        if self.storage.enabled && self.storage.backend == StorageBackendKind::Sqlite {
            return Err(ConfigError::BackendUnavailable("sqlite"));
        }

        let rules = if self.alerts.enabled {
            RuleSet::from_config(&self.alerts.rules)?
        } else {
            RuleSet::default()
        };

        Ok(ResolvedConfig {
            collection_interval: Duration::from_secs(self.collection_interval),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            max_concurrent_collectors: self.max_concurrent_collectors,
            retention: days(self.storage.retention_days),
            history_retention: days(self.alerts.history_retention_days),
            cleanup_interval: Duration::from_secs(self.storage.cleanup_interval_secs),
            write_retries: self.storage.write_retries,
            retry_backoff: Duration::from_millis(self.storage.retry_backoff_ms),
            rules,
        })
    }
}

fn days(days: u32) -> chrono::Duration {
    chrono::Duration::days(i64::from(days))
}

/// Validated, typed view of [`Config`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub collection_interval: Duration,
    pub shutdown_grace: Duration,
    pub max_concurrent_collectors: usize,
    pub retention: chrono::Duration,
    pub history_retention: chrono::Duration,
    pub cleanup_interval: Duration,
    pub write_retries: u32,
    pub retry_backoff: Duration,
    pub rules: RuleSet,
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&file_content)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
        .inspect(|config| trace!("loaded config: {config:?}"))
}
