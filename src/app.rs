//! Wiring from configuration to a running engine

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::actors::{EngineStatus, Scheduler, SchedulerHandle, SchedulerSettings};
use crate::collectors::CollectorRegistry;
use crate::config::{AlertsConfig, Config, StorageBackendKind, StorageConfig};
use crate::notify::{LogSink, MultiSink, NotificationSink, WebhookSink};
use crate::storage::{MemoryBackend, StorageBackend};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub verbose: bool,
    /// Collect and evaluate without writing anything
    pub dry_run: bool,
    /// Keep ticking until a shutdown signal arrives
    pub daemon: bool,
}

/// Opens the configured store. A disabled store is replaced by an empty
/// in-memory one that the scheduler never writes to.
pub async fn build_store(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    if !config.enabled {
        debug!("storage disabled");
        return Ok(Arc::new(MemoryBackend::new()));
    }

    match config.backend {
        StorageBackendKind::Memory => {
            Ok(Arc::new(MemoryBackend::new().with_deduplication(config.deduplicate)))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageBackendKind::Sqlite => {
            let backend = crate::storage::sqlite::SqliteBackend::new(&config.path)
                .await
                .with_context(|| format!("failed to open database {}", config.path.display()))?
                .with_deduplication(config.deduplicate);
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageBackendKind::Sqlite => Err(crate::config::ConfigError::BackendUnavailable("sqlite").into()),
    }
}

pub fn build_sink(config: &AlertsConfig) -> Arc<dyn NotificationSink> {
    match &config.webhook_url {
        Some(url) => {
            debug!("webhook notifications enabled");
            Arc::new(MultiSink::new().with(LogSink).with(WebhookSink::new(url.clone())))
        }
        None => Arc::new(LogSink),
    }
}

/// Validates the configuration and builds a scheduler together with the
/// store it writes to.
pub async fn build_scheduler(
    config: &Config,
    dry_run: bool,
) -> Result<(Scheduler, Arc<dyn StorageBackend>)> {
    let resolved = config.resolve().context("invalid configuration")?;
    let registry =
        CollectorRegistry::from_config(&config.collectors).context("failed to build collectors")?;
    if registry.is_empty() {
        warn!("no collectors enabled, every tick will be empty");
    }

    let store = build_store(&config.storage).await?;
    let sink = build_sink(&config.alerts);
    let settings = SchedulerSettings::from_resolved(&resolved, config.storage.enabled, dry_run);

    let scheduler = Scheduler::new(
        settings,
        registry,
        Arc::clone(&store),
        resolved.rules,
        sink,
    );

    Ok((scheduler, store))
}

/// Runs the engine once or as a daemon and returns the final status.
pub async fn run(config: Config, mode: RunMode) -> Result<EngineStatus> {
    let (mut scheduler, store) = build_scheduler(&config, mode.dry_run).await?;

    let status = if mode.daemon {
        let handle = SchedulerHandle::spawn(scheduler);
        shutdown_signal().await;
        info!("shutdown signal received, stopping scheduler");
        handle.shutdown().await?
    } else {
        let now = Utc::now();
        match scheduler.run_tick(now).await {
            Some(report) => info!(
                samples = report.samples,
                events = report.events.len(),
                persisted = ?report.persisted,
                "single pass complete"
            ),
            None => warn!("single pass produced no report"),
        }
        scheduler.run_cleanup(now).await;
        scheduler.status().clone()
    };

    if let Err(e) = store.close().await {
        warn!("failed to close store: {}", e);
    }

    Ok(status)
}

/// Resolves on Ctrl+C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
