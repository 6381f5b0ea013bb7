//! Scheduler - the coordinating loop of the engine
//!
//! ## Tick pipeline
//!
//! ```text
//! interval tick ─▶ collectors (concurrent, each with a timeout) ─▶ barrier
//!                                                                    │
//!        ┌───────────────────────────────────────────────────────────┘
//!        ▼
//!   store batch (retried) ─▶ evaluate alert rules ─▶ history log ─▶ sink
//! ```
//!
//! Ticks are serialized: the next tick cannot start before the previous one
//! has been evaluated, so the [`AlertEngine`] is never used concurrently.
//! Retention pruning runs on its own interval inside the same loop and
//! therefore never overlaps a batch write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{EngineStatus, PersistOutcome, SchedulerCommand, TickReport};
use crate::MetricSample;
use crate::alerts::{AlertEngine, AlertEvent, RuleSet};
use crate::collectors::{CollectionError, CollectorRegistry};
use crate::config::ResolvedConfig;
use crate::notify::NotificationSink;
use crate::storage::{RetryPolicy, StorageBackend, with_retries};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Timeout for collectors that do not declare their own
    pub default_timeout: Duration,
    pub shutdown_grace: Duration,
    pub dry_run: bool,
    /// Write samples and alert events to the store
    pub persist: bool,
    pub max_concurrent_collectors: usize,
    pub retry: RetryPolicy,
    pub retention: chrono::Duration,
    pub history_retention: chrono::Duration,
    pub cleanup_interval: Duration,
}

impl SchedulerSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            default_timeout: interval,
            shutdown_grace: Duration::from_secs(10),
            dry_run: false,
            persist: true,
            max_concurrent_collectors: 8,
            retry: RetryPolicy::default(),
            retention: chrono::Duration::days(30),
            history_retention: chrono::Duration::days(90),
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    pub fn from_resolved(config: &ResolvedConfig, persist: bool, dry_run: bool) -> Self {
        Self {
            interval: config.collection_interval,
            default_timeout: config.collection_interval,
            shutdown_grace: config.shutdown_grace,
            dry_run,
            persist,
            max_concurrent_collectors: config.max_concurrent_collectors,
            retry: RetryPolicy::new(config.write_retries, config.retry_backoff),
            retention: config.retention,
            history_retention: config.history_retention,
            cleanup_interval: config.cleanup_interval,
        }
    }
}

/// Valid samples of one tick and the collectors that failed it
struct Collected {
    samples: Vec<MetricSample>,
    failures: Vec<String>,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    registry: CollectorRegistry,
    store: Arc<dyn StorageBackend>,
    engine: AlertEngine,
    sink: Arc<dyn NotificationSink>,
    status: EngineStatus,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        registry: CollectorRegistry,
        store: Arc<dyn StorageBackend>,
        rules: RuleSet,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let engine = AlertEngine::new(rules, settings.interval);
        let status = EngineStatus {
            dry_run: settings.dry_run,
            ..Default::default()
        };

        Self {
            settings,
            registry,
            store,
            engine,
            sink,
            status,
        }
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Swaps the rule set. Only callable between ticks.
    pub fn replace_rules(&mut self, rules: RuleSet) {
        self.engine.replace_rules(rules);
    }

    /// Runs a single tick stamped `now`. Used for single-pass mode.
    pub async fn run_tick(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.tick(now, &mut shutdown_rx).await
    }

    /// Run the scheduler's main loop until shutdown is signalled or the
    /// shutdown sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineStatus {
        info!(
            interval = ?self.settings.interval,
            collectors = ?self.registry.names(),
            rules = self.engine.rules().len(),
            dry_run = self.settings.dry_run,
            "starting scheduler"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // First tick fires immediately, which gives an initial cleanup on startup
        let mut cleanup = time::interval(self.settings.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut commands_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!("shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick(Utc::now(), &mut shutdown).await;
                }

                _ = cleanup.tick() => {
                    self.run_cleanup(Utc::now()).await;
                }

                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut shutdown).await,
                        None => {
                            debug!("command channel closed");
                            commands_open = false;
                        }
                    }
                }
            }
        }

        info!(
            ticks = self.status.ticks_completed,
            samples = self.status.samples_written,
            events = self.status.events_recorded,
            "scheduler stopped"
        );
        self.status
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand, shutdown: &mut watch::Receiver<bool>) {
        match cmd {
            SchedulerCommand::TickNow { respond_to } => {
                debug!("received TickNow command");
                let report = self.tick(Utc::now(), shutdown).await;
                let _ = respond_to.send(report);
            }
            SchedulerCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status.clone());
            }
        }
    }

    #[instrument(skip(self, shutdown), fields(tick = self.status.ticks_completed + 1))]
    async fn tick(
        &mut self,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<TickReport> {
        let Some(collected) = self.collect(shutdown).await else {
            warn!("shutdown grace period expired during collection, tick abandoned");
            return None;
        };

        let persisted = self.persist(&collected.samples).await;

        let evaluation = self.engine.evaluate(&collected.samples, now);
        self.record_events(&evaluation.events).await;

        self.status.ticks_completed += 1;
        self.status.last_tick_at = Some(now);

        info!(
            samples = collected.samples.len(),
            failed_collectors = collected.failures.len(),
            events = evaluation.events.len(),
            skipped_rules = evaluation.skipped.len(),
            "tick complete"
        );

        Some(TickReport {
            timestamp: now,
            samples: collected.samples.len(),
            collector_failures: collected.failures,
            persisted,
            events: evaluation.events,
            skipped_rules: evaluation.skipped,
        })
    }

    /// Runs every collector concurrently and waits for all of them.
    ///
    /// Returns `None` if shutdown was signalled and the collectors did not
    /// finish within the grace period; they are aborted in that case.
    async fn collect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<Collected> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_collectors.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_names = HashMap::new();

        for (index, collector) in self.registry.iter().enumerate() {
            let collector = Arc::clone(collector);
            let semaphore = Arc::clone(&semaphore);
            let limit = collector.timeout().unwrap_or(self.settings.default_timeout);
            let name = collector.name().to_string();

            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match time::timeout(limit, collector.collect()).await {
                        Ok(result) => result,
                        Err(_) => Err(CollectionError::Timeout(limit)),
                    },
                    Err(_) => Err(CollectionError::Failed("collector pool closed".to_string())),
                };
                (index, result)
            });
            task_names.insert(handle.id(), (index, name));
        }

        let mut results = Vec::with_capacity(task_names.len());
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => results.push(result),
                    Some(Err(e)) => {
                        let index = task_names.get(&e.id()).map_or(usize::MAX, |(index, _)| *index);
                        results.push((index, Err(CollectionError::Failed(format!("collector task failed: {e}")))));
                    }
                    None => break,
                },

                _ = shutdown.changed(), if deadline.is_none() => {
                    debug!(grace = ?self.settings.shutdown_grace, "shutdown during collection, waiting for collectors");
                    deadline = Some(Instant::now() + self.settings.shutdown_grace);
                }

                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tasks.abort_all();
                    return None;
                }
            }
        }

        results.sort_by_key(|(index, _)| *index);

        let names: HashMap<usize, String> = task_names.into_values().collect();
        let mut collected = Collected {
            samples: Vec::new(),
            failures: Vec::new(),
        };

        for (index, result) in results {
            let name = names.get(&index).cloned().unwrap_or_else(|| "unknown".to_string());
            match result {
                Ok(samples) => {
                    let (valid, invalid): (Vec<_>, Vec<_>) =
                        samples.into_iter().partition(is_storable);
                    debug!(collector = %name, count = valid.len(), "collector finished");
                    collected.samples.extend(valid);

                    if !invalid.is_empty() {
                        warn!(
                            collector = %name,
                            dropped = invalid.len(),
                            "dropping samples with an empty name or non-finite value"
                        );
                        *self.status.collector_failures.entry(name.clone()).or_default() += 1;
                        collected.failures.push(name);
                    }
                }
                Err(e) => {
                    warn!(collector = %name, "collector failed: {}", e);
                    *self.status.collector_failures.entry(name.clone()).or_default() += 1;
                    collected.failures.push(name);
                }
            }
        }

        Some(collected)
    }

    async fn persist(&mut self, batch: &[MetricSample]) -> PersistOutcome {
        if self.settings.dry_run {
            info!("dry run: would have written {} samples", batch.len());
            return PersistOutcome::DryRun;
        }
        if !self.settings.persist {
            return PersistOutcome::Disabled;
        }

        let store: &dyn StorageBackend = self.store.as_ref();
        let result = with_retries(self.settings.retry, "sample batch write", move || {
            store.insert_batch(batch)
        })
        .await;

        match result {
            Ok(()) => {
                self.status.samples_written += batch.len() as u64;
                if self.status.storage_degraded {
                    info!("storage write succeeded, leaving degraded mode");
                    self.status.storage_degraded = false;
                    self.status.last_storage_error = None;
                }
                PersistOutcome::Written
            }
            Err(e) => {
                error!(
                    "failed to write {} samples, continuing without persistence: {}",
                    batch.len(),
                    e
                );
                self.status.storage_degraded = true;
                self.status.last_storage_error = Some(e.to_string());
                PersistOutcome::Failed
            }
        }
    }

    /// Appends the tick's transitions to the history log and notifies the
    /// sink, one event at a time and in order.
    async fn record_events(&mut self, events: &[AlertEvent]) {
        if events.is_empty() {
            return;
        }

        if self.settings.dry_run {
            for event in events {
                info!(
                    "dry run: alert {} {} -> {} not recorded",
                    event.rule_name, event.from_state, event.to_state
                );
            }
            return;
        }

        if self.settings.persist {
            let store: &dyn StorageBackend = self.store.as_ref();
            let result = with_retries(self.settings.retry, "alert history write", move || {
                store.insert_alert_events(events)
            })
            .await;

            match result {
                Ok(()) => {
                    self.status.events_recorded += events.len() as u64;
                    if self.status.history_degraded {
                        info!("alert history write succeeded, leaving degraded mode");
                        self.status.history_degraded = false;
                    }
                }
                Err(e) => {
                    error!("failed to append {} alert events to history: {}", events.len(), e);
                    self.status.history_degraded = true;
                    self.status.last_storage_error = Some(e.to_string());
                }
            }
        }

        for event in events {
            if let Err(e) = self.sink.notify(event).await {
                warn!(rule = %event.rule_name, "notification failed: {}", e);
            }
        }
    }

    /// Applies the retention policies to samples and alert history.
    pub async fn run_cleanup(&mut self, now: DateTime<Utc>) {
        if self.settings.dry_run || !self.settings.persist {
            return;
        }

        match self.store.prune(self.settings.retention, now).await {
            Ok(removed) => {
                self.status.samples_pruned += removed as u64;
                debug!(removed, "sample retention applied");
            }
            Err(e) => error!("sample retention cleanup failed: {}", e),
        }

        match self
            .store
            .prune_alert_events(self.settings.history_retention, now)
            .await
        {
            Ok(removed) => {
                self.status.events_pruned += removed as u64;
                debug!(removed, "alert history retention applied");
            }
            Err(e) => error!("alert history cleanup failed: {}", e),
        }

        self.status.last_cleanup_at = Some(now);
    }
}

/// A sample the store will accept: named, with a finite value
fn is_storable(sample: &MetricSample) -> bool {
    !sample.metric_name.trim().is_empty() && sample.value.is_finite()
}

/// Handle for controlling a spawned [`Scheduler`]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<EngineStatus>,
}

impl SchedulerHandle {
    /// Spawn the scheduler loop as a tokio task
    pub fn spawn(scheduler: Scheduler) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(scheduler.run(cmd_rx, shutdown_rx));

        Self {
            sender: cmd_tx,
            shutdown_tx,
            task,
        }
    }

    /// Run a tick now and wait for its report
    pub async fn tick_now(&self) -> Result<Option<TickReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive tick report")
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive status")
    }

    /// Stop scheduling ticks and wait for the loop to exit. In-flight
    /// collectors get the configured grace period.
    pub async fn shutdown(self) -> Result<EngineStatus> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.context("scheduler task failed")
    }
}
