//! Failure scenario tests
//!
//! A failing part must never stop the engine:
//! - Collectors that time out or error are skipped for the tick
//! - Rules on a timed-out collector's metric keep their state
//! - An unavailable store degrades persistence but alerts keep working
//! - A failing notification sink does not roll back alert state
//! - Shutdown during a stuck collection abandons the tick after the grace period

use crate::helpers::*;
use async_trait::async_trait;
use auto_monitor::MetricSample;
use auto_monitor::actors::{PersistOutcome, Scheduler, SchedulerHandle, SchedulerSettings};
use auto_monitor::alerts::{AlertEvent, AlertState};
use auto_monitor::collectors::{CollectionError, Collector};
use auto_monitor::notify::{NotificationSink, SinkError};
use auto_monitor::storage::{
    AlertEventQuery, HealthStatus, MemoryBackend, QueryRange, RetryPolicy, StorageBackend,
    StorageError, StorageResult, StorageStats,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn settings() -> SchedulerSettings {
    let mut settings = SchedulerSettings::new(Duration::from_secs(30));
    settings.retry = RetryPolicy::new(2, Duration::from_millis(50));
    settings
}

/// Store whose writes always fail
#[derive(Default)]
struct UnavailableStore {
    write_attempts: AtomicUsize,
}

#[async_trait]
impl StorageBackend for UnavailableStore {
    async fn insert_batch(&self, _samples: &[MetricSample]) -> StorageResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::ConnectionFailed("database is locked".to_string()))
    }
    async fn query_range(&self, _query: &QueryRange) -> StorageResult<Vec<MetricSample>> {
        Ok(Vec::new())
    }
    async fn cleanup_old_metrics(&self, _before: DateTime<Utc>) -> StorageResult<usize> {
        Err(StorageError::ConnectionFailed("database is locked".to_string()))
    }
    async fn insert_alert_events(&self, _events: &[AlertEvent]) -> StorageResult<()> {
        Err(StorageError::ConnectionFailed("database is locked".to_string()))
    }
    async fn query_alert_events(&self, _query: &AlertEventQuery) -> StorageResult<Vec<AlertEvent>> {
        Ok(Vec::new())
    }
    async fn cleanup_old_alert_events(&self, _before: DateTime<Utc>) -> StorageResult<usize> {
        Ok(0)
    }
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Err(StorageError::UnhealthyBackend("unavailable".to_string()))
    }
    async fn get_stats(&self) -> StorageResult<StorageStats> {
        Ok(StorageStats::default())
    }
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

struct BrokenSink;

#[async_trait]
impl NotificationSink for BrokenSink {
    async fn notify(&self, _event: &AlertEvent) -> Result<(), SinkError> {
        Err(SinkError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
    }
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_collector_is_skipped() {
    let store = Arc::new(MemoryBackend::new());
    let slow = ScriptedCollector::steady("slow", "slow.value", 1.0)
        .with_delay(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(2));
    let fast = ScriptedCollector::steady("system", "cpu.usage_percent", 90.0);

    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(slow), Arc::new(fast)]),
        store.clone(),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    let report = scheduler.run_tick(at(0)).await.unwrap();
    assert_eq!(report.collector_failures, vec!["slow".to_string()]);
    assert_eq!(report.samples, 1);
    assert_eq!(report.events.len(), 1);

    let stored = store
        .query_range(&QueryRange::new("slow.value", at(-3600), Utc::now()))
        .await
        .unwrap();
    assert!(stored.is_empty());
}

/// Reports a fixed CPU value for the first `healthy_calls` collections,
/// then hangs past its timeout
struct StallingCpu {
    healthy_calls: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Collector for StallingCpu {
    fn name(&self) -> &str {
        "system"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }

    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(vec![MetricSample::new("cpu.usage_percent", 95.0, Utc::now(), "system")])
    }
}

#[tokio::test(start_paused = true)]
async fn test_firing_rule_holds_through_collector_timeout() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(StallingCpu {
            healthy_calls: 2,
            calls: AtomicUsize::new(0),
        })]),
        Arc::new(MemoryBackend::new()),
        high_cpu_rules(),
        sink.clone(),
    );

    scheduler.run_tick(at(0)).await.unwrap();
    scheduler.run_tick(at(30)).await.unwrap();
    assert_eq!(
        scheduler.engine().instance("high_cpu").unwrap().state,
        AlertState::Firing
    );
    let before = scheduler.engine().instance("high_cpu").unwrap().clone();

    let report = scheduler.run_tick(at(60)).await.unwrap();
    assert_eq!(report.collector_failures, vec!["system".to_string()]);
    assert_eq!(report.samples, 0);
    assert!(report.events.is_empty());
    assert_eq!(report.skipped_rules, vec!["high_cpu".to_string()]);

    let after = scheduler.engine().instance("high_cpu").unwrap();
    assert_eq!(after.state, AlertState::Firing);
    assert_eq!(*after, before);
    assert_eq!(sink.events().len(), 2);
}

#[tokio::test]
async fn test_failing_collector_counted_per_name() {
    let flaky = ScriptedCollector::new("flaky", "flaky.value", vec![None, Some(1.0), None]);
    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(flaky)]),
        Arc::new(MemoryBackend::new()),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    for i in 0..3 {
        scheduler.run_tick(at(i * 30)).await.unwrap();
    }

    assert_eq!(scheduler.status().ticks_completed, 3);
    assert_eq!(scheduler.status().collector_failures.get("flaky"), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_storage_unavailable_alerts_still_fire() {
    let store = Arc::new(UnavailableStore::default());
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(ScriptedCollector::steady(
            "system",
            "cpu.usage_percent",
            95.0,
        ))]),
        store.clone(),
        high_cpu_rules(),
        sink.clone(),
    );

    for i in 0..3 {
        let report = scheduler.run_tick(at(i * 30)).await.unwrap();
        assert_eq!(report.persisted, PersistOutcome::Failed);
    }

    // One attempt plus two retries per tick
    assert_eq!(store.write_attempts.load(Ordering::SeqCst), 9);
    assert!(scheduler.status().storage_degraded);
    assert_eq!(scheduler.status().samples_written, 0);
    assert_eq!(
        scheduler.engine().instance("high_cpu").unwrap().state,
        AlertState::Firing
    );
    assert_eq!(sink.events().len(), 2);

    // History writes failed too, so nothing counts as recorded
    let status = scheduler.status();
    assert!(status.history_degraded);
    assert_eq!(status.events_recorded, 0);
    let history = store
        .query_alert_events(&AlertEventQuery::new(at(0), at(120)))
        .await
        .unwrap();
    assert_eq!(status.events_recorded, history.len() as u64);

    // Cleanup failures are logged, not fatal
    scheduler.run_cleanup(at(120)).await;
    assert_eq!(scheduler.status().samples_pruned, 0);
}

#[tokio::test]
async fn test_sink_failure_keeps_state_and_history() {
    let store = Arc::new(MemoryBackend::new());
    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(ScriptedCollector::steady(
            "system",
            "cpu.usage_percent",
            95.0,
        ))]),
        store.clone(),
        high_cpu_rules(),
        Arc::new(BrokenSink),
    );

    scheduler.run_tick(at(0)).await.unwrap();
    scheduler.run_tick(at(30)).await.unwrap();

    assert_eq!(
        scheduler.engine().instance("high_cpu").unwrap().state,
        AlertState::Firing
    );
    let history = store
        .query_alert_events(&AlertEventQuery::new(at(0), at(30)))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_stuck_collector_returns_after_grace() {
    let mut settings = settings();
    settings.shutdown_grace = Duration::from_secs(5);
    settings.default_timeout = Duration::from_secs(3600);

    let stuck = ScriptedCollector::steady("stuck", "stuck.value", 1.0)
        .with_delay(Duration::from_secs(600));
    let store = Arc::new(MemoryBackend::new());
    let scheduler = Scheduler::new(
        settings,
        registry(vec![Arc::new(stuck)]),
        store.clone(),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    let handle = SchedulerHandle::spawn(scheduler);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = tokio::time::Instant::now();
    let status = handle.shutdown().await.unwrap();

    assert!(started.elapsed() <= Duration::from_secs(5));
    assert_eq!(status.ticks_completed, 0);
    assert_eq!(store.get_stats().await.unwrap().sample_count, 0);
}
