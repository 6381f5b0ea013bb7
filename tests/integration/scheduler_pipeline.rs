//! End-to-end tick pipeline: collect, persist, evaluate, record

use crate::helpers::*;
use auto_monitor::MetricSample;
use auto_monitor::actors::{PersistOutcome, Scheduler, SchedulerHandle, SchedulerSettings};
use auto_monitor::alerts::{AlertState, Condition, RuleSet};
use auto_monitor::collectors::{CollectionError, Collector};
use auto_monitor::storage::{AlertEventQuery, MemoryBackend, QueryRange, StorageBackend};
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> SchedulerSettings {
    SchedulerSettings::new(Duration::from_secs(30))
}

#[tokio::test]
async fn test_high_cpu_lifecycle_recorded_in_history() {
    let store = Arc::new(MemoryBackend::new());
    let sink = Arc::new(RecordingSink::default());
    let cpu = ScriptedCollector::new(
        "system",
        "cpu.usage_percent",
        vec![Some(75.0), Some(85.0), Some(90.0), Some(60.0), Some(10.0)],
    );

    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(cpu)]),
        store.clone(),
        high_cpu_rules(),
        sink.clone(),
    );

    for i in 0..5 {
        let report = scheduler.run_tick(at(i * 30)).await.unwrap();
        assert_eq!(report.persisted, PersistOutcome::Written);
        assert_eq!(report.samples, 1);
    }

    let transitions: Vec<(AlertState, AlertState)> = sink
        .events()
        .iter()
        .map(|e| (e.from_state, e.to_state))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (AlertState::Ok, AlertState::Pending),
            (AlertState::Pending, AlertState::Firing),
            (AlertState::Firing, AlertState::Resolved),
            (AlertState::Resolved, AlertState::Ok),
        ]
    );

    let history = store
        .query_alert_events(&AlertEventQuery::new(at(0), at(120)).for_rule("high_cpu"))
        .await
        .unwrap();
    assert_eq!(history, sink.events());
    assert_eq!(history[1].timestamp, at(60));
    assert_eq!(history[1].triggering_value, 90.0);

    let samples = store
        .query_range(&QueryRange::new("cpu.usage_percent", at(-60), Utc::now()))
        .await
        .unwrap();
    assert_eq!(samples.len(), 5);
}

#[tokio::test]
async fn test_oscillation_never_fires() {
    let sink = Arc::new(RecordingSink::default());
    let values = [85.0, 70.0, 85.0, 70.0, 85.0, 70.0].map(Some).to_vec();

    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(ScriptedCollector::new("system", "cpu.usage_percent", values))]),
        Arc::new(MemoryBackend::new()),
        high_cpu_rules(),
        sink.clone(),
    );

    for i in 0..6 {
        scheduler.run_tick(at(i * 30)).await.unwrap();
    }

    assert!(sink.events().iter().all(|e| e.to_state != AlertState::Firing));
    assert_eq!(sink.events().len(), 6);
}

struct TaggedHealth;

#[async_trait]
impl Collector for TaggedHealth {
    fn name(&self) -> &str {
        "service"
    }

    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError> {
        let now = Utc::now();
        Ok(vec![
            MetricSample::new("service.healthy", 1.0, now, "service").with_tag("service", "web"),
            MetricSample::new("service.healthy", 0.0, now, "service").with_tag("service", "api"),
        ])
    }
}

#[tokio::test]
async fn test_selector_tags_pick_the_right_series() {
    let sink = Arc::new(RecordingSink::default());
    let rules = RuleSet::new(vec![
        rule("api_down", r#"service.healthy{service="api"}"#, Condition::Equal, 0.0, 30),
        rule("web_down", r#"service.healthy{service="web"}"#, Condition::Equal, 0.0, 30),
    ])
    .unwrap();

    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(TaggedHealth)]),
        Arc::new(MemoryBackend::new()),
        rules,
        sink.clone(),
    );

    scheduler.run_tick(at(0)).await.unwrap();
    assert_eq!(
        scheduler.engine().instance("api_down").unwrap().state,
        AlertState::Pending
    );

    scheduler.run_tick(at(30)).await.unwrap();
    assert_eq!(
        scheduler.engine().instance("api_down").unwrap().state,
        AlertState::Firing
    );
    assert_eq!(
        scheduler.engine().instance("web_down").unwrap().state,
        AlertState::Ok
    );
    assert!(sink.events().iter().all(|e| e.rule_name == "api_down"));
}

#[tokio::test]
async fn test_rule_without_samples_is_skipped() {
    let sink = Arc::new(RecordingSink::default());
    let rules = RuleSet::new(vec![rule(
        "disk_low",
        "disk.free_bytes",
        Condition::LessThan,
        1e9,
        60,
    )])
    .unwrap();

    let mut scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(ScriptedCollector::steady("system", "cpu.usage_percent", 5.0))]),
        Arc::new(MemoryBackend::new()),
        rules,
        sink.clone(),
    );

    let report = scheduler.run_tick(at(0)).await.unwrap();
    assert_eq!(report.skipped_rules, vec!["disk_low".to_string()]);
    assert!(sink.events().is_empty());
    assert_eq!(
        scheduler.engine().instance("disk_low").unwrap().last_evaluated_at,
        None
    );
}

#[tokio::test(start_paused = true)]
async fn test_daemon_ticks_on_interval() {
    let scheduler = Scheduler::new(
        settings(),
        registry(vec![Arc::new(ScriptedCollector::steady("system", "cpu.usage_percent", 5.0))]),
        Arc::new(MemoryBackend::new()),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    let handle = SchedulerHandle::spawn(scheduler);
    tokio::time::sleep(Duration::from_secs(95)).await;

    let status = handle.shutdown().await.unwrap();
    assert_eq!(status.ticks_completed, 4);
    assert_eq!(status.samples_written, 4);
    assert!(status.last_cleanup_at.is_some());
}
