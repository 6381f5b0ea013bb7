//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Ticks persist samples and alert history to SQLite
//! - Data survives reopening the database
//! - Retention cleanup removes old samples and events independently
//! - The engine can be built from a configuration file

use crate::helpers::*;
use auto_monitor::actors::{PersistOutcome, Scheduler, SchedulerSettings};
use auto_monitor::alerts::AlertState;
use auto_monitor::app::{self, RunMode};
use auto_monitor::config::read_config_file;
use auto_monitor::storage::sqlite::SqliteBackend;
use auto_monitor::storage::{AlertEventQuery, QueryRange, StorageBackend};
use chrono::{Duration, Utc};
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_full_persistence_pipeline() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("metrics.db");

    let store = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let cpu = ScriptedCollector::new(
        "system",
        "cpu.usage_percent",
        vec![Some(85.0), Some(90.0), Some(20.0)],
    );
    let mut scheduler = Scheduler::new(
        SchedulerSettings::new(std::time::Duration::from_secs(30)),
        registry(vec![Arc::new(cpu)]),
        store.clone(),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    for i in 0..3 {
        let report = scheduler.run_tick(at(i * 30)).await.unwrap();
        assert_eq!(report.persisted, PersistOutcome::Written);
    }
    store.close().await.unwrap();

    // Reopen and read back
    let reopened = SqliteBackend::new(&db_path).await.unwrap();
    let samples = reopened
        .query_range(&QueryRange::new("cpu.usage_percent", at(-60), Utc::now()))
        .await
        .unwrap();
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![85.0, 90.0, 20.0]);

    let history = reopened
        .query_alert_events(&AlertEventQuery::new(at(0), at(60)).for_rule("high_cpu"))
        .await
        .unwrap();
    let states: Vec<AlertState> = history.iter().map(|e| e.to_state).collect();
    assert_eq!(
        states,
        vec![AlertState::Pending, AlertState::Firing, AlertState::Resolved]
    );
}

#[tokio::test]
async fn test_retention_prunes_samples_and_history_independently() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteBackend::new(temp_dir.path().join("metrics.db"))
            .await
            .unwrap(),
    );

    let now = Utc::now();
    let old = now - Duration::days(40);
    let cpu = ScriptedCollector::new("system", "cpu.usage_percent", vec![Some(95.0)]);
    let mut scheduler = Scheduler::new(
        SchedulerSettings::new(std::time::Duration::from_secs(30)),
        registry(vec![Arc::new(cpu)]),
        store.clone(),
        high_cpu_rules(),
        Arc::new(RecordingSink::default()),
    );

    // Event stamped 40 days ago, sample stamped now
    scheduler.run_tick(old).await.unwrap();

    // Old sample directly
    store
        .insert_batch(&[auto_monitor::MetricSample::new(
            "cpu.usage_percent",
            50.0,
            old,
            "system",
        )])
        .await
        .unwrap();

    scheduler.run_cleanup(now).await;

    let status = scheduler.status();
    assert_eq!(status.samples_pruned, 1);
    // 90 day history retention keeps the 40 day old event
    assert_eq!(status.events_pruned, 0);

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.sample_count, 1);
    assert_eq!(stats.event_count, 1);

    // Running cleanup again removes nothing
    scheduler.run_cleanup(now).await;
    assert_eq!(scheduler.status().samples_pruned, 1);
}

#[tokio::test]
async fn test_single_pass_from_config_file() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("engine.db");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "collection_interval": 10,
            "collectors": {{ "system": {{ "enabled": false }} }},
            "storage": {{ "path": {:?}, "retention_days": 7 }},
            "alerts": {{
                "rules": [
                    {{ "name": "busy", "metric": "cpu.usage_percent", "condition": ">", "threshold": 90, "duration": 60 }}
                ]
            }}
        }}"#,
        db_path.display().to_string()
    )
    .unwrap();

    let config = read_config_file(file.path()).unwrap();
    let status = app::run(config, RunMode::default()).await.unwrap();

    assert_eq!(status.ticks_completed, 1);
    assert!(!status.storage_degraded);
    assert!(db_path.exists());
}
