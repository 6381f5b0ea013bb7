//! Service health collection through the full pipeline

use crate::helpers::*;
use auto_monitor::actors::{Scheduler, SchedulerSettings};
use auto_monitor::alerts::{AlertState, Condition, RuleSet};
use auto_monitor::collectors::ServiceCollector;
use auto_monitor::config::ServiceEndpoint;
use auto_monitor::storage::{MemoryBackend, QueryRange, StorageBackend};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(name: &str, server: &MockServer, metrics: bool) -> ServiceEndpoint {
    ServiceEndpoint {
        name: name.to_string(),
        health_url: format!("{}/{name}/health", server.uri()),
        metrics_url: metrics.then(|| format!("{}/{name}/metrics", server.uri())),
    }
}

#[tokio::test]
async fn test_service_down_fires_alert() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let collector = ServiceCollector::new(
        vec![endpoint("web", &server, false), endpoint("api", &server, false)],
        Duration::from_secs(2),
    )
    .unwrap();

    let rules = RuleSet::new(vec![rule(
        "api_down",
        r#"service.healthy{service="api"}"#,
        Condition::LessThan,
        1.0,
        60,
    )])
    .unwrap();

    let store = Arc::new(MemoryBackend::new());
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = Scheduler::new(
        SchedulerSettings::new(Duration::from_secs(30)),
        registry(vec![Arc::new(collector)]),
        store.clone(),
        rules,
        sink.clone(),
    );

    for i in 0..2 {
        scheduler.run_tick(at(i * 30)).await.unwrap();
    }

    assert_eq!(
        scheduler.engine().instance("api_down").unwrap().state,
        AlertState::Firing
    );

    let web = store
        .query_range(
            &QueryRange::new("service.healthy", at(-60), Utc::now()).with_tag("service", "web"),
        )
        .await
        .unwrap();
    assert_eq!(web.len(), 2);
    assert!(web.iter().all(|s| s.value == 1.0));
}

#[tokio::test]
async fn test_service_metrics_fields_are_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "depth": 42,
            "consumers": 3,
            "name": "jobs"
        })))
        .mount(&server)
        .await;

    let collector =
        ServiceCollector::new(vec![endpoint("queue", &server, true)], Duration::from_secs(2))
            .unwrap();

    let store = Arc::new(MemoryBackend::new());
    let mut scheduler = Scheduler::new(
        SchedulerSettings::new(Duration::from_secs(30)),
        registry(vec![Arc::new(collector)]),
        store.clone(),
        RuleSet::default(),
        Arc::new(RecordingSink::default()),
    );

    let report = scheduler.run_tick(at(0)).await.unwrap();
    // healthy, response time, depth, consumers
    assert_eq!(report.samples, 4);

    let depth = store
        .query_range(&QueryRange::new("service.depth", at(-60), Utc::now()))
        .await
        .unwrap();
    assert_eq!(depth.len(), 1);
    assert_eq!(depth[0].value, 42.0);
    assert_eq!(depth[0].tags.get("service").map(String::as_str), Some("queue"));
}
