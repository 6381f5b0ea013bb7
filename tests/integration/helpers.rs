//! Helper functions for integration tests

use async_trait::async_trait;
use auto_monitor::MetricSample;
use auto_monitor::alerts::{AlertEvent, AlertRule, Condition, MetricSelector, RuleSet, Severity};
use auto_monitor::collectors::{CollectionError, Collector, CollectorRegistry};
use auto_monitor::notify::{NotificationSink, SinkError};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Collector that replays a fixed list of values, one per tick.
/// An exhausted script or a `None` entry is a failed collection.
pub struct ScriptedCollector {
    name: String,
    metric: String,
    values: Mutex<Vec<Option<f64>>>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
}

impl ScriptedCollector {
    pub fn new(name: &str, metric: &str, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.to_string(),
            metric: metric.to_string(),
            values: Mutex::new(values),
            delay: None,
            timeout: None,
        }
    }

    pub fn steady(name: &str, metric: &str, value: f64) -> Self {
        Self::new(name, metric, vec![Some(value); 64])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut values = self.values.lock().unwrap();
            if values.is_empty() { None } else { values.remove(0) }
        };

        match next {
            Some(value) => Ok(vec![MetricSample::new(
                self.metric.clone(),
                value,
                Utc::now(),
                self.name.clone(),
            )]),
            None => Err(CollectionError::Failed(format!("{} has no value", self.name))),
        }
    }
}

/// Sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<AlertEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn rule(name: &str, metric: &str, condition: Condition, threshold: f64, duration_secs: i64) -> AlertRule {
    AlertRule {
        name: name.to_string(),
        description: String::new(),
        selector: metric.parse::<MetricSelector>().unwrap(),
        condition,
        threshold,
        duration: chrono::Duration::seconds(duration_secs),
        severity: Severity::Warning,
    }
}

pub fn high_cpu_rules() -> RuleSet {
    RuleSet::new(vec![rule("high_cpu", "cpu.usage_percent", Condition::GreaterThan, 80.0, 60)]).unwrap()
}

pub fn registry(collectors: Vec<Arc<dyn Collector>>) -> CollectorRegistry {
    let mut registry = CollectorRegistry::new();
    for collector in collectors {
        registry.register(collector).unwrap();
    }
    registry
}
