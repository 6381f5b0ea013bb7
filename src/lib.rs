pub mod actors;
pub mod alerts;
pub mod app;
pub mod collectors;
pub mod config;
pub mod notify;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tags attached to a sample. Ordered so that the persisted encoding is stable.
pub type Tags = BTreeMap<String, String>;

/// A single observation produced by a collector.
///
/// Samples are never mutated after a collector hands them out; the store only
/// ever appends them or drops them during retention pruning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
    pub source_collector: String,
}

impl MetricSample {
    pub fn new(
        metric_name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
        source_collector: impl Into<String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            timestamp,
            value,
            tags: Tags::new(),
            source_collector: source_collector.into(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// True if every `(key, value)` pair of `filter` is present on this sample.
    pub fn has_tags(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}
