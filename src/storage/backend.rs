//! Storage backend trait definition
//!
//! Every backend stores two append-only series: metric samples and alert
//! events. Both share the same contract shape: batch write, inclusive range
//! query and retention pruning.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::error::StorageResult;
use crate::alerts::AlertEvent;
use crate::{MetricSample, Tags};

/// Query parameters for fetching samples within a time range
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRange {
    pub metric_name: String,

    /// Samples must carry all of these tags. Applied after the index scan.
    pub tags: Tags,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

impl QueryRange {
    pub fn new(metric_name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            metric_name: metric_name.into(),
            tags: Tags::new(),
            start,
            end,
            limit: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn is_empty_range(&self) -> bool {
        self.start > self.end || self.limit == Some(0)
    }
}

/// Query parameters for the alert history log
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEventQuery {
    /// Restrict to one rule; `None` returns events for every rule
    pub rule_name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AlertEventQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            rule_name: None,
            start,
            end,
        }
    }

    pub fn for_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_name = Some(rule_name.into());
        self
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Row counts and time bounds of a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageStats {
    pub backend: String,
    pub sample_count: u64,
    pub metric_names: u64,
    pub oldest_sample: Option<DateTime<Utc>>,
    pub newest_sample: Option<DateTime<Utc>>,
    pub event_count: u64,
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} samples across {} metrics, {} alert events",
            self.backend, self.sample_count, self.metric_names, self.event_count
        )?;
        if let (Some(oldest), Some(newest)) = (self.oldest_sample, self.newest_sample) {
            write!(f, " ({} .. {})", oldest.to_rfc3339(), newest.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Cutoff for a retention window. Saturates instead of overflowing.
pub fn retention_cutoff(retention: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Trait for the time-series store and alert history log
///
/// ## Consistency
///
/// Writes are serialized by the implementation. A batch is applied whole or
/// not at all, and readers never observe a partially written batch.
///
/// ## Ordering
///
/// Range queries return rows ascending by timestamp. Rows with equal
/// timestamps keep their insertion order.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append a batch of samples.
    ///
    /// Samples with an empty metric name or a NaN value reject the whole
    /// batch with [`StorageError::InvalidSample`](super::StorageError::InvalidSample).
    async fn insert_batch(&self, samples: &[MetricSample]) -> StorageResult<()>;

    /// Samples for one metric within `[start, end]`, oldest first
    async fn query_range(&self, query: &QueryRange) -> StorageResult<Vec<MetricSample>>;

    /// Delete samples with `timestamp < before`.
    ///
    /// Returns the number of samples deleted.
    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Remove every sample older than `now - retention`
    async fn prune(&self, retention: Duration, now: DateTime<Utc>) -> StorageResult<usize> {
        self.cleanup_old_metrics(retention_cutoff(retention, now))
            .await
    }

    /// Append alert events to the history log
    async fn insert_alert_events(&self, events: &[AlertEvent]) -> StorageResult<()>;

    /// Alert events within `[start, end]`, oldest first
    async fn query_alert_events(&self, query: &AlertEventQuery) -> StorageResult<Vec<AlertEvent>>;

    /// Delete alert events with `timestamp < before`
    async fn cleanup_old_alert_events(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn prune_alert_events(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        self.cleanup_old_alert_events(retention_cutoff(retention, now))
            .await
    }

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    async fn get_stats(&self) -> StorageResult<StorageStats>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

/// Rejects batches containing samples that cannot be stored or queried back.
pub(crate) fn validate_batch(samples: &[MetricSample]) -> StorageResult<()> {
    for sample in samples {
        if sample.metric_name.trim().is_empty() {
            return Err(super::StorageError::InvalidSample(
                "metric name must not be empty".to_string(),
            ));
        }
        if sample.value.is_nan() {
            return Err(super::StorageError::InvalidSample(format!(
                "{} has a NaN value",
                sample.metric_name
            )));
        }
    }
    Ok(())
}
