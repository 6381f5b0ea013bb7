//! Persisted row layouts
//!
//! Samples and events are stored flat, one row each. Timestamps are kept as
//! Unix microseconds so that range predicates stay integer comparisons on the
//! `(metric_name, timestamp)` index, and tags are kept as a JSON object and
//! filtered after the index scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::alerts::{AlertEvent, AlertState, Severity};
use crate::{MetricSample, Tags};

/// A single sample as stored in `metric_samples`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub metric_name: String,
    pub timestamp: i64,
    pub value: f64,
    /// JSON-encoded [`Tags`]
    pub tags: String,
    pub source_collector: String,
}

impl MetricRow {
    pub fn from_sample(sample: &MetricSample) -> StorageResult<Self> {
        Ok(Self {
            metric_name: sample.metric_name.clone(),
            timestamp: to_micros(&sample.timestamp),
            value: sample.value,
            tags: serde_json::to_string(&sample.tags)?,
            source_collector: sample.source_collector.clone(),
        })
    }

    pub fn into_sample(self) -> StorageResult<MetricSample> {
        let tags: Tags = if self.tags.is_empty() {
            Tags::new()
        } else {
            serde_json::from_str(&self.tags)?
        };

        Ok(MetricSample {
            metric_name: self.metric_name,
            timestamp: from_micros(self.timestamp)?,
            value: self.value,
            tags,
            source_collector: self.source_collector,
        })
    }
}

/// A single transition as stored in `alert_events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEventRow {
    pub rule_name: String,
    pub from_state: String,
    pub to_state: String,
    pub severity: String,
    pub timestamp: i64,
    /// NaN is stored as NULL
    pub triggering_value: Option<f64>,
}

impl From<&AlertEvent> for AlertEventRow {
    fn from(event: &AlertEvent) -> Self {
        Self {
            rule_name: event.rule_name.clone(),
            from_state: event.from_state.to_string(),
            to_state: event.to_state.to_string(),
            severity: event.severity.to_string(),
            timestamp: to_micros(&event.timestamp),
            triggering_value: Some(event.triggering_value).filter(|v| !v.is_nan()),
        }
    }
}

impl TryFrom<AlertEventRow> for AlertEvent {
    type Error = StorageError;

    fn try_from(row: AlertEventRow) -> Result<Self, Self::Error> {
        let from_state: AlertState = row
            .from_state
            .parse()
            .map_err(StorageError::SerializationError)?;
        let to_state: AlertState = row
            .to_state
            .parse()
            .map_err(StorageError::SerializationError)?;
        let severity: Severity = row
            .severity
            .parse()
            .map_err(StorageError::SerializationError)?;

        Ok(AlertEvent {
            rule_name: row.rule_name,
            from_state,
            to_state,
            severity,
            timestamp: from_micros(row.timestamp)?,
            triggering_value: row.triggering_value.unwrap_or(f64::NAN),
        })
    }
}

pub fn to_micros(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub fn from_micros(micros: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        StorageError::SerializationError(format!("timestamp out of range: {micros}"))
    })
}
