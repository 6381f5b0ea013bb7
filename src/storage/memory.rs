//! In-memory storage backend (no persistence)
//!
//! Useful for tests, dry runs and deployments that only need alerting. All
//! data is lost on restart. Samples are bucketed per metric name in a
//! timestamp-ordered map, so range scans and pruning never touch unrelated
//! series.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{
    AlertEventQuery, HealthStatus, QueryRange, StorageBackend, StorageStats, validate_batch,
};
use super::error::StorageResult;
use crate::MetricSample;
use crate::alerts::AlertEvent;

type Series = BTreeMap<DateTime<Utc>, Vec<MetricSample>>;

#[derive(Debug, Default)]
struct MemoryState {
    samples: HashMap<String, Series>,
    events: BTreeMap<DateTime<Utc>, Vec<AlertEvent>>,
}

/// In-memory storage backend
///
/// A single `RwLock` serializes writers and gives readers a consistent view:
/// a batch is inserted while holding the write guard, so no query can see
/// half of it.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    deduplicate: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop samples identical to one already stored (same metric, timestamp,
    /// tags and source).
    pub fn with_deduplication(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_batch(&self, samples: &[MetricSample]) -> StorageResult<()> {
        validate_batch(samples)?;

        let mut state = self.state.write().await;
        let mut inserted = 0usize;

        for sample in samples {
            let bucket = state
                .samples
                .entry(sample.metric_name.clone())
                .or_default()
                .entry(sample.timestamp)
                .or_default();

            if self.deduplicate
                && bucket
                    .iter()
                    .any(|s| s.tags == sample.tags && s.source_collector == sample.source_collector)
            {
                continue;
            }
            bucket.push(sample.clone());
            inserted += 1;
        }

        debug!(inserted, batch = samples.len(), "in-memory batch written");
        Ok(())
    }

    async fn query_range(&self, query: &QueryRange) -> StorageResult<Vec<MetricSample>> {
        if query.is_empty_range() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let Some(series) = state.samples.get(&query.metric_name) else {
            return Ok(Vec::new());
        };

        let samples = series
            .range(query.start..=query.end)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|sample| sample.has_tags(&query.tags))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(samples)
    }

    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut removed = 0usize;

        for series in state.samples.values_mut() {
            let kept = series.split_off(&before);
            removed += series.values().map(Vec::len).sum::<usize>();
            *series = kept;
        }
        state.samples.retain(|_, series| !series.is_empty());

        debug!(removed, %before, "in-memory samples pruned");
        Ok(removed)
    }

    async fn insert_alert_events(&self, events: &[AlertEvent]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        for event in events {
            state
                .events
                .entry(event.timestamp)
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }

    async fn query_alert_events(&self, query: &AlertEventQuery) -> StorageResult<Vec<AlertEvent>> {
        if query.start > query.end {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let events = state
            .events
            .range(query.start..=query.end)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|event| {
                query
                    .rule_name
                    .as_ref()
                    .is_none_or(|name| &event.rule_name == name)
            })
            .cloned()
            .collect();

        Ok(events)
    }

    async fn cleanup_old_alert_events(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let kept = state.events.split_off(&before);
        let removed = state.events.values().map(Vec::len).sum();
        state.events = kept;
        Ok(removed)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        let total: usize = state
            .samples
            .values()
            .flat_map(|series| series.values())
            .map(Vec::len)
            .sum();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_samples".to_string(), total.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<StorageStats> {
        let state = self.state.read().await;

        let mut stats = StorageStats {
            backend: "memory".to_string(),
            metric_names: state.samples.len() as u64,
            event_count: state.events.values().map(|b| b.len() as u64).sum(),
            ..Default::default()
        };

        for series in state.samples.values() {
            stats.sample_count += series.values().map(|b| b.len() as u64).sum::<u64>();
            if let Some((first, _)) = series.first_key_value() {
                stats.oldest_sample = Some(stats.oldest_sample.map_or(*first, |o| o.min(*first)));
            }
            if let Some((last, _)) = series.last_key_value() {
                stats.newest_sample = Some(stats.newest_sample.map_or(*last, |n| n.max(*last)));
            }
        }

        Ok(stats)
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
