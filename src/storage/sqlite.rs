//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers see a committed snapshot while a batch is written
//! - **Single writer**: Batches are serialized by an async mutex and applied
//!   in one transaction, so a batch lands whole or not at all
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::{
    AlertEventQuery, HealthStatus, QueryRange, StorageBackend, StorageStats, validate_batch,
};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertEventRow, MetricRow, from_micros, to_micros};
use crate::MetricSample;
use crate::alerts::AlertEvent;

const INSERT_SAMPLE: &str = r#"
    INSERT INTO metric_samples (metric_name, timestamp, value, tags, source_collector)
    VALUES (?, ?, ?, ?, ?)
"#;

const INSERT_SAMPLE_DEDUP: &str = r#"
    INSERT INTO metric_samples (metric_name, timestamp, value, tags, source_collector)
    SELECT ?1, ?2, ?3, ?4, ?5
    WHERE NOT EXISTS (
        SELECT 1 FROM metric_samples
        WHERE metric_name = ?1 AND timestamp = ?2 AND tags = ?4 AND source_collector = ?5
    )
"#;

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    deduplicate: bool,
    write_lock: Mutex<()>,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite backend ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
            deduplicate: false,
            write_lock: Mutex::new(()),
        })
    }

    /// Skip samples identical to a stored row (same metric, timestamp, tags
    /// and source).
    pub fn with_deduplication(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    fn sample_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
        MetricRow {
            metric_name: row.try_get("metric_name")?,
            timestamp: row.try_get("timestamp")?,
            value: row.try_get("value")?,
            tags: row.try_get("tags")?,
            source_collector: row.try_get("source_collector")?,
        }
        .into_sample()
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<AlertEvent> {
        AlertEventRow {
            rule_name: row.try_get("rule_name")?,
            from_state: row.try_get("from_state")?,
            to_state: row.try_get("to_state")?,
            severity: row.try_get("severity")?,
            timestamp: row.try_get("timestamp")?,
            triggering_value: row.try_get("triggering_value")?,
        }
        .try_into()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn insert_batch(&self, samples: &[MetricSample]) -> StorageResult<()> {
        validate_batch(samples)?;
        if samples.is_empty() {
            return Ok(());
        }

        let rows = samples
            .iter()
            .map(MetricRow::from_sample)
            .collect::<StorageResult<Vec<_>>>()?;

        let statement = if self.deduplicate {
            INSERT_SAMPLE_DEDUP
        } else {
            INSERT_SAMPLE
        };

        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for row in &rows {
            sqlx::query(statement)
                .bind(&row.metric_name)
                .bind(row.timestamp)
                .bind(row.value)
                .bind(&row.tags)
                .bind(&row.source_collector)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self), fields(metric = %query.metric_name))]
    async fn query_range(&self, query: &QueryRange) -> StorageResult<Vec<MetricSample>> {
        if query.is_empty_range() {
            return Ok(Vec::new());
        }

        // With a tag filter the limit has to be applied after post-filtering.
        let limit_clause = match query.limit {
            Some(limit) if query.tags.is_empty() => format!("LIMIT {limit}"),
            _ => String::new(),
        };

        let sql = format!(
            r#"
            SELECT metric_name, timestamp, value, tags, source_collector
            FROM metric_samples
            WHERE metric_name = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, id ASC
            {limit_clause}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&query.metric_name)
            .bind(to_micros(&query.start))
            .bind(to_micros(&query.end))
            .fetch_all(&self.pool)
            .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in &rows {
            let sample = Self::sample_from_row(row)?;
            if sample.has_tags(&query.tags) {
                samples.push(sample);
            }
            if query.limit.is_some_and(|limit| samples.len() >= limit) {
                break;
            }
        }

        debug!("query returned {} samples", samples.len());
        Ok(samples)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let _writer = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(to_micros(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        debug!("deleted {} old samples", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn insert_alert_events(&self, events: &[AlertEvent]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for row in events.iter().map(AlertEventRow::from) {
            sqlx::query(
                r#"
                INSERT INTO alert_events
                    (rule_name, from_state, to_state, severity, timestamp, triggering_value)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.rule_name)
            .bind(&row.from_state)
            .bind(&row.to_state)
            .bind(&row.severity)
            .bind(row.timestamp)
            .bind(row.triggering_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_alert_events(&self, query: &AlertEventQuery) -> StorageResult<Vec<AlertEvent>> {
        if query.start > query.end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT rule_name, from_state, to_state, severity, timestamp, triggering_value
            FROM alert_events
            WHERE (?1 IS NULL OR rule_name = ?1) AND timestamp >= ?2 AND timestamp <= ?3
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(query.rule_name.as_deref())
        .bind(to_micros(&query.start))
        .bind(to_micros(&query.end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_alert_events(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let _writer = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM alert_events WHERE timestamp < ?")
            .bind(to_micros(&before))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<StorageStats> {
        let (sample_count, metric_names, oldest, newest): (i64, i64, Option<i64>, Option<i64>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), COUNT(DISTINCT metric_name), MIN(timestamp), MAX(timestamp)
                FROM metric_samples
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        let (event_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alert_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(StorageStats {
            backend: "sqlite".to_string(),
            sample_count: sample_count as u64,
            metric_names: metric_names as u64,
            oldest_sample: oldest.map(from_micros).transpose()?,
            newest_sample: newest.map(from_micros).transpose()?,
            event_count: event_count as u64,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
