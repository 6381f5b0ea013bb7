//! HTTP health and metrics endpoints of configured services
//!
//! For every service the collector emits, tagged `service=<name>`:
//!
//! - `service.healthy`: `1` for a 2xx health response, `0` otherwise
//!   (including connection errors and timeouts)
//! - `service.response_time_seconds`: only when the health request completed
//! - `service.<field>`: every numeric field of the JSON object served at the
//!   optional `metrics_url`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use super::{CollectionError, Collector};
use crate::MetricSample;
use crate::config::ServiceEndpoint;

pub const SERVICE_COLLECTOR: &str = "service";

pub struct ServiceCollector {
    services: Vec<ServiceEndpoint>,
    /// HTTP client (reused across requests)
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ServiceCollector {
    pub fn new(
        services: Vec<ServiceEndpoint>,
        request_timeout: Duration,
    ) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            services,
            client,
            request_timeout,
        })
    }

    #[instrument(skip(self, service), fields(service = %service.name))]
    async fn check(&self, service: &ServiceEndpoint) -> Vec<MetricSample> {
        let timestamp = Utc::now();
        let sample = |name: String, value: f64| {
            MetricSample::new(name, value, timestamp, SERVICE_COLLECTOR)
                .with_tag("service", &service.name)
        };

        trace!("checking service at {}", service.health_url);
        let start = Instant::now();
        let mut samples = match self.client.get(&service.health_url).send().await {
            Ok(response) => {
                let elapsed = start.elapsed().as_secs_f64();
                let healthy = response.status().is_success();
                if !healthy {
                    warn!("health endpoint returned {}", response.status());
                }
                vec![
                    sample("service.healthy".to_string(), if healthy { 1.0 } else { 0.0 }),
                    sample("service.response_time_seconds".to_string(), elapsed),
                ]
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                return vec![sample("service.healthy".to_string(), 0.0)];
            }
        };

        if let Some(metrics_url) = &service.metrics_url {
            match self.fetch_metrics(metrics_url).await {
                Ok(fields) => samples.extend(
                    fields
                        .into_iter()
                        .map(|(field, value)| sample(format!("service.{field}"), value)),
                ),
                Err(e) => warn!("failed to fetch service metrics: {}", e),
            }
        }

        samples
    }

    async fn fetch_metrics(&self, url: &str) -> Result<Vec<(String, f64)>, CollectionError> {
        let body: Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        numeric_fields(&body)
    }
}

/// Numeric top-level fields of a JSON object, in key order
pub fn numeric_fields(body: &Value) -> Result<Vec<(String, f64)>, CollectionError> {
    let object = body
        .as_object()
        .ok_or_else(|| CollectionError::Failed("metrics endpoint did not return an object".to_string()))?;

    let mut fields: Vec<(String, f64)> = object
        .iter()
        .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(fields)
}

#[async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &str {
        SERVICE_COLLECTOR
    }

    /// Health and metrics requests run back to back, each bounded by the
    /// request timeout.
    fn timeout(&self) -> Option<Duration> {
        Some(self.request_timeout.saturating_mul(2))
    }

    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError> {
        let results = join_all(self.services.iter().map(|service| self.check(service))).await;
        let samples: Vec<MetricSample> = results.into_iter().flatten().collect();

        debug!(
            services = self.services.len(),
            "collected {} service metrics",
            samples.len()
        );
        Ok(samples)
    }
}
