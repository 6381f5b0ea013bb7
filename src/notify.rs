//! Notification sinks for alert state transitions
//!
//! A sink is invoked once per [`AlertEvent`] after the event has been
//! appended to the history log. Sink failures are reported to the caller,
//! which logs them; they never roll back alert state.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::alerts::{AlertEvent, AlertState, Severity};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to send notification: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned {0}")]
    Status(StatusCode),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError>;
}

/// Writes every transition to the log at a level matching its severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let message = format_message(event);
        match (event.to_state, event.severity) {
            (AlertState::Firing, Severity::Error | Severity::Critical) => error!(
                rule = %event.rule_name,
                severity = %event.severity,
                "{message}"
            ),
            (AlertState::Firing, _) => warn!(
                rule = %event.rule_name,
                severity = %event.severity,
                "{message}"
            ),
            _ => info!(rule = %event.rule_name, "{message}"),
        }
        Ok(())
    }
}

/// Posts a JSON payload for every transition to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip(self, event), fields(rule = %event.rule_name))]
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let payload = json!({
            "message": format_message(event),
            "rule": event.rule_name,
            "from_state": event.from_state,
            "to_state": event.to_state,
            "severity": event.severity,
            "value": Some(event.triggering_value).filter(|v| v.is_finite()),
            "timestamp": event.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::Status(response.status()));
        }

        info!("Successfully sent webhook alert");
        Ok(())
    }
}

/// Fans every event out to several sinks. All sinks are tried; the first
/// error is returned.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

#[async_trait]
impl NotificationSink for MultiSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

pub fn format_message(event: &AlertEvent) -> String {
    let value = if event.triggering_value.is_finite() {
        format!("{:.2}", event.triggering_value)
    } else {
        "n/a".to_string()
    };

    match event.to_state {
        AlertState::Pending => format!(
            "Alert `{}` pending: threshold breached (value {value})",
            event.rule_name
        ),
        AlertState::Firing => format!(
            "🔥 **Alert firing** [{}]: `{}` (value {value})",
            event.severity, event.rule_name
        ),
        AlertState::Resolved => format!(
            "✅ **Alert resolved**: `{}` is back to normal (value {value})",
            event.rule_name
        ),
        AlertState::Ok => format!(
            "Alert `{}` is OK (was {})",
            event.rule_name, event.from_state
        ),
    }
}
