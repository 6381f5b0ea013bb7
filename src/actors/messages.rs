//! Message types for the scheduler actor
//!
//! Commands travel over an mpsc channel to the scheduler task; every command
//! carries a oneshot sender for its reply.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::alerts::AlertEvent;

/// Commands that can be sent to the scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a tick immediately, outside the interval timer
    ///
    /// Replies `None` if the tick was abandoned because of shutdown.
    TickNow {
        respond_to: oneshot::Sender<Option<TickReport>>,
    },

    /// Snapshot of the engine status
    GetStatus {
        respond_to: oneshot::Sender<EngineStatus>,
    },
}

/// What happened to a tick's batch on its way to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Written,
    /// Dry run: nothing was written
    DryRun,
    /// Retries exhausted; the batch was only used for alert evaluation
    Failed,
    /// Persistence disabled in configuration
    Disabled,
}

/// Result of one completed tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    /// Number of samples in the batch
    pub samples: usize,
    /// Collectors that failed, timed out or produced unstorable samples,
    /// in name order
    pub collector_failures: Vec<String>,
    pub persisted: PersistOutcome,
    pub events: Vec<AlertEvent>,
    /// Rules skipped because their metric was not collected
    pub skipped_rules: Vec<String>,
}

/// Engine status, reported on request and returned when the scheduler stops
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub ticks_completed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub samples_written: u64,
    /// Alert events appended to the history log
    pub events_recorded: u64,
    /// Failure count per collector name
    pub collector_failures: HashMap<String, u64>,
    /// Set when the last batch could not be persisted; cleared by the next
    /// successful write
    pub storage_degraded: bool,
    /// Set when alert events could not be appended to the history log;
    /// cleared by the next successful append
    pub history_degraded: bool,
    pub last_storage_error: Option<String>,
    pub last_cleanup_at: Option<DateTime<Utc>>,
    pub samples_pruned: u64,
    pub events_pruned: u64,
    pub dry_run: bool,
}
