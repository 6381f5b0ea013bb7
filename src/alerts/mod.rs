//! Alert rules and the duration-debounced alert engine
//!
//! Every configured rule owns exactly one [`AlertInstance`]. The engine feeds
//! each tick's sample batch through the per-rule state machine:
//!
//! ```text
//!   OK ──breach──▶ PENDING ──elapsed ≥ duration──▶ FIRING
//!   ▲                 │                               │
//!   │               clear                           clear
//!   │                 ▼                               ▼
//!   └──────────────── OK ◀──next evaluation────── RESOLVED
//! ```
//!
//! Rules whose metric is absent from a batch are skipped for that tick, so a
//! gap in collection never fires or resolves an alert.

pub mod engine;
pub mod rule;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::{AlertEngine, EvaluationReport};
pub use rule::{AlertRule, Condition, MetricSelector, RuleConfigError, RuleSet, Severity};
pub use state::{AlertInstance, AlertState, Evaluation};

/// Immutable record of a single alert state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_name: String,
    pub from_state: AlertState,
    pub to_state: AlertState,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Value of the sample that drove the transition
    pub triggering_value: f64,
}
