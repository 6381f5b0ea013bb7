use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::rule::AlertRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    #[default]
    Ok,
    Pending,
    Firing,
    Resolved,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Ok => "OK",
            AlertState::Pending => "PENDING",
            AlertState::Firing => "FIRING",
            AlertState::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OK" => Ok(AlertState::Ok),
            "PENDING" => Ok(AlertState::Pending),
            "FIRING" => Ok(AlertState::Firing),
            "RESOLVED" => Ok(AlertState::Resolved),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// Outcome of feeding one evaluation into an [`AlertInstance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No matching sample in the batch; the instance was left untouched.
    Skipped,
    Unchanged,
    Transition { from: AlertState, to: AlertState },
}

/// Mutable per-rule alert state. Owned exclusively by the alert engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub rule_name: String,
    pub state: AlertState,
    pub breach_started_at: Option<DateTime<Utc>>,
    /// Breaching evaluations seen since `breach_started_at`
    #[serde(default)]
    pub breach_evaluations: u32,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_value: Option<f64>,
}

impl AlertInstance {
    pub fn new(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            state: AlertState::Ok,
            breach_started_at: None,
            breach_evaluations: 0,
            last_evaluated_at: None,
            last_value: None,
        }
    }

    /// Advances the state machine by one evaluation.
    ///
    /// `value` is the most recent matching sample of the current batch, or
    /// `None` if the rule's metric was not collected. The breach is considered
    /// to have covered the whole collection interval in which it was observed,
    /// so a rule with duration `D` fires on the `ceil(D / interval)`-th
    /// breaching evaluation. Skipped evaluations do not count towards that
    /// total, and a rule whose metric went missing mid-breach needs the full
    /// number of breaching evaluations before it fires.
    ///
    /// `RESOLVED` always returns to `OK` on the next evaluation, whether or
    /// not a sample is present.
    pub fn apply(
        &mut self,
        value: Option<f64>,
        rule: &AlertRule,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Evaluation {
        let from = self.state;

        if from == AlertState::Resolved {
            self.state = AlertState::Ok;
            self.reset_breach();
            self.last_evaluated_at = Some(now);
            if let Some(value) = value {
                self.last_value = Some(value);
            }
            return Evaluation::Transition {
                from,
                to: AlertState::Ok,
            };
        }

        let Some(value) = value else {
            return Evaluation::Skipped;
        };

        let breached = rule.is_breached(value);
        self.last_evaluated_at = Some(now);
        self.last_value = Some(value);

        let to = match (from, breached) {
            (AlertState::Ok, true) => {
                self.breach_started_at = Some(now);
                self.breach_evaluations = 1;
                AlertState::Pending
            }
            (AlertState::Ok, false) => AlertState::Ok,
            (AlertState::Pending, true) => {
                let started = *self.breach_started_at.get_or_insert(now);
                self.breach_evaluations = self.breach_evaluations.saturating_add(1);
                // An interval too large to add means the breach covers any duration
                let covered = (now - started)
                    .checked_add(&interval)
                    .is_none_or(|elapsed| elapsed >= rule.duration);
                if covered && self.breach_evaluations >= required_evaluations(rule.duration, interval) {
                    AlertState::Firing
                } else {
                    AlertState::Pending
                }
            }
            (AlertState::Pending, false) => {
                self.reset_breach();
                AlertState::Ok
            }
            (AlertState::Firing, true) => AlertState::Firing,
            (AlertState::Firing, false) => {
                self.reset_breach();
                AlertState::Resolved
            }
            (AlertState::Resolved, _) => AlertState::Ok,
        };

        self.state = to;
        if from == to {
            Evaluation::Unchanged
        } else {
            Evaluation::Transition { from, to }
        }
    }

    fn reset_breach(&mut self) {
        self.breach_started_at = None;
        self.breach_evaluations = 0;
    }
}

/// `ceil(duration / interval)`, at least one
fn required_evaluations(duration: Duration, interval: Duration) -> u32 {
    let interval_ms = i128::from(interval.num_milliseconds());
    if interval_ms <= 0 {
        return 1;
    }
    let duration_ms = i128::from(duration.num_milliseconds()).max(0);
    let required = (duration_ms + interval_ms - 1) / interval_ms;
    u32::try_from(required).unwrap_or(u32::MAX).max(1)
}
