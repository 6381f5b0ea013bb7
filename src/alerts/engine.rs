use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::AlertEvent;
use super::rule::{AlertRule, RuleSet};
use super::state::{AlertInstance, Evaluation};
use crate::MetricSample;

/// What happened during one evaluation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// One event per state transition, in rule order
    pub events: Vec<AlertEvent>,
    /// Rules whose metric was missing from the batch
    pub skipped: Vec<String>,
    pub evaluated: usize,
}

/// Owns the rule set and one [`AlertInstance`] per rule.
///
/// Evaluation passes take `&mut self`, so two passes can never overlap.
#[derive(Debug)]
pub struct AlertEngine {
    rules: RuleSet,
    instances: HashMap<String, AlertInstance>,
    interval: Duration,
}

impl AlertEngine {
    pub fn new(rules: RuleSet, collection_interval: std::time::Duration) -> Self {
        let instances = rules
            .rules()
            .iter()
            .map(|rule| (rule.name.clone(), AlertInstance::new(&rule.name)))
            .collect();

        Self {
            rules,
            instances,
            interval: to_chrono(collection_interval),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn instance(&self, rule_name: &str) -> Option<&AlertInstance> {
        self.instances.get(rule_name)
    }

    /// Snapshot of every instance, in rule order
    pub fn instances(&self) -> Vec<AlertInstance> {
        self.rules
            .rules()
            .iter()
            .filter_map(|rule| self.instances.get(&rule.name).cloned())
            .collect()
    }

    /// Runs every rule against one tick's batch.
    pub fn evaluate(&mut self, batch: &[MetricSample], now: DateTime<Utc>) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        for rule in self.rules.rules() {
            let value = latest_matching(rule, batch);
            let instance = self
                .instances
                .entry(rule.name.clone())
                .or_insert_with(|| AlertInstance::new(&rule.name));

            match instance.apply(value, rule, now, self.interval) {
                Evaluation::Skipped => {
                    debug!(rule = %rule.name, selector = %rule.selector, "metric missing from batch, skipping rule");
                    report.skipped.push(rule.name.clone());
                }
                Evaluation::Unchanged => {
                    report.evaluated += 1;
                }
                Evaluation::Transition { from, to } => {
                    report.evaluated += 1;
                    let triggering_value = value.or(instance.last_value).unwrap_or(f64::NAN);
                    info!(
                        rule = %rule.name,
                        %from,
                        %to,
                        value = triggering_value,
                        severity = %rule.severity,
                        "alert state transition"
                    );
                    report.events.push(AlertEvent {
                        rule_name: rule.name.clone(),
                        from_state: from,
                        to_state: to,
                        severity: rule.severity,
                        timestamp: now,
                        triggering_value,
                    });
                }
            }
        }

        report
    }

    /// Swaps in a new rule set between evaluation passes.
    ///
    /// Instances are kept for rules whose definition did not change; new or
    /// modified rules start from `OK` and removed rules are dropped.
    pub fn replace_rules(&mut self, rules: RuleSet) {
        let mut instances = HashMap::with_capacity(rules.len());

        for rule in rules.rules() {
            let unchanged = self.find_rule(&rule.name) == Some(rule);
            let instance = match self.instances.remove(&rule.name) {
                Some(existing) if unchanged => existing,
                _ => AlertInstance::new(&rule.name),
            };
            instances.insert(rule.name.clone(), instance);
        }

        info!(
            rules = rules.len(),
            dropped = self.instances.len(),
            "alert rule set replaced"
        );

        self.rules = rules;
        self.instances = instances;
    }

    fn find_rule(&self, name: &str) -> Option<&AlertRule> {
        self.rules.rules().iter().find(|rule| rule.name == name)
    }
}

/// Most recent sample in the batch that matches the rule's selector. Later
/// entries win ties on timestamp.
fn latest_matching(rule: &AlertRule, batch: &[MetricSample]) -> Option<f64> {
    batch
        .iter()
        .filter(|sample| rule.selector.matches(sample))
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
        .map(|sample| sample.value)
}

/// Saturates at `Duration::MAX`; elapsed-time checks must add to it with `checked_add`
fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
