//! Alert rule definitions and rule-set validation

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::AlertRuleConfig;
use crate::{MetricSample, Tags};

/// Errors raised while loading alert rules. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleConfigError {
    #[error("duplicate alert rule name '{0}'")]
    DuplicateName(String),

    #[error("rule '{rule}': invalid condition operator '{condition}'")]
    InvalidCondition { rule: String, condition: String },

    #[error("rule '{rule}': duration must be positive (got {seconds}s)")]
    NonPositiveDuration { rule: String, seconds: i64 },

    #[error("rule '{rule}': invalid metric selector '{selector}'")]
    InvalidSelector { rule: String, selector: String },

    #[error("rule '{rule}': unknown severity '{severity}'")]
    InvalidSeverity { rule: String, severity: String },

    #[error("rule '{rule}': threshold must be a finite number")]
    InvalidThreshold { rule: String },

    #[error("alert rule name must not be empty")]
    EmptyName,
}

/// Comparison applied as `value <op> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Condition {
    pub fn is_breached(self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::GreaterThan => value > threshold,
            Condition::GreaterOrEqual => value >= threshold,
            Condition::LessThan => value < threshold,
            Condition::LessOrEqual => value <= threshold,
            Condition::Equal => value == threshold,
            Condition::NotEqual => value != threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::GreaterThan => ">",
            Condition::GreaterOrEqual => ">=",
            Condition::LessThan => "<",
            Condition::LessOrEqual => "<=",
            Condition::Equal => "==",
            Condition::NotEqual => "!=",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Condition::GreaterThan),
            ">=" | "gte" => Ok(Condition::GreaterOrEqual),
            "<" | "lt" => Ok(Condition::LessThan),
            "<=" | "lte" => Ok(Condition::LessOrEqual),
            "==" | "eq" => Ok(Condition::Equal),
            "!=" | "ne" => Ok(Condition::NotEqual),
            other => Err(format!("unknown condition operator: {other}")),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

static SELECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.:\-]*)\s*(?:\{(.*)\})?\s*$")
        .expect("selector pattern is valid")
});

static TAG_MATCHER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*=\s*(?:"([^"]*)"|([^",\s]+))\s*$"#)
        .expect("tag matcher pattern is valid")
});

/// Selects samples by metric name and, optionally, by tag equality.
///
/// Accepted forms: `cpu.usage_percent` and `service.healthy{service="api"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    metric_name: String,
    tags: Tags,
}

impl MetricSelector {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn matches(&self, sample: &MetricSample) -> bool {
        sample.metric_name == self.metric_name && sample.has_tags(&self.tags)
    }
}

impl FromStr for MetricSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = SELECTOR_RE
            .captures(s)
            .ok_or_else(|| format!("malformed selector: {s}"))?;

        let mut selector = MetricSelector::new(&captures[1]);

        if let Some(matchers) = captures.get(2) {
            for matcher in matchers.as_str().split(',') {
                if matcher.trim().is_empty() {
                    continue;
                }
                let pair = TAG_MATCHER_RE
                    .captures(matcher)
                    .ok_or_else(|| format!("malformed tag matcher: {matcher}"))?;
                let value = pair
                    .get(2)
                    .or_else(|| pair.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                selector = selector.with_tag(&pair[1], value);
            }
        }

        Ok(selector)
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric_name)?;
        if !self.tags.is_empty() {
            let matchers: Vec<String> = self
                .tags
                .iter()
                .map(|(key, value)| format!("{key}=\"{value}\""))
                .collect();
            write!(f, "{{{}}}", matchers.join(","))?;
        }
        Ok(())
    }
}

/// A validated alert rule
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub selector: MetricSelector,
    pub condition: Condition,
    pub threshold: f64,
    pub duration: Duration,
    pub severity: Severity,
}

impl AlertRule {
    pub fn from_config(config: &AlertRuleConfig) -> Result<Self, RuleConfigError> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(RuleConfigError::EmptyName);
        }

        let condition =
            config
                .condition
                .parse()
                .map_err(|_| RuleConfigError::InvalidCondition {
                    rule: name.clone(),
                    condition: config.condition.clone(),
                })?;

        let selector = config
            .metric
            .parse()
            .map_err(|_| RuleConfigError::InvalidSelector {
                rule: name.clone(),
                selector: config.metric.clone(),
            })?;

        let severity = config
            .severity
            .parse()
            .map_err(|_| RuleConfigError::InvalidSeverity {
                rule: name.clone(),
                severity: config.severity.clone(),
            })?;

        if !config.threshold.is_finite() {
            return Err(RuleConfigError::InvalidThreshold { rule: name });
        }

        if config.duration <= 0 {
            return Err(RuleConfigError::NonPositiveDuration {
                rule: name,
                seconds: config.duration,
            });
        }

        Ok(Self {
            name,
            description: config.description.clone(),
            selector,
            condition,
            threshold: config.threshold,
            duration: Duration::seconds(config.duration),
            severity,
        })
    }

    pub fn is_breached(&self, value: f64) -> bool {
        self.condition.is_breached(value, self.threshold)
    }
}

/// An immutable, validated set of rules with unique names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<AlertRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<AlertRule>) -> Result<Self, RuleConfigError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleConfigError::DuplicateName(rule.name.clone()));
            }
            if rule.duration <= Duration::zero() {
                return Err(RuleConfigError::NonPositiveDuration {
                    rule: rule.name.clone(),
                    seconds: rule.duration.num_seconds(),
                });
            }
        }
        Ok(Self { rules })
    }

    pub fn from_config(configs: &[AlertRuleConfig]) -> Result<Self, RuleConfigError> {
        let rules = configs
            .iter()
            .map(AlertRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
