//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Metric a rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Aggregated judge score over the cycle (higher is better)
    HallucinationScore,
    /// Cosine distance of the cycle's outputs from the baseline
    DriftDistance,
    /// Mean latency over the lookback window
    LatencyMs,
    /// Fraction of recent requests with no output
    ErrorRate,
}

impl MetricKind {
    /// Name used in logs and storage
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HallucinationScore => "hallucination_score",
            Self::DriftDistance => "drift_distance",
            Self::LatencyMs => "latency_ms",
            Self::ErrorRate => "error_rate",
        }
    }

    /// Range a threshold for this metric must fall in
    fn valid_range(self) -> (f64, f64) {
        match self {
            Self::HallucinationScore | Self::ErrorRate => (0.0, 1.0),
            Self::DriftDistance => (0.0, 2.0),
            Self::LatencyMs => (0.0, f64::MAX),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Greater than
    #[serde(alias = ">")]
    Gt,
    /// Less than
    #[serde(alias = "<")]
    Lt,
    /// Greater than or equal to
    #[serde(alias = ">=")]
    Gte,
    /// Less than or equal to
    #[serde(alias = "<=")]
    Lte,
}

impl Operator {
    /// Apply the operator as `value <op> threshold`
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
        }
    }

    /// Whether a breach means the value went up (as opposed to down)
    fn is_upper_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Gte)
    }

    /// Human-readable verb for messages
    pub fn describe(self) -> &'static str {
        match self {
            Self::Gt => "exceeded",
            Self::Lt => "fell below",
            Self::Gte => "reached or exceeded",
            Self::Lte => "fell to or below",
        }
    }
}

/// Alert severity level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parse the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Persisted state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// The condition is (or recently was) breached
    Open,
    /// The incident is over; never reopened
    Resolved,
}

impl AlertState {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    /// Parse the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Lifecycle position of a (rule, app) pair, as reported in transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No open alert
    NoAlert,
    /// An alert is open
    Open,
    /// The alert was closed
    Resolved,
}

/// Severity bump applied when a breach goes past a second threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// Threshold past the rule threshold, compared with the rule's operator
    pub threshold: f64,
    /// Severity to raise to
    pub severity: Severity,
}

/// An alert rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Metric to monitor
    pub metric: MetricKind,

    /// Comparison operator
    pub operator: Operator,

    /// Threshold value
    pub threshold: f64,

    /// Alert severity
    pub severity: Severity,

    /// Consecutive clean cycles required before an open alert resolves
    pub resolve_after_cycles: u32,

    /// Application to monitor (None = all applications)
    pub app_id: Option<String>,

    /// Optional severity escalation
    pub escalation: Option<Escalation>,
}

/// Input for an alert rule as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    /// Unique identifier
    pub id: String,
    /// Human-readable name (defaults to the id)
    pub name: Option<String>,
    /// Metric to monitor
    pub metric: MetricKind,
    /// Comparison operator
    pub operator: Operator,
    /// Threshold value
    pub threshold: f64,
    /// Alert severity (defaults to warning)
    pub severity: Option<Severity>,
    /// Consecutive clean cycles before resolving; required
    pub resolve_after_cycles: Option<u32>,
    /// Application scope
    pub app_id: Option<String>,
    /// Optional severity escalation
    pub escalation: Option<Escalation>,
}

impl AlertRuleInput {
    /// Validate and build the rule.
    ///
    /// `resolve_after_cycles` has no fallback here; leaving it out is an error.
    pub fn build(self) -> Result<AlertRule> {
        if self.id.trim().is_empty() {
            return Err(Error::config("alert rule id must not be empty"));
        }
        let Some(resolve_after_cycles) = self.resolve_after_cycles else {
            return Err(Error::config(format!(
                "alert rule '{}' is missing resolve_after_cycles",
                self.id
            )));
        };
        let rule = AlertRule {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            metric: self.metric,
            operator: self.operator,
            threshold: self.threshold,
            severity: self.severity.unwrap_or_default(),
            resolve_after_cycles,
            app_id: self.app_id,
            escalation: self.escalation,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl AlertRule {
    /// Check if a value triggers this alert
    pub fn check(&self, value: f64) -> bool {
        self.operator.compare(value, self.threshold)
    }

    /// Severity a breaching value warrants
    pub fn severity_for(&self, value: f64) -> Severity {
        match self.escalation {
            Some(esc) if self.operator.compare(value, esc.threshold) => {
                esc.severity.max(self.severity)
            }
            _ => self.severity,
        }
    }

    /// Reject rules that cannot be evaluated meaningfully
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.metric.valid_range();
        if !self.threshold.is_finite() || self.threshold < min || self.threshold > max {
            return Err(Error::config(format!(
                "alert rule '{}': threshold {} outside [{}, {}] for {}",
                self.id, self.threshold, min, max, self.metric
            )));
        }
        if self.resolve_after_cycles == 0 {
            return Err(Error::config(format!(
                "alert rule '{}': resolve_after_cycles must be at least 1",
                self.id
            )));
        }
        if let Some(esc) = self.escalation {
            let beyond = if self.operator.is_upper_bound() {
                esc.threshold >= self.threshold
            } else {
                esc.threshold <= self.threshold
            };
            if !esc.threshold.is_finite() || !beyond {
                return Err(Error::config(format!(
                    "alert rule '{}': escalation threshold {} must lie beyond {}",
                    self.id, esc.threshold, self.threshold
                )));
            }
        }
        Ok(())
    }

    /// Whether the rule applies to an application
    pub fn applies_to(&self, app_id: &str) -> bool {
        self.app_id.as_deref().map_or(true, |scope| scope == app_id)
    }

    /// Format alert message
    pub fn message(&self, app_id: &str, value: f64) -> String {
        format!(
            "{} {} threshold of {:.3} for app '{}' (current value: {:.3})",
            self.metric,
            self.operator.describe(),
            self.threshold,
            app_id,
            value
        )
    }
}

/// A triggered alert for one (rule, app) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier of this incident
    pub id: Uuid,

    /// The rule that triggered this alert
    pub rule_id: String,

    /// Application in breach
    pub app_id: String,

    /// Current state
    pub state: AlertState,

    /// Severity level
    pub severity: Severity,

    /// When the alert opened
    pub first_triggered_at: DateTime<Utc>,

    /// Last cycle the breach was observed
    pub last_seen_at: DateTime<Utc>,

    /// When the alert was resolved (if resolved)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Last breaching value
    pub last_value: f64,

    /// Threshold at the time of triggering
    pub threshold: f64,

    /// Consecutive clean cycles observed while open
    pub clean_cycles: u32,

    /// Human-readable message
    pub message: String,
}

impl Alert {
    /// Whether the alert is still open
    pub fn is_open(&self) -> bool {
        self.state == AlertState::Open
    }
}

/// A lifecycle change, handed to the caller for logging or notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    /// Rule
    pub rule_id: String,
    /// Application
    pub app_id: String,
    /// State before
    pub from_state: LifecycleState,
    /// State after
    pub to_state: LifecycleState,
    /// Severity after the transition
    pub severity: Severity,
    /// Metric value observed this cycle
    pub value: f64,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// A rule that could not be evaluated for an app because its metric was absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    /// Rule
    pub rule_id: String,
    /// Application
    pub app_id: String,
    /// The missing metric
    pub metric: MetricKind,
}
