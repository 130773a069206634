//! Alert lifecycle engine
//!
//! Tracks one open alert per (rule, app) and moves it through
//! `no_alert -> open -> resolved` as snapshots arrive.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Alert, AlertRule, AlertState, AlertTransition, LifecycleState, MetricSnapshot, SkippedRule,
};

/// Result of evaluating the rules against one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    /// Lifecycle changes, in rule order then app order
    pub transitions: Vec<AlertTransition>,
    /// Alerts whose stored form changed and must be written
    pub changed: Vec<Alert>,
    /// Rule/app pairs left untouched because the metric was absent
    pub skipped: Vec<SkippedRule>,
}

/// Outcome of applying one observation to one (rule, app) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// The alert after the step; None when there is nothing to track
    pub alert: Option<Alert>,
    /// Transition to report, if any
    pub transition: Option<AlertTransition>,
}

impl Step {
    fn unchanged() -> Self {
        Self {
            alert: None,
            transition: None,
        }
    }
}

/// Apply one observed value to the current alert for a (rule, app) pair.
///
/// `current` must be open or absent. The returned alert is `Some` whenever
/// it needs to be written.
pub fn step(
    current: Option<&Alert>,
    rule: &AlertRule,
    app_id: &str,
    value: f64,
    at: DateTime<Utc>,
) -> Step {
    let breached = rule.check(value);
    let transition = |from, to, severity| AlertTransition {
        rule_id: rule.id.clone(),
        app_id: app_id.to_string(),
        from_state: from,
        to_state: to,
        severity,
        value,
        at,
    };

    match (current, breached) {
        (None, false) => Step::unchanged(),
        (None, true) => {
            let severity = rule.severity_for(value);
            let alert = Alert {
                id: Uuid::new_v4(),
                rule_id: rule.id.clone(),
                app_id: app_id.to_string(),
                state: AlertState::Open,
                severity,
                first_triggered_at: at,
                last_seen_at: at,
                resolved_at: None,
                last_value: value,
                threshold: rule.threshold,
                clean_cycles: 0,
                message: rule.message(app_id, value),
            };
            Step {
                alert: Some(alert),
                transition: Some(transition(
                    LifecycleState::NoAlert,
                    LifecycleState::Open,
                    severity,
                )),
            }
        }
        (Some(open), true) => {
            let severity = open.severity.max(rule.severity_for(value));
            let escalated = severity > open.severity;
            let alert = Alert {
                severity,
                last_seen_at: at,
                last_value: value,
                clean_cycles: 0,
                message: rule.message(app_id, value),
                ..open.clone()
            };
            Step {
                alert: Some(alert),
                transition: escalated.then(|| {
                    transition(LifecycleState::Open, LifecycleState::Open, severity)
                }),
            }
        }
        (Some(open), false) => {
            let clean_cycles = open.clean_cycles + 1;
            if clean_cycles >= rule.resolve_after_cycles {
                let alert = Alert {
                    state: AlertState::Resolved,
                    resolved_at: Some(at),
                    clean_cycles,
                    ..open.clone()
                };
                Step {
                    alert: Some(alert),
                    transition: Some(transition(
                        LifecycleState::Open,
                        LifecycleState::Resolved,
                        open.severity,
                    )),
                }
            } else {
                Step {
                    alert: Some(Alert {
                        clean_cycles,
                        ..open.clone()
                    }),
                    transition: None,
                }
            }
        }
    }
}

type AlertKey = (String, String);

/// Holds open alerts between cycles and applies [`step`] for every rule and app
#[derive(Default)]
pub struct AlertEngine {
    open: Mutex<HashMap<AlertKey, Alert>>,
}

impl AlertEngine {
    /// Create an engine with no open alerts
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that resumes from persisted open alerts
    pub fn with_open_alerts(alerts: Vec<Alert>, rules: &[AlertRule]) -> Self {
        let engine = Self::new();
        engine.restore(alerts, rules);
        engine
    }

    /// Replace tracked alerts with the open ones in `alerts`.
    ///
    /// Alerts whose rule is not in `rules` are dropped, since nothing would
    /// ever evaluate or resolve them. Returns how many alerts are tracked.
    pub fn restore(&self, alerts: Vec<Alert>, rules: &[AlertRule]) -> usize {
        let mut open = self.open.lock();
        open.clear();
        for alert in alerts.into_iter().filter(Alert::is_open) {
            if !rules.iter().any(|r| r.id == alert.rule_id && r.applies_to(&alert.app_id)) {
                warn!(
                    alert_id = %alert.id,
                    rule_id = %alert.rule_id,
                    app_id = %alert.app_id,
                    "Dropping open alert for a rule that is no longer configured"
                );
                continue;
            }
            open.insert((alert.rule_id.clone(), alert.app_id.clone()), alert);
        }
        open.len()
    }

    /// Currently open alerts, ordered by rule then app
    pub fn open_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<_> = self.open.lock().values().cloned().collect();
        alerts.sort_by(|a, b| (&a.rule_id, &a.app_id).cmp(&(&b.rule_id, &b.app_id)));
        alerts
    }

    /// Apps holding an open alert for any rule
    pub fn apps_with_open_alerts(&self) -> BTreeSet<String> {
        self.open.lock().keys().map(|(_, app)| app.clone()).collect()
    }

    /// Evaluate every rule against the snapshot
    pub fn evaluate(&self, rules: &[AlertRule], snapshot: &MetricSnapshot) -> AlertReport {
        let mut report = AlertReport::default();
        let mut open = self.open.lock();

        for rule in rules {
            let apps: BTreeSet<String> = snapshot
                .apps
                .keys()
                .cloned()
                .chain(rule.app_id.clone())
                .chain(
                    open.keys()
                        .filter(|(rule_id, _)| rule_id == &rule.id)
                        .map(|(_, app)| app.clone()),
                )
                .filter(|app| rule.applies_to(app))
                .collect();

            for app_id in apps {
                let Some(value) = snapshot.value(&app_id, rule.metric) else {
                    debug!(rule_id = %rule.id, app_id = %app_id, metric = %rule.metric, "No data for metric");
                    report.skipped.push(SkippedRule {
                        rule_id: rule.id.clone(),
                        app_id,
                        metric: rule.metric,
                    });
                    continue;
                };

                let key = (rule.id.clone(), app_id);
                let outcome = step(open.get(&key), rule, &key.1, value, snapshot.taken_at);

                if let Some(transition) = &outcome.transition {
                    info!(
                        rule_id = %rule.id,
                        app_id = %key.1,
                        from = ?transition.from_state,
                        to = ?transition.to_state,
                        severity = ?transition.severity,
                        value,
                        "Alert transition"
                    );
                }

                if let Some(alert) = outcome.alert {
                    if alert.is_open() {
                        open.insert(key, alert.clone());
                    } else {
                        open.remove(&key);
                    }
                    report.changed.push(alert);
                }
                report.transitions.extend(outcome.transition);
            }
        }

        report
    }
}
