//! Metrics data models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::MetricKind;
use super::telemetry::TelemetryRecord;

/// How per-record judge scores collapse into one value per app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAggregation {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Worst (lowest) score
    Min,
}

impl ScoreAggregation {
    /// Aggregate scores; None when there are none
    pub fn apply(self, scores: &[f64]) -> Option<f64> {
        if scores.is_empty() {
            return None;
        }
        match self {
            Self::Mean => Some(scores.iter().sum::<f64>() / scores.len() as f64),
            Self::Min => scores.iter().copied().reduce(f64::min),
        }
    }
}

/// Latest metric values for one application. Absent means "not measured this cycle".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetrics {
    /// Aggregated judge score over the cycle's successful evaluations
    pub hallucination_score: Option<f64>,

    /// Drift distance emitted this cycle
    pub drift_distance: Option<f64>,

    /// Mean latency over the lookback window
    pub latency_ms: Option<f64>,

    /// Fraction of requests in the lookback window with no output
    pub error_rate: Option<f64>,
}

impl AppMetrics {
    /// Value of a metric, if measured
    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::HallucinationScore => self.hallucination_score,
            MetricKind::DriftDistance => self.drift_distance,
            MetricKind::LatencyMs => self.latency_ms,
            MetricKind::ErrorRate => self.error_rate,
        }
    }

    /// Fill latency and error rate from recent telemetry
    pub fn record_traffic(&mut self, recent: &[TelemetryRecord]) {
        if recent.is_empty() {
            return;
        }
        let total = recent.len() as f64;
        self.latency_ms = Some(recent.iter().map(|r| r.latency_ms).sum::<f64>() / total);
        self.error_rate = Some(recent.iter().filter(|r| r.is_error()).count() as f64 / total);
    }
}

/// Metric values for every application seen in a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// When the snapshot was assembled
    pub taken_at: DateTime<Utc>,

    /// Per-application values, ordered by app id
    pub apps: BTreeMap<String, AppMetrics>,
}

impl MetricSnapshot {
    /// Create an empty snapshot
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            apps: BTreeMap::new(),
        }
    }

    /// Mutable access to an app's metrics, creating an empty entry
    pub fn app_mut(&mut self, app_id: &str) -> &mut AppMetrics {
        self.apps.entry(app_id.to_string()).or_default()
    }

    /// Value of a metric for an app
    pub fn value(&self, app_id: &str, metric: MetricKind) -> Option<f64> {
        self.apps.get(app_id).and_then(|m| m.value(metric))
    }
}
