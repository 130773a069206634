//! In-memory store.
//!
//! Suitable for tests and single-process runs. Everything is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::TelemetryStore;
use crate::error::Result;
use crate::models::{
    Alert, CycleReport, DriftMetric, EmbeddingBaseline, EvaluationRecord, TelemetryRecord,
};

#[derive(Default)]
struct Inner {
    telemetry: Vec<TelemetryRecord>,
    evaluations: HashMap<Uuid, EvaluationRecord>,
    alerts: HashMap<Uuid, Alert>,
    drift_metrics: Vec<DriftMetric>,
    baselines: HashMap<String, EmbeddingBaseline>,
    reports: Vec<CycleReport>,
}

/// In-memory implementation of [`TelemetryStore`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a telemetry record (the producer side)
    pub fn append(&self, record: TelemetryRecord) {
        self.inner.write().telemetry.push(record);
    }

    /// All evaluations, in no particular order
    pub fn evaluations(&self) -> Vec<EvaluationRecord> {
        self.inner.read().evaluations.values().cloned().collect()
    }

    /// Evaluation for a request
    pub fn evaluation(&self, request_id: Uuid) -> Option<EvaluationRecord> {
        self.inner.read().evaluations.get(&request_id).cloned()
    }

    /// All alerts ever stored, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<_> = self.inner.read().alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.first_triggered_at);
        alerts
    }

    /// Drift metrics in insertion order
    pub fn drift_metrics(&self) -> Vec<DriftMetric> {
        self.inner.read().drift_metrics.clone()
    }

    /// Cycle reports in insertion order
    pub fn cycle_reports(&self) -> Vec<CycleReport> {
        self.inner.read().reports.clone()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn fetch_unevaluated(&self, limit: usize) -> Result<Vec<TelemetryRecord>> {
        let inner = self.inner.read();
        let mut pending: Vec<_> = inner
            .telemetry
            .iter()
            .filter(|r| !inner.evaluations.contains_key(&r.id))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn fetch_recent(
        &self,
        app_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>> {
        Ok(self
            .inner
            .read()
            .telemetry
            .iter()
            .filter(|r| r.app_id == app_id && r.created_at >= since)
            .cloned()
            .collect())
    }

    async fn evaluation_exists(&self, request_id: Uuid) -> Result<bool> {
        Ok(self.inner.read().evaluations.contains_key(&request_id))
    }

    async fn save_evaluation(&self, evaluation: &EvaluationRecord) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.evaluations.contains_key(&evaluation.request_id) {
            return Ok(false);
        }
        inner
            .evaluations
            .insert(evaluation.request_id, evaluation.clone());
        Ok(true)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.write().alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn load_open_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| a.is_open())
            .cloned()
            .collect())
    }

    async fn save_drift_metric(&self, metric: &DriftMetric) -> Result<()> {
        self.inner.write().drift_metrics.push(metric.clone());
        Ok(())
    }

    async fn save_baseline(&self, baseline: &EmbeddingBaseline) -> Result<()> {
        self.inner
            .write()
            .baselines
            .insert(baseline.app_id.clone(), baseline.clone());
        Ok(())
    }

    async fn load_baselines(&self) -> Result<Vec<EmbeddingBaseline>> {
        Ok(self.inner.read().baselines.values().cloned().collect())
    }

    async fn save_cycle_report(&self, report: &CycleReport) -> Result<()> {
        self.inner.write().reports.push(report.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
