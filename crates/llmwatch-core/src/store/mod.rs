//! Telemetry store
//!
//! The ingestion side appends telemetry; the evaluation core reads it and
//! writes evaluations, drift metrics, baselines, alerts and cycle reports back.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{
    Alert, CycleReport, DriftMetric, EmbeddingBaseline, EvaluationRecord, TelemetryRecord,
};

/// Storage operations the evaluation core depends on.
///
/// Implementations must offer read-after-write consistency within a process.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Oldest telemetry records without an evaluation, up to `limit`
    async fn fetch_unevaluated(&self, limit: usize) -> Result<Vec<TelemetryRecord>>;

    /// Telemetry for an app created at or after `since`
    async fn fetch_recent(&self, app_id: &str, since: DateTime<Utc>)
        -> Result<Vec<TelemetryRecord>>;

    /// Whether an evaluation exists for a request
    async fn evaluation_exists(&self, request_id: Uuid) -> Result<bool>;

    /// Store an evaluation. Returns `false` (and writes nothing) when one
    /// already exists for the request.
    async fn save_evaluation(&self, evaluation: &EvaluationRecord) -> Result<bool>;

    /// Insert or update an alert by id
    async fn save_alert(&self, alert: &Alert) -> Result<()>;

    /// All alerts currently open
    async fn load_open_alerts(&self) -> Result<Vec<Alert>>;

    /// Append a drift metric
    async fn save_drift_metric(&self, metric: &DriftMetric) -> Result<()>;

    /// Insert or replace an app's baseline
    async fn save_baseline(&self, baseline: &EmbeddingBaseline) -> Result<()>;

    /// Every stored baseline
    async fn load_baselines(&self) -> Result<Vec<EmbeddingBaseline>>;

    /// Append a cycle report
    async fn save_cycle_report(&self, report: &CycleReport) -> Result<()>;

    /// Check the store is reachable
    async fn health_check(&self) -> Result<()>;
}

/// Open the store named by `database.url`
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn TelemetryStore>> {
    if config.url.starts_with("memory://") {
        info!("Using in-memory telemetry store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let store = PostgresStore::connect(config).await?;
    if config.run_migrations {
        store.migrate().await?;
        info!("Database migrations applied");
    }
    Ok(Arc::new(store))
}
