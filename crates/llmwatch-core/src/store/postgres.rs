//! PostgreSQL-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::TelemetryStore;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertState, CycleReport, DriftMetric, EmbeddingBaseline, EvaluationRecord,
    Metadata, Severity, TelemetryRecord,
};

/// PostgreSQL implementation of [`TelemetryStore`]
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

const TELEMETRY_COLUMNS: &str =
    "r.id, r.app_id, r.model_name, r.prompt, r.response, r.latency_ms, r.metadata, r.created_at";

#[async_trait]
impl TelemetryStore for PostgresStore {
    async fn fetch_unevaluated(&self, limit: usize) -> Result<Vec<TelemetryRecord>> {
        let sql = format!(
            r#"
            SELECT {TELEMETRY_COLUMNS}
            FROM llm_requests r
            LEFT JOIN llm_evaluations e ON e.request_id = r.id
            WHERE e.request_id IS NULL
            ORDER BY r.created_at ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_telemetry).collect()
    }

    async fn fetch_recent(
        &self,
        app_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>> {
        let sql = format!(
            r#"
            SELECT {TELEMETRY_COLUMNS}
            FROM llm_requests r
            WHERE r.app_id = $1 AND r.created_at >= $2
            ORDER BY r.created_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(app_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_telemetry).collect()
    }

    async fn evaluation_exists(&self, request_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS found FROM llm_evaluations WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn save_evaluation(&self, evaluation: &EvaluationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO llm_evaluations (
                request_id, hallucination_score, judge_raw_output, evaluated_at, status, detail
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(evaluation.request_id)
        .bind(evaluation.hallucination_score)
        .bind(&evaluation.judge_raw_output)
        .bind(evaluation.evaluated_at)
        .bind(evaluation.status.as_str())
        .bind(&evaluation.detail)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, rule_id, app_id, state, severity, first_triggered_at, last_seen_at,
                resolved_at, last_value, threshold, clean_cycles, message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                severity = EXCLUDED.severity,
                last_seen_at = EXCLUDED.last_seen_at,
                resolved_at = EXCLUDED.resolved_at,
                last_value = EXCLUDED.last_value,
                clean_cycles = EXCLUDED.clean_cycles,
                message = EXCLUDED.message
            "#,
        )
        .bind(alert.id)
        .bind(&alert.rule_id)
        .bind(&alert.app_id)
        .bind(alert.state.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.first_triggered_at)
        .bind(alert.last_seen_at)
        .bind(alert.resolved_at)
        .bind(alert.last_value)
        .bind(alert.threshold)
        .bind(i32::try_from(alert.clean_cycles).unwrap_or(i32::MAX))
        .bind(&alert.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_open_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, app_id, state, severity, first_triggered_at, last_seen_at,
                   resolved_at, last_value, threshold, clean_cycles, message
            FROM alerts
            WHERE state = 'open'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_alert).collect()
    }

    async fn save_drift_metric(&self, metric: &DriftMetric) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drift_metrics (
                app_id, window_start, window_end, distance, sample_count, baseline_samples
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&metric.app_id)
        .bind(metric.window_start)
        .bind(metric.window_end)
        .bind(metric.distance)
        .bind(to_i64(metric.sample_count))
        .bind(to_i64(metric.baseline_samples))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_baseline(&self, baseline: &EmbeddingBaseline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_baselines (
                app_id, dimensions, centroid, sample_count, batches, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (app_id) DO UPDATE SET
                dimensions = EXCLUDED.dimensions,
                centroid = EXCLUDED.centroid,
                sample_count = EXCLUDED.sample_count,
                batches = EXCLUDED.batches,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&baseline.app_id)
        .bind(i32::try_from(baseline.dimensions).unwrap_or(i32::MAX))
        .bind(&baseline.centroid)
        .bind(to_i64(baseline.sample_count))
        .bind(to_i64(baseline.batches))
        .bind(baseline.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_baselines(&self) -> Result<Vec<EmbeddingBaseline>> {
        let rows = sqlx::query(
            "SELECT app_id, dimensions, centroid, sample_count, batches, updated_at FROM embedding_baselines",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_baseline).collect()
    }

    async fn save_cycle_report(&self, report: &CycleReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycle_reports (id, started_at, finished_at, report)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(report.id)
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(Json(report))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn row_to_telemetry(row: &PgRow) -> Result<TelemetryRecord> {
    let metadata: Option<Json<Metadata>> = row.try_get("metadata")?;
    Ok(TelemetryRecord {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        model_name: row.try_get("model_name")?,
        prompt: row.try_get("prompt")?,
        response: row.try_get("response")?,
        latency_ms: row.try_get("latency_ms")?,
        metadata: metadata.map(|m| m.0).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_baseline(row: &PgRow) -> Result<EmbeddingBaseline> {
    let dimensions: i32 = row.try_get("dimensions")?;
    Ok(EmbeddingBaseline {
        app_id: row.try_get("app_id")?,
        dimensions: usize::try_from(dimensions)
            .map_err(|e| Error::persistence(format!("bad dimensions: {e}")))?,
        centroid: row.try_get("centroid")?,
        sample_count: from_i64(row.try_get("sample_count")?),
        batches: from_i64(row.try_get("batches")?),
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_alert(row: &PgRow) -> Result<Alert> {
    let state: String = row.try_get("state")?;
    let severity: String = row.try_get("severity")?;
    Ok(Alert {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        app_id: row.try_get("app_id")?,
        state: AlertState::parse(&state)
            .ok_or_else(|| Error::persistence(format!("unknown alert state '{state}'")))?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| Error::persistence(format!("unknown severity '{severity}'")))?,
        first_triggered_at: row.try_get("first_triggered_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        resolved_at: row.try_get("resolved_at")?,
        last_value: row.try_get("last_value")?,
        threshold: row.try_get("threshold")?,
        clean_cycles: u32::try_from(row.try_get::<i32, _>("clean_cycles")?).unwrap_or(0),
        message: row.try_get("message")?,
    })
}
