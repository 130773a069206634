//! Oracle and store doubles for unit tests

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Alert, CycleReport, DriftMetric, Embedding, EmbeddingBaseline, EvaluationRecord,
    TelemetryRecord,
};
use crate::oracle::{EmbeddingClient, JudgeClient, Verdict};
use crate::store::{InMemoryStore, TelemetryStore};

type JudgeFn = dyn Fn(&str, &str) -> Result<Verdict> + Send + Sync;
type DelayFn = dyn Fn(&str) -> Duration + Send + Sync;

/// Judge answering through a closure of (prompt, response)
pub struct FnJudge {
    answer: Box<JudgeFn>,
    delay: Option<Box<DelayFn>>,
    calls: AtomicUsize,
}

impl FnJudge {
    pub fn new<F>(answer: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Verdict> + Send + Sync + 'static,
    {
        Self {
            answer: Box::new(answer),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns `score`
    pub fn scoring(score: f64) -> Self {
        Self::new(move |_, _| {
            Ok(Verdict {
                score,
                raw_output: format!(r#"{{"score": {score}, "reasoning": "test"}}"#),
            })
        })
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    /// Delay chosen from the prompt
    pub fn with_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JudgeClient for FnJudge {
    async fn score(&self, prompt: &str, response: &str) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(prompt)).await;
        }
        (self.answer)(prompt, response)
    }
}

/// Embedder answering through a closure of the text
pub struct FnEmbedder {
    embed: Box<dyn Fn(&str) -> Result<Embedding> + Send + Sync>,
    dimensions: usize,
}

impl FnEmbedder {
    pub fn new<F>(dimensions: usize, embed: F) -> Self
    where
        F: Fn(&str) -> Result<Embedding> + Send + Sync + 'static,
    {
        Self {
            embed: Box::new(embed),
            dimensions,
        }
    }

    /// Same vector for every text
    pub fn constant(vector: Embedding) -> Self {
        let dimensions = vector.len();
        Self::new(dimensions, move |_| Ok(vector.clone()))
    }
}

#[async_trait]
impl EmbeddingClient for FnEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        (self.embed)(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// In-memory store whose next writes fail on demand
pub struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicU32,
    alert_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures: AtomicU32::new(failures),
            alert_failures: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail the next `failures` alert writes only
    pub fn fail_alert_writes(&self, failures: u32) {
        self.alert_failures.store(failures, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<()> {
        take_failure(&self.failures)
    }
}

fn take_failure(counter: &AtomicU32) -> Result<()> {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(Error::persistence("injected write failure")),
        Err(_) => Ok(()),
    }
}

#[async_trait]
impl TelemetryStore for FlakyStore {
    async fn fetch_unevaluated(&self, limit: usize) -> Result<Vec<TelemetryRecord>> {
        self.inner.fetch_unevaluated(limit).await
    }

    async fn fetch_recent(
        &self,
        app_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>> {
        self.inner.fetch_recent(app_id, since).await
    }

    async fn evaluation_exists(&self, request_id: Uuid) -> Result<bool> {
        self.inner.evaluation_exists(request_id).await
    }

    async fn save_evaluation(&self, evaluation: &EvaluationRecord) -> Result<bool> {
        self.maybe_fail()?;
        self.inner.save_evaluation(evaluation).await
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        take_failure(&self.alert_failures)?;
        self.maybe_fail()?;
        self.inner.save_alert(alert).await
    }

    async fn load_open_alerts(&self) -> Result<Vec<Alert>> {
        self.inner.load_open_alerts().await
    }

    async fn save_drift_metric(&self, metric: &DriftMetric) -> Result<()> {
        self.maybe_fail()?;
        self.inner.save_drift_metric(metric).await
    }

    async fn save_baseline(&self, baseline: &EmbeddingBaseline) -> Result<()> {
        self.maybe_fail()?;
        self.inner.save_baseline(baseline).await
    }

    async fn load_baselines(&self) -> Result<Vec<EmbeddingBaseline>> {
        self.inner.load_baselines().await
    }

    async fn save_cycle_report(&self, report: &CycleReport) -> Result<()> {
        self.maybe_fail()?;
        self.inner.save_cycle_report(report).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}
