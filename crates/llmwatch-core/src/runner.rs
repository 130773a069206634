//! Evaluation cycle runner
//!
//! One cycle pulls the unevaluated backlog, judges it, updates drift
//! baselines, assembles a metric snapshot and runs the alert rules over it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::alerting::AlertEngine;
use crate::config::{Config, EvaluationConfig, RunnerConfig};
use crate::drift::DriftDetector;
use crate::error::{Error, Result};
use crate::evaluation::{Evaluator, EvaluatorSettings};
use crate::models::{
    Alert, AlertRule, CycleReport, Embedding, EvaluationStatus, MetricSnapshot, TelemetryRecord,
};
use crate::oracle::{EmbeddingClient, JudgeClient};
use crate::retry::with_backoff;
use crate::store::TelemetryStore;

/// Drives evaluation cycles against one store
pub struct Runner {
    store: Arc<dyn TelemetryStore>,
    embedder: Arc<dyn EmbeddingClient>,
    evaluator: Evaluator,
    drift: DriftDetector,
    alerts: AlertEngine,
    rules: Vec<AlertRule>,
    evaluation: EvaluationConfig,
    runner: RunnerConfig,
    lookback: chrono::Duration,
    cycle_lock: tokio::sync::Mutex<()>,
    pending_alerts: Mutex<HashMap<Uuid, Alert>>,
}

impl Runner {
    /// Build a runner. Fails when the configuration does not validate.
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        judge: Arc<dyn JudgeClient>,
        embedder: Arc<dyn EmbeddingClient>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let rules = config.alert_rules()?;
        let lookback = chrono::Duration::from_std(config.evaluation.lookback)
            .map_err(|e| Error::config(format!("evaluation.lookback: {e}")))?;
        let evaluator = Evaluator::new(
            judge,
            Arc::clone(&store),
            EvaluatorSettings::from_config(config),
        );
        let drift = DriftDetector::new(config.drift.clone(), embedder.dimensions());

        Ok(Self {
            store,
            embedder,
            evaluator,
            drift,
            alerts: AlertEngine::new(),
            rules,
            evaluation: config.evaluation.clone(),
            runner: config.runner.clone(),
            lookback,
            cycle_lock: tokio::sync::Mutex::new(()),
            pending_alerts: Mutex::new(HashMap::new()),
        })
    }

    /// Load persisted baselines and open alerts
    pub async fn initialize(&self) -> Result<()> {
        let baselines = self.store.load_baselines().await?;
        let total = baselines.len();
        let restored = self.drift.restore(baselines);

        let open = self.store.load_open_alerts().await?;
        let open_count = open.len();
        let tracked = self.alerts.restore(open, &self.rules);

        info!(
            baselines = restored,
            discarded_baselines = total - restored,
            open_alerts = tracked,
            discarded_alerts = open_count - tracked,
            rules = self.rules.len(),
            "Runner state restored"
        );
        Ok(())
    }

    /// Rules in effect
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Alerts currently open
    pub fn open_alerts(&self) -> Vec<Alert> {
        self.alerts.open_alerts()
    }

    /// Drift detector holding the baselines
    pub fn drift(&self) -> &DriftDetector {
        &self.drift
    }

    /// Run cycles every `runner.interval` until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.runner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.runner.interval, budget = ?self.runner.cycle_budget, "Starting evaluation loop");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Evaluation loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Evaluation cycle failed");
                    }
                }
            }
        }
    }

    /// Run one cycle within the configured budget
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.run_cycle(Instant::now() + self.runner.cycle_budget).await
    }

    /// Run one cycle. Oracle calls still pending at `deadline` are abandoned.
    ///
    /// Returns [`Error::CycleInProgress`] when another cycle holds the runner.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self, deadline: Instant) -> Result<CycleReport> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| Error::CycleInProgress)?;
        let started = StdInstant::now();
        let mut report = CycleReport::begin();

        self.flush_pending_alerts(&mut report).await;

        let retry = &self.runner.persist_retry;
        let store = &self.store;
        let batch_size = self.evaluation.batch_size;
        let backlog = with_backoff(retry, "fetch_unevaluated", || async move {
            store.fetch_unevaluated(batch_size).await
        })
        .await?;
        report.fetched = backlog.len();
        debug!(fetched = backlog.len(), "Fetched backlog");

        let batch = self.evaluator.evaluate_batch(&backlog, deadline).await;
        report.unfinished = batch.unfinished;
        report.persistence_errors += batch.persistence_errors;
        for evaluation in &batch.records {
            match evaluation.status {
                EvaluationStatus::Success => report.succeeded += 1,
                EvaluationStatus::Failed => report.failed += 1,
                EvaluationStatus::Skipped => report.skipped += 1,
            }
        }

        let by_id: HashMap<Uuid, &TelemetryRecord> = backlog.iter().map(|r| (r.id, r)).collect();
        let scored: Vec<(&TelemetryRecord, f64)> = batch
            .records
            .iter()
            .filter(|e| e.is_success())
            .filter_map(|e| Some((*by_id.get(&e.request_id)?, e.hallucination_score?)))
            .collect();

        let mut snapshot = MetricSnapshot::new(Utc::now());

        let mut scores: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (record, score) in &scored {
            scores.entry(record.app_id.as_str()).or_default().push(*score);
        }
        for (app_id, app_scores) in &scores {
            let aggregate = self.evaluation.score_aggregation.apply(app_scores);
            snapshot.app_mut(app_id).hallucination_score = aggregate;
        }

        let records: Vec<&TelemetryRecord> = scored.iter().map(|(r, _)| *r).collect();
        let embedded = self.embed_responses(&records, deadline).await;
        self.update_drift(embedded, &mut snapshot, &mut report).await;

        let mut apps: BTreeSet<String> = backlog.iter().map(|r| r.app_id.clone()).collect();
        apps.extend(self.alerts.apps_with_open_alerts());
        let since = snapshot.taken_at - self.lookback;
        for app_id in &apps {
            match self.store.fetch_recent(app_id, since).await {
                Ok(recent) => snapshot.app_mut(app_id).record_traffic(&recent),
                Err(e) => {
                    warn!(app_id = %app_id, error = %e, "Could not load recent telemetry");
                    snapshot.app_mut(app_id);
                }
            }
        }

        let alert_report = self.alerts.evaluate(&self.rules, &snapshot);
        for transition in &alert_report.transitions {
            metrics::counter!(
                "llmwatch_alert_transitions_total",
                "rule" => transition.rule_id.clone(),
                "to" => format!("{:?}", transition.to_state)
            )
            .increment(1);
        }
        for alert in &alert_report.changed {
            self.save_alert(alert, &mut report).await;
        }
        report.transitions = alert_report.transitions;
        report.skipped_rules = alert_report.skipped;

        report.finished_at = Utc::now();
        let report_ref = &report;
        let saved = with_backoff(retry, "save_cycle_report", || async move {
            store.save_cycle_report(report_ref).await
        })
        .await;
        if let Err(e) = saved {
            warn!(error = %e, "Failed to store cycle report");
            report.persistence_errors += 1;
        }

        let elapsed = started.elapsed();
        metrics::histogram!("llmwatch_cycle_duration_seconds").record(elapsed.as_secs_f64());
        metrics::gauge!("llmwatch_open_alerts").set(self.alerts.open_alerts().len() as f64);
        info!(
            cycle_id = %report.id,
            fetched = report.fetched,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            unfinished = report.unfinished,
            drift_metrics = report.drift_metrics,
            transitions = report.transitions.len(),
            skipped_rules = report.skipped_rules.len(),
            persistence_errors = report.persistence_errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle complete"
        );

        Ok(report)
    }

    /// Embed responses concurrently; failures are logged and dropped
    async fn embed_responses<'a>(
        &self,
        records: &[&'a TelemetryRecord],
        deadline: Instant,
    ) -> Vec<(&'a TelemetryRecord, Embedding)> {
        let call_timeout = self.evaluation.call_timeout;
        let mut embedded: Vec<(usize, &'a TelemetryRecord, Embedding)> = Vec::new();

        let mut calls = stream::iter(records.iter().copied().enumerate())
            .map(|(index, record)| async move {
                let result = timeout(call_timeout, self.embedder.embed(&record.response)).await;
                (index, record, result)
            })
            .buffer_unordered(self.evaluation.workers.max(1));

        let drained = timeout_at(deadline, async {
            while let Some((index, record, result)) = calls.next().await {
                match result {
                    Ok(Ok(vector)) => embedded.push((index, record, vector)),
                    Ok(Err(e)) => {
                        warn!(request_id = %record.id, error = %e, "Embedding failed, excluding from drift");
                    }
                    Err(_) => {
                        warn!(
                            request_id = %record.id,
                            timeout_ms = call_timeout.as_millis() as u64,
                            "Embedding timed out, excluding from drift"
                        );
                    }
                }
            }
        })
        .await;
        drop(calls);

        if drained.is_err() {
            warn!(
                embedded = embedded.len(),
                total = records.len(),
                "Cycle deadline reached while embedding"
            );
        }

        embedded.sort_by_key(|(index, _, _)| *index);
        embedded
            .into_iter()
            .map(|(_, record, vector)| (record, vector))
            .collect()
    }

    async fn update_drift(
        &self,
        embedded: Vec<(&TelemetryRecord, Embedding)>,
        snapshot: &mut MetricSnapshot,
        report: &mut CycleReport,
    ) {
        let mut windows: BTreeMap<&str, Vec<(&TelemetryRecord, Embedding)>> = BTreeMap::new();
        for (record, vector) in embedded {
            windows
                .entry(record.app_id.as_str())
                .or_default()
                .push((record, vector));
        }

        let retry = &self.runner.persist_retry;
        let store = &self.store;
        for (app_id, window) in windows {
            let Some(window_start) = window.iter().map(|(r, _)| r.created_at).min() else {
                continue;
            };
            let window_end = window
                .iter()
                .map(|(r, _)| r.created_at)
                .max()
                .unwrap_or(window_start);
            let vectors: Vec<Embedding> = window.into_iter().map(|(_, v)| v).collect();

            if let Some(metric) =
                self.drift
                    .update_and_score(app_id, &vectors, window_start, window_end)
            {
                metrics::gauge!("llmwatch_drift_distance", "app" => app_id.to_string())
                    .set(metric.distance);
                snapshot.app_mut(app_id).drift_distance = Some(metric.distance);
                report.drift_metrics += 1;

                let metric_ref = &metric;
                if let Err(e) = with_backoff(retry, "save_drift_metric", || async move {
                    store.save_drift_metric(metric_ref).await
                })
                .await
                {
                    warn!(app_id, error = %e, "Failed to store drift metric");
                    report.persistence_errors += 1;
                }
            }

            if let Some(baseline) = self.drift.baseline(app_id) {
                let baseline_ref = &baseline;
                if let Err(e) = with_backoff(retry, "save_baseline", || async move {
                    store.save_baseline(baseline_ref).await
                })
                .await
                {
                    warn!(app_id, error = %e, "Failed to store baseline");
                    report.persistence_errors += 1;
                }
            }
        }
    }

    /// Write an alert; on failure keep it for the next cycle
    async fn save_alert(&self, alert: &Alert, report: &mut CycleReport) {
        let store = &self.store;
        let saved = with_backoff(&self.runner.persist_retry, "save_alert", || async move {
            store.save_alert(alert).await
        })
        .await;

        let mut pending = self.pending_alerts.lock();
        match saved {
            Ok(()) => {
                pending.remove(&alert.id);
            }
            Err(e) => {
                warn!(
                    alert_id = %alert.id,
                    rule_id = %alert.rule_id,
                    app_id = %alert.app_id,
                    error = %e,
                    "Failed to store alert, will retry next cycle"
                );
                report.persistence_errors += 1;
                pending.insert(alert.id, alert.clone());
            }
        }
    }

    async fn flush_pending_alerts(&self, report: &mut CycleReport) {
        let pending: Vec<Alert> = self.pending_alerts.lock().values().cloned().collect();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Retrying alert writes from the previous cycle");
        for alert in &pending {
            self.save_alert(alert, report).await;
        }
    }

    /// Alert writes waiting for a retry
    pub fn pending_alert_writes(&self) -> usize {
        self.pending_alerts.lock().len()
    }
}
