//! Judge-backed evaluator

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, RetryConfig};
use crate::error::Error;
use crate::models::{EvaluationRecord, TelemetryRecord};
use crate::oracle::JudgeClient;
use crate::retry::with_backoff;
use crate::store::TelemetryStore;

/// Tuning for one [`Evaluator`]
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    /// Judge calls in flight at once
    pub workers: usize,
    /// Judge attempts per record
    pub max_attempts: u32,
    /// Budget for one judge call
    pub call_timeout: Duration,
    /// Retry policy for evaluation writes
    pub persist_retry: RetryConfig,
}

impl EvaluatorSettings {
    /// Settings taken from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.evaluation.workers,
            max_attempts: config.evaluation.max_attempts,
            call_timeout: config.evaluation.call_timeout,
            persist_retry: config.runner.persist_retry.clone(),
        }
    }
}

/// What happened to a batch handed to [`Evaluator::evaluate_batch`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationBatch {
    /// Newly persisted evaluations, in input order
    pub records: Vec<EvaluationRecord>,
    /// Inputs that already had an evaluation
    pub already_evaluated: usize,
    /// Inputs left for a later cycle (deadline, store read or write failure)
    pub unfinished: usize,
    /// Evaluation writes that failed after retries
    pub persistence_errors: usize,
}

enum Outcome {
    AlreadyEvaluated,
    Unreadable,
    Judged(EvaluationRecord),
}

/// Scores telemetry records with the judge and writes the verdicts back
pub struct Evaluator {
    judge: Arc<dyn JudgeClient>,
    store: Arc<dyn TelemetryStore>,
    settings: EvaluatorSettings,
}

impl Evaluator {
    /// Create an evaluator
    pub fn new(
        judge: Arc<dyn JudgeClient>,
        store: Arc<dyn TelemetryStore>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            judge,
            store,
            settings,
        }
    }

    /// Evaluate `records` and return the evaluations newly persisted
    pub async fn evaluate(
        &self,
        records: &[TelemetryRecord],
        deadline: Instant,
    ) -> Vec<EvaluationRecord> {
        self.evaluate_batch(records, deadline).await.records
    }

    /// Evaluate `records`, reporting what could not be finished.
    ///
    /// Records already evaluated are left alone. Records still being judged
    /// when `deadline` passes are dropped without a write.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn evaluate_batch(
        &self,
        records: &[TelemetryRecord],
        deadline: Instant,
    ) -> EvaluationBatch {
        let mut batch = EvaluationBatch::default();
        let mut finished: Vec<(usize, Outcome)> = Vec::with_capacity(records.len());

        let mut judged = stream::iter(records.iter().enumerate())
            .map(|(index, record)| async move { (index, self.evaluate_one(record).await) })
            .buffer_unordered(self.settings.workers.max(1));

        let drained = timeout_at(deadline, async {
            while let Some(item) = judged.next().await {
                finished.push(item);
            }
        })
        .await;
        drop(judged);

        if drained.is_err() {
            warn!(
                finished = finished.len(),
                total = records.len(),
                "Cycle deadline reached, leaving remaining records for the next cycle"
            );
        }
        batch.unfinished = records.len() - finished.len();

        // Completion order is arbitrary; write back in input order
        finished.sort_by_key(|(index, _)| *index);

        for (_, outcome) in finished {
            let evaluation = match outcome {
                Outcome::AlreadyEvaluated => {
                    batch.already_evaluated += 1;
                    continue;
                }
                Outcome::Unreadable => {
                    batch.unfinished += 1;
                    continue;
                }
                Outcome::Judged(evaluation) => evaluation,
            };

            let store = &self.store;
            let evaluation_ref = &evaluation;
            let saved = with_backoff(&self.settings.persist_retry, "save_evaluation", || async move {
                store.save_evaluation(evaluation_ref).await
            })
            .await;

            match saved {
                Ok(true) => {
                    metrics::counter!("llmwatch_evaluations_total", "status" => evaluation.status.as_str())
                        .increment(1);
                    batch.records.push(evaluation);
                }
                Ok(false) => {
                    debug!(request_id = %evaluation.request_id, "Evaluation already stored");
                    batch.already_evaluated += 1;
                }
                Err(e) => {
                    warn!(
                        request_id = %evaluation.request_id,
                        error = %e,
                        "Failed to store evaluation, record stays in the backlog"
                    );
                    batch.persistence_errors += 1;
                    batch.unfinished += 1;
                }
            }
        }

        info!(
            persisted = batch.records.len(),
            already_evaluated = batch.already_evaluated,
            unfinished = batch.unfinished,
            "Evaluation batch complete"
        );
        batch
    }

    async fn evaluate_one(&self, record: &TelemetryRecord) -> Outcome {
        match self.store.evaluation_exists(record.id).await {
            Ok(true) => return Outcome::AlreadyEvaluated,
            Ok(false) => {}
            Err(e) => {
                warn!(request_id = %record.id, error = %e, "Could not check for an existing evaluation");
                return Outcome::Unreadable;
            }
        }

        if record.has_empty_text() {
            debug!(request_id = %record.id, "Nothing to judge");
            return Outcome::Judged(EvaluationRecord::skipped(
                record.id,
                "empty prompt or response",
            ));
        }

        Outcome::Judged(self.judge_with_retries(record).await)
    }

    async fn judge_with_retries(&self, record: &TelemetryRecord) -> EvaluationRecord {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_raw: Option<String> = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started = std::time::Instant::now();
            let result = timeout(
                self.settings.call_timeout,
                self.judge.score(&record.prompt, &record.response),
            )
            .await;
            metrics::histogram!("llmwatch_judge_call_seconds").record(started.elapsed().as_secs_f64());

            let err = match result {
                Ok(Ok(verdict)) if verdict.score.is_finite() && (0.0..=1.0).contains(&verdict.score) => {
                    return EvaluationRecord::success(record.id, verdict.score, verdict.raw_output);
                }
                Ok(Ok(verdict)) => Error::malformed(
                    verdict.raw_output,
                    format!("score {} outside [0, 1]", verdict.score),
                ),
                Ok(Err(e)) => e,
                Err(_) => Error::OracleTimeout {
                    oracle: "judge",
                    timeout_ms: self.settings.call_timeout.as_millis() as u64,
                },
            };

            if let Some(raw) = err.raw_output() {
                last_raw = Some(raw.to_string());
            }
            warn!(
                request_id = %record.id,
                attempt,
                max_attempts,
                error = %err,
                "Judge attempt failed"
            );
            last_error = err.to_string();
        }

        EvaluationRecord::failed(
            record.id,
            last_raw,
            format!("judge failed after {max_attempts} attempts: {last_error}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationStatus;
    use crate::oracle::Verdict;
    use crate::store::InMemoryStore;
    use crate::test_support::{FlakyStore, FnJudge};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> EvaluatorSettings {
        EvaluatorSettings {
            workers: 4,
            max_attempts: 3,
            call_timeout: Duration::from_secs(5),
            persist_retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 1,
                backoff_factor: 2,
                max_backoff_ms: 2,
            },
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    fn record(prompt: &str, response: &str) -> TelemetryRecord {
        TelemetryRecord::new("chatbot", "gpt-4o", prompt, response, 120.0)
    }

    #[tokio::test]
    async fn test_scores_and_persists() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::scoring(0.95));
        let evaluator = Evaluator::new(judge, store.clone(), settings());

        let input = record("What is the capital of France?", "Paris is the capital of France.");
        let persisted = evaluator.evaluate(&[input.clone()], far_deadline()).await;

        assert_eq!(persisted.len(), 1);
        let stored = store.evaluation(input.id).unwrap();
        assert_eq!(stored.status, EvaluationStatus::Success);
        assert_eq!(stored.hallucination_score, Some(0.95));
        assert!(stored.judge_raw_output.is_some());
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::scoring(0.8));
        let evaluator = Evaluator::new(judge.clone(), store.clone(), settings());
        let inputs = vec![record("a", "b"), record("c", "d")];

        assert_eq!(evaluator.evaluate(&inputs, far_deadline()).await.len(), 2);
        let calls = judge.calls();

        let batch = evaluator.evaluate_batch(&inputs, far_deadline()).await;
        assert!(batch.records.is_empty());
        assert_eq!(batch.already_evaluated, 2);
        assert_eq!(judge.calls(), calls);
        assert_eq!(store.evaluations().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped_without_judging() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::scoring(0.8));
        let evaluator = Evaluator::new(judge.clone(), store.clone(), settings());

        let persisted = evaluator
            .evaluate(&[record("  ", "answer"), record("question", "")], far_deadline())
            .await;

        assert_eq!(persisted.len(), 2);
        assert!(persisted
            .iter()
            .all(|e| e.status == EvaluationStatus::Skipped && e.hallucination_score.is_none()));
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_then_valid_succeeds() {
        let store = Arc::new(InMemoryStore::new());
        let attempts = AtomicU32::new(0);
        let judge = Arc::new(FnJudge::new(move |_, _| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::malformed("looks fine", "no score"))
            } else {
                Ok(Verdict {
                    score: 0.7,
                    raw_output: r#"{"score": 0.7}"#.to_string(),
                })
            }
        }));
        let evaluator = Evaluator::new(judge.clone(), store.clone(), settings());

        let persisted = evaluator.evaluate(&[record("q", "a")], far_deadline()).await;
        assert_eq!(persisted[0].status, EvaluationStatus::Success);
        assert_eq!(persisted[0].hallucination_score, Some(0.7));
        assert_eq!(judge.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_with_last_raw_output() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::new(|_, _| {
            Err(Error::malformed("I'd say it is fine", "no score found"))
        }));
        let evaluator = Evaluator::new(judge.clone(), store.clone(), settings());

        let persisted = evaluator.evaluate(&[record("q", "a")], far_deadline()).await;
        let failed = &persisted[0];
        assert_eq!(failed.status, EvaluationStatus::Failed);
        assert_eq!(failed.hallucination_score, None);
        assert_eq!(failed.judge_raw_output.as_deref(), Some("I'd say it is fine"));
        assert_eq!(judge.calls(), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_verdict_counts_as_malformed() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::new(|_, _| {
            Ok(Verdict {
                score: 4.0,
                raw_output: "4".to_string(),
            })
        }));
        let evaluator = Evaluator::new(judge, store.clone(), settings());

        let persisted = evaluator.evaluate(&[record("q", "a")], far_deadline()).await;
        assert_eq!(persisted[0].status, EvaluationStatus::Failed);
        assert_eq!(persisted[0].judge_raw_output.as_deref(), Some("4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_judge_times_out_each_attempt() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::scoring(0.9).with_delay(Duration::from_secs(30)));
        let evaluator = Evaluator::new(judge.clone(), store.clone(), settings());

        let persisted = evaluator.evaluate(&[record("q", "a")], far_deadline()).await;
        assert_eq!(persisted[0].status, EvaluationStatus::Failed);
        assert!(persisted[0].detail.as_deref().unwrap().contains("timed out"));
        assert_eq!(judge.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_leaves_records_unevaluated() {
        let store = Arc::new(InMemoryStore::new());
        let judge = Arc::new(FnJudge::scoring(0.9).with_delay(Duration::from_secs(2)));
        let evaluator = Evaluator::new(
            judge,
            store.clone(),
            EvaluatorSettings {
                workers: 1,
                ..settings()
            },
        );
        let inputs = vec![record("a", "1"), record("b", "2"), record("c", "3")];

        let batch = evaluator
            .evaluate_batch(&inputs, Instant::now() + Duration::from_secs(3))
            .await;

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].request_id, inputs[0].id);
        assert_eq!(batch.unfinished, 2);
        assert!(store.evaluation(inputs[1].id).is_none());
        assert!(store.evaluation(inputs[2].id).is_none());
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let store = Arc::new(InMemoryStore::new());
        // Later inputs answer faster
        let judge = Arc::new(FnJudge::scoring(0.9).with_delay_fn(|prompt: &str| {
            Duration::from_millis(40 - 10 * prompt.parse::<u64>().unwrap_or(0))
        }));
        let evaluator = Evaluator::new(judge, store.clone(), settings());
        let inputs: Vec<_> = (0..4).map(|i| record(&i.to_string(), "answer")).collect();

        let persisted = evaluator.evaluate(&inputs, far_deadline()).await;
        assert_eq!(
            persisted.iter().map(|e| e.request_id).collect::<Vec<_>>(),
            inputs.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_write_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let judge = Arc::new(FnJudge::scoring(0.9));
        let evaluator = Evaluator::new(judge, store.clone(), settings());
        let input = record("q", "a");

        let batch = evaluator.evaluate_batch(&[input.clone()], far_deadline()).await;
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.persistence_errors, 0);
        assert!(store.inner().evaluation(input.id).is_some());
    }

    #[tokio::test]
    async fn test_exhausted_write_leaves_record_in_backlog() {
        let store = Arc::new(FlakyStore::new(10));
        let judge = Arc::new(FnJudge::scoring(0.9));
        let evaluator = Evaluator::new(judge, store.clone(), settings());
        let input = record("q", "a");
        store.inner().append(input.clone());

        let batch = evaluator.evaluate_batch(&[input.clone()], far_deadline()).await;
        assert!(batch.records.is_empty());
        assert_eq!(batch.persistence_errors, 1);
        assert_eq!(batch.unfinished, 1);
        assert_eq!(store.fetch_unevaluated(10).await.unwrap().len(), 1);
    }
}
