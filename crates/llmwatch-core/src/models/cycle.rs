//! Cycle report model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::{AlertTransition, SkippedRule};

/// Outcome of one evaluation cycle. Persisted so that skipped rules and
/// failures stay visible after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Unique identifier
    pub id: Uuid,

    /// When the cycle started
    pub started_at: DateTime<Utc>,

    /// When the cycle finished
    pub finished_at: DateTime<Utc>,

    /// Records pulled from the backlog
    pub fetched: usize,

    /// Evaluations persisted with a score
    pub succeeded: usize,

    /// Evaluations persisted as failed
    pub failed: usize,

    /// Evaluations persisted as skipped
    pub skipped: usize,

    /// Records left for a later cycle (deadline or write failure)
    pub unfinished: usize,

    /// Drift metrics emitted
    pub drift_metrics: usize,

    /// Alert lifecycle changes
    pub transitions: Vec<AlertTransition>,

    /// Rules skipped for missing data
    pub skipped_rules: Vec<SkippedRule>,

    /// Writes that failed after retries
    pub persistence_errors: usize,
}

impl CycleReport {
    /// Start a report for a cycle beginning now
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            fetched: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            unfinished: 0,
            drift_metrics: 0,
            transitions: Vec::new(),
            skipped_rules: Vec::new(),
            persistence_errors: 0,
        }
    }
}
