//! Evaluation record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of judging one telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    /// The judge produced a valid score
    Success,
    /// Every attempt failed; no score
    Failed,
    /// Nothing to judge (blank prompt or response)
    Skipped,
}

impl EvaluationStatus {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Quality verdict for one telemetry record. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// The telemetry record this evaluates (unique)
    pub request_id: Uuid,

    /// Judge score in [0, 1]; present only on success
    pub hallucination_score: Option<f64>,

    /// Last raw judge output, kept for auditing
    pub judge_raw_output: Option<String>,

    /// When the verdict was reached
    pub evaluated_at: DateTime<Utc>,

    /// Outcome
    pub status: EvaluationStatus,

    /// Why the record failed or was skipped
    pub detail: Option<String>,
}

impl EvaluationRecord {
    /// A scored record
    pub fn success(request_id: Uuid, score: f64, raw: impl Into<String>) -> Self {
        Self {
            request_id,
            hallucination_score: Some(score),
            judge_raw_output: Some(raw.into()),
            evaluated_at: Utc::now(),
            status: EvaluationStatus::Success,
            detail: None,
        }
    }

    /// A record whose judge attempts were exhausted
    pub fn failed(request_id: Uuid, raw: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            request_id,
            hallucination_score: None,
            judge_raw_output: raw,
            evaluated_at: Utc::now(),
            status: EvaluationStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    /// A record with nothing to judge
    pub fn skipped(request_id: Uuid, detail: impl Into<String>) -> Self {
        Self {
            request_id,
            hallucination_score: None,
            judge_raw_output: None,
            evaluated_at: Utc::now(),
            status: EvaluationStatus::Skipped,
            detail: Some(detail.into()),
        }
    }

    /// Whether the judge produced a usable score
    pub fn is_success(&self) -> bool {
        self.status == EvaluationStatus::Success
    }
}
