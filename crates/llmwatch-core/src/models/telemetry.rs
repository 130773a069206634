//! Telemetry record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached by the producing application.
///
/// Carried through storage untouched; nothing in the evaluation core reads it.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One captured LLM request/response, as appended by the ingestion side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Application identifier (e.g., "chatbot", "code_assistant")
    pub app_id: String,

    /// Model that produced the response (e.g., "gpt-4o", "llama3:8b")
    pub model_name: String,

    /// User input sent to the model
    pub prompt: String,

    /// Model output
    pub response: String,

    /// End-to-end latency in milliseconds
    pub latency_ms: f64,

    /// Additional context (user_id, session, tags)
    #[serde(default)]
    pub metadata: Metadata,

    /// When the request was received
    pub created_at: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Create a record stamped with a fresh id and the current time
    pub fn new(
        app_id: impl Into<String>,
        model_name: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            model_name: model_name.into(),
            prompt: prompt.into(),
            response: response.into(),
            latency_ms: latency_ms.max(0.0),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    /// Override the creation time
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether either side of the exchange is blank
    pub fn has_empty_text(&self) -> bool {
        self.prompt.trim().is_empty() || self.response.trim().is_empty()
    }

    /// Whether the model produced no output
    pub fn is_error(&self) -> bool {
        self.response.trim().is_empty()
    }
}
