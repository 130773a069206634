//! Error types for llmwatch

use thiserror::Error;

/// Result type alias using llmwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for llmwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// An oracle call did not answer within its time budget
    #[error("{oracle} oracle timed out after {timeout_ms}ms")]
    OracleTimeout {
        /// Which oracle ("judge" or "embedding")
        oracle: &'static str,
        /// The budget that elapsed
        timeout_ms: u64,
    },

    /// An oracle could not be reached or answered with a non-success status
    #[error("{oracle} oracle unavailable: {reason}")]
    OracleUnavailable {
        /// Which oracle ("judge" or "embedding")
        oracle: &'static str,
        /// What went wrong
        reason: String,
    },

    /// An oracle answered, but the answer could not be turned into a valid result
    #[error("Malformed oracle response: {reason}")]
    OracleMalformedResponse {
        /// Raw text returned by the oracle, kept for auditing
        raw: String,
        /// Why it was rejected
        reason: String,
    },

    /// Input that breaks a documented contract (empty text, wrong dimensionality)
    #[error("Input contract violation: {0}")]
    InputContractViolation(String),

    /// A store write or read failed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another cycle holds the runner
    #[error("An evaluation cycle is already in progress")]
    CycleInProgress,

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an input contract violation
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::InputContractViolation(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OracleMalformedResponse {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the storage layer and may succeed on retry
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Database(_))
    }

    /// Raw oracle output carried by the error, if any
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::OracleMalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
