//! # llmwatch
//!
//! Quality evaluation, drift detection and alerting for LLM telemetry.
//!
//! Applications append request/response telemetry to a store. llmwatch
//! works through that backlog in cycles:
//!
//! - **Evaluator**: scores each record with a judge model, with retries and
//!   at-most-once persistence
//! - **Drift**: keeps a rolling embedding centroid per application and
//!   reports how far each cycle's outputs have moved from it
//! - **Alerting**: opens, escalates and resolves alerts from per-app metric
//!   snapshots, with hysteresis
//! - **Runner**: drives one cycle end to end under a time budget
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a single cycle against the configured store
//! llmwatch once
//!
//! # Run cycles on the configured interval
//! llmwatch run
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod alerting;
pub mod config;
pub mod drift;
pub mod error;
pub mod evaluation;
pub mod models;
pub mod oracle;
pub mod retry;
pub mod runner;
pub mod store;

#[cfg(test)]
mod test_support;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::runner::Runner;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEngine, AlertReport};
    pub use crate::config::Config;
    pub use crate::drift::DriftDetector;
    pub use crate::error::{Error, Result};
    pub use crate::evaluation::{Evaluator, EvaluatorSettings};
    pub use crate::models::*;
    pub use crate::oracle::{EmbeddingClient, JudgeClient, Verdict};
    pub use crate::runner::Runner;
    pub use crate::store::{open_store, InMemoryStore, TelemetryStore};
}
