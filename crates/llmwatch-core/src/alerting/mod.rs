//! Alerting for llmwatch
//!
//! Turns metric snapshots into alert lifecycle changes. Delivery of
//! notifications is left to whoever consumes the transitions.

mod engine;

pub use engine::{step, AlertEngine, AlertReport, Step};
