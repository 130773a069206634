//! Data models for llmwatch

mod alert;
mod cycle;
mod drift;
mod evaluation;
mod metrics;
mod telemetry;

pub use self::alert::*;
pub use self::cycle::*;
pub use self::drift::*;
pub use self::evaluation::*;
pub use self::metrics::*;
pub use self::telemetry::*;
