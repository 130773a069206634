//! Quality evaluation of telemetry records

mod evaluator;

pub use evaluator::{EvaluationBatch, Evaluator, EvaluatorSettings};
