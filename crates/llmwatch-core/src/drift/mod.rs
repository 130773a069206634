//! Embedding drift detection
//!
//! Each application gets a rolling centroid of its output embeddings. A
//! cycle's outputs are compared against it with cosine distance.

mod detector;
mod math;

pub use detector::DriftDetector;
pub use math::{centroid, cosine_distance, norm};
