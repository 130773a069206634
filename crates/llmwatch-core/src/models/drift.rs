//! Drift data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embedding vector as returned by the embedding oracle
pub type Embedding = Vec<f32>;

/// Rolling summary of an application's output embeddings.
///
/// Holds a single centroid, so memory stays O(dimensions) however much
/// traffic the application sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingBaseline {
    /// Application this baseline belongs to
    pub app_id: String,

    /// Expected vector length
    pub dimensions: usize,

    /// Current centroid
    pub centroid: Vec<f64>,

    /// Total embeddings absorbed since creation
    pub sample_count: u64,

    /// Number of batches absorbed
    pub batches: u64,

    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Distance between one cycle's outputs and the app's baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetric {
    /// Application
    pub app_id: String,

    /// Earliest record contributing to the window
    pub window_start: DateTime<Utc>,

    /// Latest record contributing to the window
    pub window_end: DateTime<Utc>,

    /// Cosine distance between window centroid and baseline, in [0, 2]
    pub distance: f64,

    /// Valid embeddings in the window
    pub sample_count: u64,

    /// Embeddings absorbed by the baseline after this window
    pub baseline_samples: u64,
}
