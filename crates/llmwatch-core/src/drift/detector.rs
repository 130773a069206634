//! Per-application baselines and drift scoring

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::math::{centroid, cosine_distance, norm};
use crate::config::DriftConfig;
use crate::error::Error;
use crate::models::{DriftMetric, Embedding, EmbeddingBaseline};

impl EmbeddingBaseline {
    /// An empty baseline for an app
    pub fn empty(app_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            app_id: app_id.into(),
            dimensions,
            centroid: vec![0.0; dimensions],
            sample_count: 0,
            batches: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether nothing has been absorbed yet
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Fold a window centroid of `count` embeddings into the baseline.
    ///
    /// Below `min_samples` the centroid is the cumulative mean of everything
    /// seen; after that each batch moves it by `smoothing`.
    fn absorb(&mut self, window: &[f64], count: u64, config: &DriftConfig) {
        if self.sample_count < config.min_samples {
            let total = (self.sample_count + count) as f64;
            let kept = self.sample_count as f64 / total;
            let added = count as f64 / total;
            for (c, w) in self.centroid.iter_mut().zip(window) {
                *c = *c * kept + w * added;
            }
        } else {
            let alpha = config.smoothing;
            for (c, w) in self.centroid.iter_mut().zip(window) {
                *c = *c * (1.0 - alpha) + w * alpha;
            }
        }
        self.sample_count += count;
        self.batches += 1;
        self.updated_at = Utc::now();
    }
}

/// Owns every app's baseline.
///
/// Updates for one app are serialized through its map entry; different apps
/// never block each other.
pub struct DriftDetector {
    config: DriftConfig,
    dimensions: usize,
    baselines: DashMap<String, EmbeddingBaseline>,
}

impl DriftDetector {
    /// Create a detector with no baselines
    pub fn new(config: DriftConfig, dimensions: usize) -> Self {
        Self {
            config,
            dimensions,
            baselines: DashMap::new(),
        }
    }

    /// Expected embedding length
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Load previously persisted baselines. Returns how many were accepted.
    pub fn restore(&self, baselines: Vec<EmbeddingBaseline>) -> usize {
        let mut restored = 0;
        for baseline in baselines {
            if baseline.dimensions != self.dimensions || baseline.centroid.len() != self.dimensions {
                warn!(
                    app_id = %baseline.app_id,
                    stored = baseline.dimensions,
                    expected = self.dimensions,
                    "Discarding baseline with different dimensionality"
                );
                continue;
            }
            self.baselines.insert(baseline.app_id.clone(), baseline);
            restored += 1;
        }
        restored
    }

    /// Copy of one app's baseline
    pub fn baseline(&self, app_id: &str) -> Option<EmbeddingBaseline> {
        self.baselines.get(app_id).map(|b| b.clone())
    }

    /// Copy of every baseline
    pub fn baselines(&self) -> Vec<EmbeddingBaseline> {
        self.baselines.iter().map(|b| b.value().clone()).collect()
    }

    /// Score a window of embeddings against the app's baseline, then fold it in.
    ///
    /// Returns None while the baseline holds fewer than `min_samples`
    /// embeddings (this window included), when no embedding in the window is
    /// usable, or when the distance is undefined.
    pub fn update_and_score(
        &self,
        app_id: &str,
        embeddings: &[Embedding],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<DriftMetric> {
        let valid = self.valid_vectors(app_id, embeddings);
        if valid.is_empty() {
            debug!(app_id, received = embeddings.len(), "No usable embeddings in window");
            return None;
        }
        let window = centroid(&valid)?;
        let count = valid.len() as u64;

        let mut baseline = self
            .baselines
            .entry(app_id.to_string())
            .or_insert_with(|| EmbeddingBaseline::empty(app_id, self.dimensions));

        let distance = if baseline.is_empty() {
            (norm(&window) > 0.0).then_some(0.0)
        } else {
            cosine_distance(&baseline.centroid, &window)
        };
        baseline.absorb(&window, count, &self.config);

        let baseline_samples = baseline.sample_count;
        drop(baseline);

        if baseline_samples < self.config.min_samples {
            debug!(
                app_id,
                samples = baseline_samples,
                min_samples = self.config.min_samples,
                "Baseline still warming up"
            );
            return None;
        }

        let Some(distance) = distance else {
            warn!(app_id, "Drift distance undefined for zero-norm centroid");
            return None;
        };

        Some(DriftMetric {
            app_id: app_id.to_string(),
            window_start,
            window_end,
            distance,
            sample_count: count,
            baseline_samples,
        })
    }

    fn valid_vectors(&self, app_id: &str, embeddings: &[Embedding]) -> Vec<Vec<f64>> {
        let mut valid = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            if embedding.len() != self.dimensions {
                let err = Error::contract(format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.dimensions
                ));
                warn!(app_id, error = %err, "Excluding embedding");
                continue;
            }
            let vector: Vec<f64> = embedding.iter().map(|&x| f64::from(x)).collect();
            let n = norm(&vector);
            if n == 0.0 || !n.is_finite() {
                debug!(app_id, "Excluding zero or non-finite embedding");
                continue;
            }
            valid.push(vector);
        }
        valid
    }
}
