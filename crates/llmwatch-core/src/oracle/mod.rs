//! Judge and embedding oracles
//!
//! The evaluation core treats both models as black boxes behind these traits.

mod ollama;
mod verdict;

pub use ollama::{OllamaEmbedder, OllamaJudge};
pub use verdict::{parse_verdict, JUDGE_INSTRUCTIONS};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Embedding;

/// A validated judge verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Quality score in [0, 1]; higher means more faithful
    pub score: f64,
    /// The judge's text, kept for auditing
    pub raw_output: String,
}

/// Quality-scoring oracle
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Score a prompt/response pair
    async fn score(&self, prompt: &str, response: &str) -> Result<Verdict>;
}

/// Embedding oracle
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a piece of text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Vector length this deployment produces
    fn dimensions(&self) -> usize;
}
