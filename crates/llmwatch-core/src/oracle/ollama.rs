//! Ollama-backed judge and embedding oracles

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::verdict::{judge_prompt, parse_verdict};
use super::{EmbeddingClient, JudgeClient, Verdict};
use crate::config::{EmbeddingConfig, JudgeConfig};
use crate::error::{Error, Result};
use crate::models::Embedding;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Map transport failures onto the oracle error taxonomy
fn transport_error(oracle: &'static str, timeout: Duration, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::OracleTimeout {
            oracle,
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        Error::OracleUnavailable {
            oracle,
            reason: err.to_string(),
        }
    }
}

async fn check_status(oracle: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::OracleUnavailable {
        oracle,
        reason: format!("Ollama returned {status}: {body}"),
    })
}

async fn ping(client: &Client, base_url: &str) -> Result<()> {
    let url = format!("{base_url}/api/tags");
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| Error::OracleUnavailable {
            oracle: "ollama",
            reason: e.to_string(),
        })?;
    check_status("ollama", response).await?;
    Ok(())
}

/// Judge backed by an Ollama chat model
pub struct OllamaJudge {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaJudge {
    /// Create a judge client
    pub fn new(config: &JudgeConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }

    /// Check that the Ollama server answers
    pub async fn health_check(&self) -> Result<()> {
        ping(&self.client, &self.base_url).await
    }
}

#[async_trait]
impl JudgeClient for OllamaJudge {
    async fn score(&self, prompt: &str, response: &str) -> Result<Verdict> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: judge_prompt(prompt, response),
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.0 },
        };

        let reply = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("judge", self.timeout, e))?;
        let reply = check_status("judge", reply).await?;

        let body = reply
            .text()
            .await
            .map_err(|e| transport_error("judge", self.timeout, e))?;
        let generated: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(body.clone(), format!("unexpected Ollama payload: {e}")))?;

        debug!(model = %self.model, chars = generated.response.len(), "Judge replied");
        parse_verdict(&generated.response)
    }
}

/// Embedding oracle backed by an Ollama embedding model
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OllamaEmbedder {
    /// Create an embedding client
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout,
        })
    }

    /// Check that the Ollama server answers
    pub async fn health_check(&self) -> Result<()> {
        ping(&self.client, &self.base_url).await
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(Error::contract("cannot embed empty text"));
        }

        let reply = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| transport_error("embedding", self.timeout, e))?;
        let reply = check_status("embedding", reply).await?;

        let body = reply
            .text()
            .await
            .map_err(|e| transport_error("embedding", self.timeout, e))?;
        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(body.clone(), format!("unexpected Ollama payload: {e}")))?;

        let Some(vector) = parsed.embeddings.into_iter().next() else {
            return Err(Error::malformed(body, "no embedding returned"));
        };
        if vector.len() != self.dimensions {
            warn!(
                model = %self.model,
                expected = self.dimensions,
                actual = vector.len(),
                "Embedding dimensionality differs from configuration"
            );
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn judge_for(server: &MockServer) -> OllamaJudge {
        let config = JudgeConfig {
            base_url: server.uri(),
            model: "llama3:8b".to_string(),
        };
        OllamaJudge::new(&config, Duration::from_secs(2)).unwrap()
    }

    fn embedder_for(server: &MockServer, dimensions: usize) -> OllamaEmbedder {
        let config = EmbeddingConfig {
            base_url: server.uri(),
            model: "all-minilm".to_string(),
            dimensions,
        };
        OllamaEmbedder::new(&config, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_judge_parses_generated_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3:8b",
                "response": "{\"score\": 0.95, \"reasoning\": \"Paris is correct.\"}",
                "done": true
            })))
            .mount(&server)
            .await;

        let verdict = judge_for(&server)
            .score("What is the capital of France?", "Paris is the capital of France.")
            .await
            .unwrap();

        assert!((verdict.score - 0.95).abs() < 1e-9);
        assert!(verdict.raw_output.contains("Paris is correct"));
    }

    #[tokio::test]
    async fn test_judge_reports_malformed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "I think it is fine",
                "done": true
            })))
            .mount(&server)
            .await;

        let err = judge_for(&server).score("q", "a").await.unwrap_err();
        assert_eq!(err.raw_output(), Some("I think it is fine"));
    }

    #[tokio::test]
    async fn test_judge_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = judge_for(&server).score("q", "a").await.unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable { oracle: "judge", .. }));
    }

    #[tokio::test]
    async fn test_judge_slow_reply_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "{\"score\": 1}"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = JudgeConfig {
            base_url: server.uri(),
            model: "llama3:8b".to_string(),
        };
        let judge = OllamaJudge::new(&config, Duration::from_millis(50)).unwrap();
        let err = judge.score("q", "a").await.unwrap_err();
        assert!(matches!(err, Error::OracleTimeout { oracle: "judge", .. }));
    }

    #[tokio::test]
    async fn test_embedder_returns_first_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "all-minilm",
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        let vector = embedder.embed("Paris is the capital of France.").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(embedder.dimensions(), 3);
    }

    #[tokio::test]
    async fn test_embedder_rejects_empty_text() {
        let server = MockServer::start().await;
        let err = embedder_for(&server, 3).embed("   ").await.unwrap_err();
        assert!(matches!(err, Error::InputContractViolation(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        judge_for(&server).health_check().await.unwrap();
    }
}
