//! OpenAI-compatible embeddings provider

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use textloom_config::ProviderConfig;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Embedding provider backed by an OpenAI-compatible `/embeddings` API
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAiEmbeddings {
    /// Build a provider from configuration
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingError::Network` if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding_timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn request_once(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.config.embedding_model,
            "input": texts,
        });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RateLimited(detail));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(EmbeddingError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                message: detail,
            });
        }

        let envelope: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Schema(format!("response envelope: {e}")))?;

        if envelope.data.len() != texts.len() {
            return Err(EmbeddingError::Schema(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                envelope.data.len()
            )));
        }

        // Provider responses are not guaranteed to preserve input order
        let mut entries = envelope.data;
        entries.sort_by_key(|d| d.index);

        let expected = self.config.embedding_dimensions;
        let mut vectors = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.embedding.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: entry.embedding.len(),
                });
            }
            vectors.push(entry.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 1u32;
        loop {
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_with_jitter(attempt);
                    warn!(
                        attempt,
                        batch = texts.len(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

/// Exponential backoff with ±20% jitter: min(base * 2^(k-1), cap)
fn backoff_with_jitter(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}
