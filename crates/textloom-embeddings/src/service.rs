//! Embedding service: batching and poison isolation

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::EmbeddingProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compose the text actually embedded for a chunk
///
/// With contextual mode on, the contextual summary is prepended so the
/// vector carries the chunk's place in the document.
pub fn embedding_input(chunk_text: &str, contextual_summary: Option<&str>) -> String {
    match contextual_summary {
        Some(summary) if !summary.trim().is_empty() => format!("{summary}\n\n{chunk_text}"),
        _ => chunk_text.to_string(),
    }
}

/// Per-item result of a batched embed call
pub type ItemOutcome = Result<Vec<f32>, EmbeddingError>;

/// Coordinates embedding generation over a provider
///
/// Splits input into provider-sized batches. When a whole batch fails with
/// a non-retryable error (the provider already retried transient failures
/// internally), each item is retried alone so one poison input cannot sink
/// its batchmates.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingService {
    /// Create a service over `provider` batching up to `batch_size` texts
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// The provider's fixed vector dimension
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed one text
    ///
    /// # Errors
    ///
    /// Propagates the provider error after its internal retries.
    pub async fn embed_one(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.provider.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Schema("provider returned no vector".to_string()))
    }

    /// Embed many texts with per-item outcomes
    ///
    /// The output has exactly one entry per input, in input order. Batch
    /// failures degrade to per-item calls; only the failing items carry an
    /// error.
    pub async fn embed_all(&self, texts: &[String]) -> Vec<ItemOutcome> {
        let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => {
                    debug!(batch = batch.len(), "Embedded batch");
                    outcomes.extend(vectors.into_iter().map(Ok));
                }
                Err(e) => {
                    warn!(
                        batch = batch.len(),
                        error = %e,
                        "Batch embed failed, isolating items"
                    );
                    for text in batch {
                        outcomes.push(self.embed_one(text).await);
                    }
                }
            }
        }

        outcomes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingProvider;

    #[test]
    fn test_embedding_input_prefixes_summary() {
        assert_eq!(
            embedding_input("body", Some("summary")),
            "summary\n\nbody"
        );
        assert_eq!(embedding_input("body", None), "body");
        assert_eq!(embedding_input("body", Some("  ")), "body");
    }

    #[tokio::test]
    async fn test_embed_all_batches_in_order() {
        let provider = Arc::new(MockEmbeddingProvider::new(4));
        let service = EmbeddingService::new(provider, 2);

        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let outcomes = service.embed_all(&texts).await;

        assert_eq!(outcomes.len(), 5);
        for outcome in &outcomes {
            assert_eq!(outcome.as_ref().unwrap().len(), 4);
        }
    }

    #[tokio::test]
    async fn test_embed_all_isolates_poison_item() {
        let provider = Arc::new(MockEmbeddingProvider::new(4));
        let service = EmbeddingService::new(provider, 3);

        let texts = vec![
            "fine".to_string(),
            format!("bad {}", crate::mock::FAIL_MARKER),
            "also fine".to_string(),
        ];
        let outcomes = service.embed_all(&texts).await;

        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_ok());
    }

    #[tokio::test]
    async fn test_embed_one_returns_vector() {
        let provider = Arc::new(MockEmbeddingProvider::new(8));
        let service = EmbeddingService::new(provider, 10);
        assert_eq!(service.embed_one("hello").await.unwrap().len(), 8);
    }
}
