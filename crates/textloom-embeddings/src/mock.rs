//! In-memory embedding provider for unit and integration testing

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;

/// Marker that makes the mock fail an item (and any batch containing it)
pub const FAIL_MARKER: &str = "<<embed-fail>>";

/// Deterministic embedding provider that needs no network
///
/// Vectors are derived from the text length so tests can assert stability
/// without caring about values.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if let Some(bad) = texts.iter().find(|t| t.contains(FAIL_MARKER)) {
            return Err(EmbeddingError::Upstream {
                status: 500,
                message: format!("mock failure for: {}", bad.chars().take(20).collect::<String>()),
            });
        }

        Ok(texts
            .iter()
            .map(|t| {
                let seed = t.len() as f32;
                (0..self.dimension)
                    .map(|i| (seed + i as f32) / 1_000.0)
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding-model"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let provider = MockEmbeddingProvider::new(4);
        let a = provider.embed_batch(&["abc".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["abc".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_fails_on_marker() {
        let provider = MockEmbeddingProvider::new(4);
        let texts = vec![format!("x {FAIL_MARKER}")];
        assert!(provider.embed_batch(&texts).await.is_err());
    }
}
