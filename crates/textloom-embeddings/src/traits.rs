//! Trait abstraction for embedding providers
//!
//! Allows different providers (OpenAI-compatible APIs, test doubles) to be
//! used interchangeably.

use crate::error::EmbeddingResult;
use async_trait::async_trait;

/// Generates embeddings for batches of texts
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Fixed dimensionality of vectors from this provider
    fn dimension(&self) -> usize;

    /// Model identifier, for logs and stats
    fn model_name(&self) -> &str;
}
