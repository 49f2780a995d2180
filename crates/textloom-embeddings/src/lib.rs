//! Embedding generation
//!
//! Produces fixed-dimension vectors for chunk text (prefixed with its
//! contextual summary when contextual mode is on). Requests are batched up
//! to the configured size; a failed batch falls back to per-item calls so
//! one poison item cannot sink its batchmates. Vectors are not normalized
//! client-side; the vector store owns the cosine-space convention.

pub mod error;
pub mod mock;
pub mod openai;
pub mod service;
pub mod traits;

pub use error::{EmbeddingError, EmbeddingResult};
pub use mock::MockEmbeddingProvider;
pub use openai::OpenAiEmbeddings;
pub use service::{EmbeddingService, ItemOutcome, embedding_input};
pub use traits::EmbeddingProvider;
