//! Error types for embedding operations

use textloom_common::ErrorKind;
use thiserror::Error;

/// Result type alias for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors that can occur during embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider signaled rate limiting (HTTP 429)
    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    /// Provider returned a server-side failure (5xx)
    #[error("Provider error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    /// Credential rejected (401/403)
    #[error("Provider rejected credentials: {0}")]
    Auth(String),

    /// The per-call deadline elapsed
    #[error("Embedding request timed out")]
    Timeout,

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Response shape or vector dimension was wrong
    #[error("Malformed embedding response: {0}")]
    Schema(String),

    /// A vector came back with the wrong dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Classify for the retry/propagation policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::ProviderRateLimit,
            Self::Upstream { .. } | Self::Network(_) => ErrorKind::NetworkTransient,
            Self::Auth(_) => ErrorKind::Validation,
            Self::Timeout => ErrorKind::Timeout,
            Self::Schema(_) | Self::DimensionMismatch { .. } => ErrorKind::ProviderSchema,
        }
    }

    /// Whether the embedder's internal retry loop should try again
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
