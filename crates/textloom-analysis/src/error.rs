//! Error types for analysis operations

use textloom_common::ErrorKind;
use thiserror::Error;

/// Result type alias for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors that can occur during chunk analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
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
    #[error("Analysis request timed out")]
    Timeout,

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The provider response envelope was unusable
    #[error("Malformed provider response: {0}")]
    Schema(String),
}

impl AnalysisError {
    /// Classify for the retry/propagation policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::ProviderRateLimit,
            Self::Upstream { .. } | Self::Network(_) => ErrorKind::NetworkTransient,
            Self::Auth(_) => ErrorKind::Validation,
            Self::Timeout => ErrorKind::Timeout,
            Self::Schema(_) => ErrorKind::ProviderSchema,
        }
    }

    /// Whether the analyzer's internal retry loop should try again
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
