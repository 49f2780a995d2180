//! Error types for content source operations

use textloom_common::ErrorKind;
use thiserror::Error;

/// Result type alias for content source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while fetching or parsing content
#[derive(Error, Debug)]
pub enum SourceError {
    /// No registered parser accepts the content
    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    /// Response body exceeded the configured size cap
    #[error("Content too large: {size} bytes exceeds cap of {cap} bytes")]
    Oversize { size: u64, cap: u64 },

    /// Transient network failure while fetching
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The fetch deadline elapsed
    #[error("Timed out fetching {0}")]
    Timeout(String),

    /// Content could not be decoded as text
    #[error("Decode error: {0}")]
    Decode(String),

    /// URL scheme or shape rejected before any request was made
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Filesystem failure in the upload store
    #[error("Upload store error: {0}")]
    UploadStore(String),
}

impl SourceError {
    /// Classify for the retry/propagation policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::UnsupportedType,
            Self::Oversize { .. } | Self::InvalidSource(_) => ErrorKind::Validation,
            Self::Network { .. } => ErrorKind::NetworkTransient,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Decode(_) => ErrorKind::Validation,
            Self::UploadStore(_) => ErrorKind::Internal,
        }
    }
}
