//! Error types for vector data storage operations

use textloom_common::ErrorKind;
use thiserror::Error;

/// Result type alias for vector data operations
pub type VectorDataResult<T> = Result<T, VectorDataError>;

/// Errors that can occur during vector storage operations
#[derive(Error, Debug)]
pub enum VectorDataError {
    /// Storage backend is unavailable or connection failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Vector dimension mismatch (e.g., upsert vector wrong size)
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Collection/index operations failed
    #[error("Collection operation failed: {0}")]
    CollectionError(String),

    /// Storage backend specific error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl VectorDataError {
    /// Classify for the retry/propagation policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::StorageUnavailable(_) | Self::CollectionError(_) | Self::Storage(_) => {
                ErrorKind::VectorStoreUnavailable
            }
            Self::DimensionMismatch { .. } => ErrorKind::ProviderSchema,
            Self::Configuration(_) => ErrorKind::Validation,
        }
    }
}
