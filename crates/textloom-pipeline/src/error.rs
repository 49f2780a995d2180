//! Error types for the pipeline layer

use textloom_analysis::AnalysisError;
use textloom_common::ErrorKind;
use textloom_embeddings::EmbeddingError;
use textloom_meta_data::DatabaseError;
use textloom_sources::SourceError;
use textloom_vector_data::VectorDataError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors crossing component boundaries inside the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    VectorStore(#[from] VectorDataError),

    /// Extraction produced no text
    #[error("empty content")]
    EmptyContent,

    /// The per-chunk phase sank the whole session (all chunks failed, or
    /// the failure rate crossed the line); carries the dominant cause
    #[error("{message}")]
    Chunks { kind: ErrorKind, message: String },

    /// Job payload or options rejected
    #[error("Invalid job payload: {0}")]
    Payload(String),

    /// The job's cancel signal fired
    #[error("cancelled")]
    Cancelled,

    /// Cleanup safety validation tripped
    #[error("unsafe cleanup: {0}")]
    UnsafeCleanup(String),
}

impl PipelineError {
    /// Classify for the job-level retry policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Source(e) => e.kind(),
            Self::Analysis(e) => e.kind(),
            Self::Embedding(e) => e.kind(),
            Self::Database(e) => e.kind(),
            Self::VectorStore(e) => e.kind(),
            Self::EmptyContent | Self::Payload(_) | Self::UnsafeCleanup(_) => ErrorKind::Validation,
            Self::Chunks { kind, .. } => *kind,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
