//! Trait abstraction for chunk analyzers
//!
//! Allows different providers (OpenAI-compatible APIs, local gateways,
//! test doubles) to be used interchangeably.

use crate::error::AnalysisResult;
use crate::model::{Analysis, AnalyzeOptions};
use async_trait::async_trait;

/// Analyzes one chunk against the whole document
#[async_trait]
pub trait ChunkAnalyzer: Send + Sync {
    /// Produce the analysis fields for `chunk_text`
    ///
    /// `document_text` is auxiliary context for the contextual summary.
    /// Implementations retry transient provider failures internally and
    /// coerce malformed output into a default [`Analysis`] rather than
    /// erroring; an `Err` means the provider stayed unreachable.
    async fn analyze(
        &self,
        chunk_text: &str,
        document_text: &str,
        options: &AnalyzeOptions,
    ) -> AnalysisResult<Analysis>;
}
