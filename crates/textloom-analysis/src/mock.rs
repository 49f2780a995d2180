//! In-memory analyzer for unit and integration testing

use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{Analysis, AnalyzeOptions};
use crate::traits::ChunkAnalyzer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Marker that makes the mock fail a chunk deterministically
pub const FAIL_MARKER: &str = "<<analysis-fail>>";

/// Deterministic analyzer that needs no network
///
/// Chunks containing [`FAIL_MARKER`] fail with a provider error; everything
/// else gets a default-shaped analysis with summaries derived from the
/// chunk text.
#[derive(Default)]
pub struct MockAnalyzer {
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analyze calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkAnalyzer for MockAnalyzer {
    async fn analyze(
        &self,
        chunk_text: &str,
        _document_text: &str,
        options: &AnalyzeOptions,
    ) -> AnalysisResult<Analysis> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if chunk_text.contains(FAIL_MARKER) {
            return Err(AnalysisError::Upstream {
                status: 500,
                message: "mock failure".to_string(),
            });
        }

        let preview: String = chunk_text.chars().take(40).collect();
        Ok(Analysis {
            main_topics: vec!["topic".to_string()],
            contextual_summary: options
                .contextual_summary
                .then(|| format!("Context for: {preview}")),
            document_summary: options
                .document_summary
                .then(|| "Summary of the whole document.".to_string()),
            ..Analysis::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_succeeds_and_counts() {
        let analyzer = MockAnalyzer::new();
        let options = AnalyzeOptions {
            contextual_summary: true,
            document_summary: false,
        };
        let analysis = analyzer.analyze("some chunk", "doc", &options).await.unwrap();
        assert!(analysis.contextual_summary.is_some());
        assert_eq!(analyzer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_fails_on_marker() {
        let analyzer = MockAnalyzer::new();
        let text = format!("chunk {FAIL_MARKER}");
        let result = analyzer
            .analyze(&text, "doc", &AnalyzeOptions::default())
            .await;
        assert!(result.is_err());
    }
}
