//! Per-chunk LLM analysis
//!
//! Produces the analysis fields stored on each chunk (sentiment, category,
//! topics, entities) plus the contextual summary used for embedding, and
//! optionally a whole-document summary. Invalid model output is coerced to
//! a default analysis carrying `analysis_error` rather than failing the
//! chunk; provider failures are retried with exponential backoff.

pub mod error;
pub mod mock;
pub mod model;
pub mod openai;
pub mod traits;

pub use error::{AnalysisError, AnalysisResult};
pub use mock::MockAnalyzer;
pub use model::{Analysis, AnalyzeOptions, KeyEntities};
pub use openai::OpenAiAnalyzer;
pub use traits::ChunkAnalyzer;
