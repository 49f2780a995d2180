//! Analysis output model

use serde::{Deserialize, Serialize};

/// Named entities extracted from a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntities {
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

/// Options controlling what the analyzer produces
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Produce a contextual summary describing how the chunk fits the
    /// document (prepended to the chunk text for embedding)
    pub contextual_summary: bool,
    /// Produce a whole-document summary (persisted on chunk 0 only)
    pub document_summary: bool,
}

/// Structured analysis of one chunk
///
/// The schema is deterministic: missing or malformed model output is
/// coerced into the defaults below and `analysis_error` records why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub sentiment: String,
    pub category: String,
    pub content_type: String,
    pub technical_level: String,
    pub main_topics: Vec<String>,
    pub key_concepts: String,
    pub emotions: Vec<String>,
    pub tags: String,
    pub key_entities: KeyEntities,
    /// Short description of how the chunk fits within the whole document
    pub contextual_summary: Option<String>,
    /// Whole-document summary; set only when requested
    pub document_summary: Option<String>,
    /// Why the analysis fell back to defaults, if it did
    pub analysis_error: Option<String>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            sentiment: "neutral".to_string(),
            category: "general".to_string(),
            content_type: "text".to_string(),
            technical_level: "intermediate".to_string(),
            main_topics: Vec::new(),
            key_concepts: String::new(),
            emotions: Vec::new(),
            tags: String::new(),
            key_entities: KeyEntities::default(),
            contextual_summary: None,
            document_summary: None,
            analysis_error: None,
        }
    }
}

impl Analysis {
    /// Default analysis carrying the reason it fell back
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            analysis_error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Loosely-typed shape the model is asked to produce; every field optional
/// so partial output still coerces
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawAnalysis {
    pub sentiment: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub technical_level: Option<String>,
    #[serde(default)]
    pub main_topics: Vec<String>,
    pub key_concepts: Option<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    pub tags: Option<String>,
    #[serde(default)]
    pub key_entities: KeyEntities,
    pub contextual_summary: Option<String>,
    pub document_summary: Option<String>,
}

impl RawAnalysis {
    /// Fill defaults for anything the model left out
    pub(crate) fn coerce(self, options: &AnalyzeOptions) -> Analysis {
        let defaults = Analysis::default();
        Analysis {
            sentiment: self.sentiment.unwrap_or(defaults.sentiment),
            category: self.category.unwrap_or(defaults.category),
            content_type: self.content_type.unwrap_or(defaults.content_type),
            technical_level: self.technical_level.unwrap_or(defaults.technical_level),
            main_topics: self.main_topics,
            key_concepts: self.key_concepts.unwrap_or_default(),
            emotions: self.emotions,
            tags: self.tags.unwrap_or_default(),
            key_entities: self.key_entities,
            contextual_summary: if options.contextual_summary {
                self.contextual_summary.filter(|s| !s.trim().is_empty())
            } else {
                None
            },
            document_summary: if options.document_summary {
                self.document_summary.filter(|s| !s.trim().is_empty())
            } else {
                None
            },
            analysis_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_fills_defaults() {
        let raw = RawAnalysis {
            sentiment: Some("positive".to_string()),
            ..RawAnalysis::default()
        };
        let analysis = raw.coerce(&AnalyzeOptions::default());
        assert_eq!(analysis.sentiment, "positive");
        assert_eq!(analysis.category, "general");
        assert!(analysis.analysis_error.is_none());
    }

    #[test]
    fn test_coerce_drops_unrequested_summaries() {
        let raw = RawAnalysis {
            contextual_summary: Some("fits here".to_string()),
            document_summary: Some("whole doc".to_string()),
            ..RawAnalysis::default()
        };
        let analysis = raw.coerce(&AnalyzeOptions {
            contextual_summary: false,
            document_summary: false,
        });
        assert!(analysis.contextual_summary.is_none());
        assert!(analysis.document_summary.is_none());
    }

    #[test]
    fn test_failed_carries_reason() {
        let analysis = Analysis::failed("schema mismatch");
        assert_eq!(analysis.analysis_error.as_deref(), Some("schema mismatch"));
        assert_eq!(analysis.sentiment, "neutral");
    }
}
