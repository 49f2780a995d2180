//! Plain text and Markdown handling

use super::{DocumentKind, DocumentParser, ParseHint, decode_text};
use crate::error::SourceResult;

/// Markdown documents, selected by declared type before the text fallback
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Markdown
    }

    fn can_parse(&self, _bytes: &[u8], hint: &ParseHint) -> bool {
        matches!(
            hint.resolved_mime().as_deref(),
            Some("text/markdown" | "text/x-markdown")
        ) || matches!(hint.extension().as_deref(), Some("md" | "markdown"))
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let text = decode_text(bytes)?;
        let title = heading_title(&text);
        Ok((text.trim().to_string(), title))
    }
}

/// Final fallback: anything that decodes as text
pub struct TextParser;

impl DocumentParser for TextParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Text
    }

    fn can_parse(&self, _bytes: &[u8], _hint: &ParseHint) -> bool {
        // Accept everything; parse rejects binary content
        true
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let text = decode_text(bytes)?;
        Ok((text.trim().to_string(), None))
    }
}

/// First ATX heading, for use as a Markdown document title
fn heading_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}
