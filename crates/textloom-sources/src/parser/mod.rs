//! Document parser registry
//!
//! Parsers are polymorphic over `{can_parse, parse}` and selected by
//! sniffing the bytes with MIME/extension hints. Registration order is the
//! selection order; the plain-text parser is the final fallback.

mod csv_file;
mod docx;
mod epub_book;
mod html;
mod pdf;
mod text;

use crate::error::{SourceError, SourceResult};
use crate::fetch::UrlFetcher;
use crate::upload::synthetic_upload_url;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use textloom_config::SourcesConfig;
use tracing::debug;

pub use csv_file::CsvParser;
pub use docx::DocxParser;
pub use epub_book::EpubParser;
pub use html::HtmlParser;
pub use pdf::PdfParser;
pub use text::{MarkdownParser, TextParser};

/// Document format assigned to ingested content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Url,
    Pdf,
    Epub,
    Docx,
    Csv,
    Html,
    Text,
    Markdown,
}

impl DocumentKind {
    /// Stable lowercase label persisted on chunk rows
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Docx => "docx",
            Self::Csv => "csv",
            Self::Html => "html",
            Self::Text => "text",
            Self::Markdown => "markdown",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hints that accompany raw bytes into parser selection
#[derive(Debug, Clone, Default)]
pub struct ParseHint {
    /// Declared MIME type, lowercased, parameters stripped
    pub mime: Option<String>,
    /// Filename the bytes arrived under
    pub filename: Option<String>,
}

impl ParseHint {
    /// Lowercased filename extension, if any
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    /// Resolve a MIME type, falling back to a guess from the extension
    pub fn resolved_mime(&self) -> Option<String> {
        self.mime.clone().or_else(|| {
            self.filename
                .as_deref()
                .and_then(|f| mime_guess::from_path(f).first_raw())
                .map(str::to_ascii_lowercase)
        })
    }
}

/// Text extracted from one document, with provenance
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Canonical URL (real or synthetic `file://` for uploads)
    pub url: String,
    /// Best-effort document title
    pub title: Option<String>,
    /// Format the content was parsed as
    pub kind: DocumentKind,
    /// Extracted plain text
    pub text: String,
}

/// A parser for one document format
pub trait DocumentParser: Send + Sync {
    /// Format this parser produces
    fn kind(&self) -> DocumentKind;

    /// Whether this parser accepts the bytes, given the hints
    fn can_parse(&self, bytes: &[u8], hint: &ParseHint) -> bool;

    /// Extract text and a title from the bytes
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Decode` when the bytes cannot be read as this
    /// format despite `can_parse` accepting them.
    fn parse(&self, bytes: &[u8], hint: &ParseHint) -> SourceResult<(String, Option<String>)>;
}

/// Ordered collection of parsers; first acceptor wins
pub struct ParserRegistry {
    parsers: Vec<Box<dyn DocumentParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    /// Registry with the standard parser set
    ///
    /// Binary formats sniff magic numbers first; HTML and CSV inspect the
    /// hints; plain text/Markdown is the fallback for anything decodable.
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(PdfParser),
                Box::new(EpubParser),
                Box::new(DocxParser),
                Box::new(CsvParser),
                Box::new(HtmlParser),
                Box::new(MarkdownParser),
                Box::new(TextParser),
            ],
        }
    }

    /// Select a parser and extract text
    ///
    /// # Errors
    ///
    /// - `SourceError::Unsupported` if no parser accepts the bytes
    /// - parser-specific `SourceError::Decode` on extraction failure
    pub fn parse(
        &self,
        bytes: &[u8],
        hint: &ParseHint,
    ) -> SourceResult<(DocumentKind, String, Option<String>)> {
        for parser in &self.parsers {
            if parser.can_parse(bytes, hint) {
                debug!(kind = %parser.kind(), "Selected parser");
                let (text, title) = parser.parse(bytes, hint)?;
                return Ok((parser.kind(), text, title));
            }
        }
        Err(SourceError::Unsupported(
            hint.resolved_mime()
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

/// Where the bytes of one ingestion come from
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Fetch over HTTP(S)
    Url(String),
    /// Already-uploaded bytes with declared metadata
    Upload {
        bytes: Bytes,
        mime: Option<String>,
        filename: Option<String>,
    },
}

/// Front door of the adapter layer: fetch (if needed), then parse
pub struct ContentFetcher {
    fetcher: UrlFetcher,
    registry: ParserRegistry,
}

impl ContentFetcher {
    /// Build with the standard parser set
    ///
    /// # Errors
    ///
    /// Propagates HTTP client construction failure.
    pub fn new(config: &SourcesConfig) -> SourceResult<Self> {
        Ok(Self {
            fetcher: UrlFetcher::new(config)?,
            registry: ParserRegistry::new(),
        })
    }

    /// Resolve a source to extracted text with provenance
    ///
    /// # Errors
    ///
    /// Propagates fetch errors (`Network`, `Timeout`, `Oversize`,
    /// `InvalidSource`) and parse errors (`Unsupported`, `Decode`).
    pub async fn fetch(&self, source: &ContentSource) -> SourceResult<ExtractedDocument> {
        match source {
            ContentSource::Url(url) => {
                let content = self.fetcher.fetch(url).await?;
                let hint = ParseHint {
                    mime: content.mime.clone(),
                    filename: content.filename.clone(),
                };
                let (kind, text, title) = self.registry.parse(&content.bytes, &hint)?;
                // Fetched pages keep the generic URL content type; `html`
                // is reserved for uploaded .html files
                let kind = if kind == DocumentKind::Html {
                    DocumentKind::Url
                } else {
                    kind
                };
                Ok(ExtractedDocument {
                    url: content.url,
                    title: title.or_else(|| content.filename.clone()),
                    kind,
                    text,
                })
            }
            ContentSource::Upload {
                bytes,
                mime,
                filename,
            } => {
                let hint = ParseHint {
                    mime: mime.clone(),
                    filename: filename.clone(),
                };
                let (kind, text, title) = self.registry.parse(bytes, &hint)?;
                Ok(ExtractedDocument {
                    url: synthetic_upload_url(bytes),
                    title: title.or_else(|| filename.clone()),
                    kind,
                    text,
                })
            }
        }
    }
}

/// Decode bytes as text, honoring a BOM and rejecting binary content
///
/// Buffers with NUL bytes in the first 8 KiB are treated as binary, and
/// malformed sequences under the detected encoding are rejected rather
/// than lossily replaced.
pub(crate) fn decode_text(bytes: &[u8]) -> SourceResult<String> {
    let sniff_len = bytes.len().min(8_192);
    if bytes.get(..sniff_len).is_some_and(|s| s.contains(&0)) {
        return Err(SourceError::Decode(
            "binary content (NUL bytes in prefix)".to_string(),
        ));
    }

    let (encoding, _bom_length) =
        encoding_rs::Encoding::for_bom(bytes).unwrap_or((encoding_rs::UTF_8, 0));
    let (decoded, actual, malformed) = encoding.decode(bytes);
    if malformed {
        return Err(SourceError::Decode(format!(
            "malformed {} sequence",
            actual.name()
        )));
    }
    Ok(decoded.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strips_utf8_bom() {
        let bytes = b"\xef\xbb\xbfhello";
        assert_eq!(decode_text(bytes).unwrap(), "hello");
    }

    #[test]
    fn test_decode_rejects_nul_bytes() {
        let bytes = b"he\x00llo";
        assert!(matches!(
            decode_text(bytes).unwrap_err(),
            SourceError::Decode(_)
        ));
    }

    #[test]
    fn test_registry_falls_back_to_text() {
        let registry = ParserRegistry::new();
        let hint = ParseHint::default();
        let (kind, text, _) = registry.parse(b"just some words", &hint).unwrap();
        assert_eq!(kind, DocumentKind::Text);
        assert_eq!(text, "just some words");
    }

    #[test]
    fn test_registry_rejects_binary_garbage() {
        let registry = ParserRegistry::new();
        let hint = ParseHint::default();
        let bytes = [0u8, 159, 146, 150, 0, 1, 2];
        assert!(registry.parse(&bytes, &hint).is_err());
    }

    #[test]
    fn test_hint_extension_and_mime_fallback() {
        let hint = ParseHint {
            mime: None,
            filename: Some("Report.PDF".to_string()),
        };
        assert_eq!(hint.extension().as_deref(), Some("pdf"));
        assert_eq!(hint.resolved_mime().as_deref(), Some("application/pdf"));
    }
}
