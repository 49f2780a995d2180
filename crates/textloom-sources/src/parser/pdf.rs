//! PDF text extraction

use super::{DocumentKind, DocumentParser, ParseHint};
use crate::error::{SourceError, SourceResult};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Extracts text from PDF bytes via `pdf-extract`
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn can_parse(&self, bytes: &[u8], hint: &ParseHint) -> bool {
        bytes.starts_with(PDF_MAGIC)
            || hint.resolved_mime().as_deref() == Some("application/pdf")
            || hint.extension().as_deref() == Some("pdf")
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| SourceError::Decode(format!("PDF extraction failed: {e}")))?;
        Ok((normalize(&text), None))
    }
}

/// Collapse the run-together whitespace pdf-extract tends to emit
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run = blank_run.saturating_add(1);
            if blank_run == 1 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_parse_by_magic() {
        assert!(PdfParser.can_parse(b"%PDF-1.7 ...", &ParseHint::default()));
    }

    #[test]
    fn test_can_parse_by_extension() {
        let hint = ParseHint {
            mime: None,
            filename: Some("paper.pdf".to_string()),
        };
        assert!(PdfParser.can_parse(b"", &hint));
    }

    #[test]
    fn test_rejects_plain_text() {
        assert!(!PdfParser.can_parse(b"hello world", &ParseHint::default()));
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        assert_eq!(normalize("a\n\n\n\nb  \n"), "a\n\nb");
    }
}
