//! EPUB text extraction

use super::html::extract_text_fragment;
use super::{DocumentKind, DocumentParser, ParseHint};
use crate::error::{SourceError, SourceResult};
use epub::doc::EpubDoc;
use std::io::Cursor;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Extracts text from EPUB books chapter by chapter
pub struct EpubParser;

impl DocumentParser for EpubParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Epub
    }

    fn can_parse(&self, bytes: &[u8], hint: &ParseHint) -> bool {
        // EPUBs are zip containers; require the declared type as well so
        // ordinary archives fall through
        bytes.starts_with(ZIP_MAGIC)
            && (hint.resolved_mime().as_deref() == Some("application/epub+zip")
                || hint.extension().as_deref() == Some("epub"))
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let cursor = Cursor::new(bytes.to_vec());
        let mut doc = EpubDoc::from_reader(cursor)
            .map_err(|e| SourceError::Decode(format!("EPUB open failed: {e}")))?;

        let title = doc.mdata("title").map(|item| item.value.clone());
        let mut text = String::new();
        let pages = doc.get_num_pages();
        for _ in 0..pages {
            if let Some((content, _mime)) = doc.get_current_str() {
                let chapter = extract_text_fragment(&content);
                if !chapter.is_empty() {
                    text.push_str(&chapter);
                    text.push_str("\n\n");
                }
            }
            if !doc.go_next() {
                break;
            }
        }

        Ok((text.trim().to_string(), title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_declared_type() {
        // A zip header alone is not enough
        assert!(!EpubParser.can_parse(ZIP_MAGIC, &ParseHint::default()));

        let hint = ParseHint {
            mime: None,
            filename: Some("book.epub".to_string()),
        };
        assert!(EpubParser.can_parse(ZIP_MAGIC, &hint));
    }

    #[test]
    fn test_garbage_zip_is_decode_error() {
        let hint = ParseHint {
            mime: Some("application/epub+zip".to_string()),
            filename: None,
        };
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"not really a zip");
        assert!(matches!(
            EpubParser.parse(&bytes, &hint),
            Err(SourceError::Decode(_))
        ));
    }
}
