//! DOCX text extraction

use super::{DocumentKind, DocumentParser, ParseHint};
use crate::error::{SourceError, SourceResult};
use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, TableCellContent, TableChild,
    TableRowChild, read_docx,
};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extracts text from Word documents (paragraphs and tables)
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Docx
    }

    fn can_parse(&self, bytes: &[u8], hint: &ParseHint) -> bool {
        bytes.starts_with(ZIP_MAGIC)
            && (hint.resolved_mime().as_deref() == Some(DOCX_MIME)
                || hint.extension().as_deref() == Some("docx"))
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let docx = read_docx(bytes)
            .map_err(|e| SourceError::Decode(format!("DOCX read failed: {e}")))?;

        let mut text = String::new();
        for child in &docx.document.children {
            match child {
                DocumentChild::Paragraph(p) => {
                    let line = paragraph_text(p);
                    if !line.is_empty() {
                        text.push_str(&line);
                        text.push('\n');
                    }
                }
                DocumentChild::Table(table) => {
                    for row in &table.rows {
                        let TableChild::TableRow(row) = row;
                        let mut cells = Vec::new();
                        for cell in &row.cells {
                            let TableRowChild::TableCell(cell) = cell;
                            let mut cell_text = String::new();
                            for content in &cell.children {
                                if let TableCellContent::Paragraph(p) = content {
                                    cell_text.push_str(&paragraph_text(p));
                                    cell_text.push(' ');
                                }
                            }
                            cells.push(cell_text.trim().to_string());
                        }
                        if cells.iter().any(|c| !c.is_empty()) {
                            text.push_str(&cells.join(" | "));
                            text.push('\n');
                        }
                    }
                }
                _ => {}
            }
        }

        Ok((text.trim().to_string(), None))
    }
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut line = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for rc in &run.children {
                match rc {
                    RunChild::Text(t) => line.push_str(&t.text),
                    RunChild::Tab(_) => line.push('\t'),
                    RunChild::Break(_) => line.push('\n'),
                    _ => {}
                }
            }
        }
    }
    line.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_parse_requires_zip_and_declared_type() {
        assert!(!DocxParser.can_parse(ZIP_MAGIC, &ParseHint::default()));

        let hint = ParseHint {
            mime: Some(DOCX_MIME.to_string()),
            filename: None,
        };
        assert!(DocxParser.can_parse(ZIP_MAGIC, &hint));
    }

    #[test]
    fn test_garbage_bytes_are_decode_error() {
        let hint = ParseHint {
            mime: None,
            filename: Some("report.docx".to_string()),
        };
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"corrupt");
        assert!(matches!(
            DocxParser.parse(&bytes, &hint),
            Err(SourceError::Decode(_))
        ));
    }
}
