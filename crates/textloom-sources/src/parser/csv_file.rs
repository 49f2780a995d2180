//! CSV text extraction with delimiter sniffing

use super::{DocumentKind, DocumentParser, ParseHint, decode_text};
use crate::error::{SourceError, SourceResult};

/// Delimiters the sniffer considers, in preference order on ties
const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Rows inspected when sniffing the delimiter
const SNIFF_ROWS: usize = 10;

/// Renders delimited files as structured `header: value` records
pub struct CsvParser;

impl DocumentParser for CsvParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Csv
    }

    fn can_parse(&self, _bytes: &[u8], hint: &ParseHint) -> bool {
        matches!(
            hint.resolved_mime().as_deref(),
            Some("text/csv" | "text/tab-separated-values")
        ) || matches!(hint.extension().as_deref(), Some("csv" | "tsv"))
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let raw = decode_text(bytes)?;
        let delimiter = sniff_delimiter(&raw);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(raw.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| SourceError::Decode(format!("CSV header read failed: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut text = String::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| SourceError::Decode(format!("CSV record read failed: {e}")))?;
            for (i, field) in record.iter().enumerate() {
                let field = field.trim();
                if field.is_empty() {
                    continue;
                }
                let header = headers
                    .get(i)
                    .map_or_else(|| format!("column_{i}"), Clone::clone);
                text.push_str(&header);
                text.push_str(": ");
                text.push_str(field);
                text.push('\n');
            }
            text.push('\n');
        }

        Ok((text.trim().to_string(), None))
    }
}

/// Pick the delimiter whose per-row count is most consistent over the
/// first few rows
fn sniff_delimiter(raw: &str) -> u8 {
    let rows: Vec<&str> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_ROWS)
        .collect();
    if rows.is_empty() {
        return b',';
    }

    let mut best = (b',', 0usize);
    for candidate in CANDIDATES {
        let counts: Vec<usize> = rows
            .iter()
            .map(|row| row.bytes().filter(|b| *b == candidate).count())
            .collect();
        let min = counts.iter().copied().min().unwrap_or(0);
        if min > best.1 {
            best = (candidate, min);
        }
    }
    best.0
}
