//! HTML text and title extraction

use super::{DocumentKind, DocumentParser, ParseHint, decode_text};
use crate::error::SourceResult;
use scraper::{Html, Node, Selector};

/// Elements whose text content is never document text
const SKIPPED: &[&str] = &["script", "style", "noscript", "head", "template"];

/// Elements that terminate a line of extracted text
const BLOCK: &[&str] = &[
    "p", "div", "section", "article", "li", "tr", "br", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre", "table",
];

/// Extracts readable text from HTML documents
pub struct HtmlParser;

impl DocumentParser for HtmlParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Html
    }

    fn can_parse(&self, bytes: &[u8], hint: &ParseHint) -> bool {
        if matches!(
            hint.resolved_mime().as_deref(),
            Some("text/html" | "application/xhtml+xml")
        ) || matches!(hint.extension().as_deref(), Some("html" | "htm" | "xhtml"))
        {
            return true;
        }
        let prefix = String::from_utf8_lossy(bytes.get(..1_024).unwrap_or(bytes)).to_lowercase();
        prefix.contains("<html") || prefix.contains("<!doctype html")
    }

    fn parse(&self, bytes: &[u8], _hint: &ParseHint) -> SourceResult<(String, Option<String>)> {
        let raw = decode_text(bytes)?;
        let document = Html::parse_document(&raw);

        let title = Selector::parse("title").ok().and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        });

        let mut text = String::new();
        collect_text(*document.root_element(), &mut text);
        Ok((tidy(&text), title))
    }
}

/// Extract readable text from an HTML fragment (EPUB chapters reuse this)
pub(crate) fn extract_text_fragment(fragment: &str) -> String {
    let document = Html::parse_fragment(fragment);
    let mut text = String::new();
    collect_text(*document.root_element(), &mut text);
    tidy(&text)
}

fn collect_text(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(t) => out.push_str(t),
        Node::Element(el) => {
            let name = el.name();
            if SKIPPED.contains(&name) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
            if BLOCK.contains(&name) && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

/// Trim lines and collapse blank runs down to paragraph breaks
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run = blank_run.saturating_add(1);
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(&line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}
