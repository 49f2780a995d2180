//! Content source adapters
//!
//! Turns a URL or an uploaded byte buffer into plain text with provenance.
//! A [`fetch::UrlFetcher`] pulls bytes over HTTP with redirect, size, and
//! deadline bounds; a [`parser::ParserRegistry`] selects a document parser
//! by sniffing the bytes with MIME/extension hints and extracts text plus a
//! document title.

pub mod error;
pub mod fetch;
pub mod parser;
pub mod upload;

pub use error::{SourceError, SourceResult};
pub use fetch::{FetchedContent, UrlFetcher};
pub use parser::{
    ContentFetcher, ContentSource, DocumentKind, DocumentParser, ExtractedDocument, ParseHint,
    ParserRegistry,
};
pub use upload::{FsUploadStore, StoredUpload, UploadStore, synthetic_upload_url};
