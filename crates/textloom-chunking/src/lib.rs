//! Boundary-aware text chunking
//!
//! Splits extracted document text into overlapping character windows with
//! stable, dense indices. Splits prefer paragraph breaks, then sentence
//! ends, then fall back to a hard cut at the window edge.

pub mod chunker;

pub use chunker::{ChunkDraft, ChunkOptions, Chunker};
