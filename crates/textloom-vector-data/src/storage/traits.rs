//! Storage abstraction traits for vector databases
//!
//! Enables pluggable storage implementations and better testability. The
//! point ID in the store is always the chunk ID.

use crate::VectorDataResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata stored alongside each vector
///
/// Enough context for search results to be rendered without a relational
/// round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub url: String,
    pub title: Option<String>,
    pub chunk_index: i32,
    pub category: Option<String>,
    pub sentiment: Option<String>,
    pub main_topics: Vec<String>,
    pub uses_contextual_embedding: bool,
}

/// Server-side filter for searches
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to vectors from one document URL
    pub url: Option<String>,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub chunk_id: Uuid,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Statistics about the vector storage
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Total number of vectors stored
    pub vector_count: usize,
    /// Collection name
    pub collection_name: String,
    /// Storage backend type (e.g., "qdrant")
    pub storage_type: String,
}

/// Trait for vector storage backends
#[async_trait]
pub trait VectorStorage: Send + Sync {
    /// Check if the storage collection exists
    async fn collection_exists(&self) -> VectorDataResult<bool>;

    /// Create the storage collection if it doesn't exist
    async fn ensure_collection(&self) -> VectorDataResult<()>;

    /// Write one vector keyed by its chunk ID, replacing any existing point
    ///
    /// Rejects vectors whose dimension differs from the configured one.
    async fn upsert_vector(
        &self,
        chunk_id: Uuid,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> VectorDataResult<()>;

    /// Delete vectors by chunk ID
    async fn delete_vectors(&self, chunk_ids: &[Uuid]) -> VectorDataResult<()>;

    /// Whether a point with this chunk ID exists
    async fn has_vector(&self, chunk_id: &Uuid) -> VectorDataResult<bool>;

    /// Nearest-neighbor search over the collection
    async fn search(
        &self,
        query: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> VectorDataResult<Vec<VectorSearchResult>>;

    /// Get storage statistics
    async fn get_stats(&self) -> VectorDataResult<StorageStats>;
}
