//! Vector store layer
//!
//! Eventually-consistent secondary store for chunk embeddings. The point
//! ID is always the chunk ID; the relational row is written first and the
//! cleanup service reconciles rows whose vector write failed.

pub mod error;
pub mod storage;

pub use error::{VectorDataError, VectorDataResult};
pub use storage::{
    MockStorage, QdrantStorage, SearchFilter, StorageStats, VectorPayload, VectorSearchResult,
    VectorStorage,
};
