//! Relational metadata layer
//!
//! Owns the authoritative shared state: session rows, chunk rows, and the
//! durable job queue, all in Postgres via sqlx. State transitions are
//! guarded single-statement updates or explicit transactions; job claims
//! use `FOR UPDATE SKIP LOCKED` so no two workers ever hold the same job.

pub mod chunk_id;
pub mod chunk_store;
pub mod error;
pub mod job_store;
pub mod migrations;
pub mod mock;
pub mod models;
pub mod pool;
pub mod session_store;
pub mod traits;

pub use chunk_id::generate_chunk_id;
pub use chunk_store::PgChunkStore;
pub use error::{DatabaseError, DatabaseResult};
pub use job_store::PgJobStore;
pub use migrations::run_migrations;
pub use mock::MockMetaStore;
pub use models::{
    ChunkEntities, ChunkRecord, EmbeddingStatus, Job, JobStatus, JobType, Session, SessionStatus,
};
pub use pool::PoolManager;
pub use session_store::PgSessionStore;
pub use traits::{ChunkStore, JobStore, SessionStore};
