//! Store traits for dependency injection and testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseResult;
use crate::models::{ChunkRecord, EmbeddingStatus, Job, JobStatus, JobType, Session, SessionStatus};

/// Owns session rows; one row per ingestion attempt
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session in `processing` with a fresh heartbeat
    async fn create_session(
        &self,
        session_id: Uuid,
        url: &str,
        filename: Option<&str>,
    ) -> DatabaseResult<Session>;

    /// Fetch one session
    async fn get_session(&self, session_id: &Uuid) -> DatabaseResult<Option<Session>>;

    /// Update `last_heartbeat` only; no-op on terminal sessions
    async fn heartbeat(&self, session_id: &Uuid) -> DatabaseResult<()>;

    /// Record the chunk count once chunking is done
    async fn set_total_chunks(&self, session_id: &Uuid, total: i32) -> DatabaseResult<()>;

    /// Write progress counters; refreshes the heartbeat as a side effect
    async fn update_progress(
        &self,
        session_id: &Uuid,
        completed_chunks: i32,
        failed_chunks: i32,
    ) -> DatabaseResult<()>;

    /// Record the first fatal cause without changing the status
    async fn record_error(&self, session_id: &Uuid, message: &str) -> DatabaseResult<()>;

    /// Transition to a terminal state
    ///
    /// Returns `false` (and changes nothing) when the session is already
    /// terminal; terminal states are immutable.
    async fn end_session(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> DatabaseResult<bool>;

    /// Sessions still in `processing`
    async fn list_active_sessions(&self) -> DatabaseResult<Vec<Session>>;

    /// Fail every processing session whose heartbeat predates `cutoff`
    ///
    /// Returns the affected session IDs.
    async fn fail_stale_heartbeats(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>>;

    /// Fail every processing session created before `cutoff`
    ///
    /// Returns the affected session IDs.
    async fn fail_expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>>;

    /// `(processing, total)` session counts for the cleanup safety check
    async fn session_pressure(&self) -> DatabaseResult<(i64, i64)>;
}

/// Owns chunk rows in the relational store
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or update a chunk row, idempotent on `chunk_id`
    ///
    /// On conflict, mutable fields and `updated_at` change; `created_at`
    /// does not.
    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> DatabaseResult<()>;

    /// Flip a chunk's embedding status
    async fn set_embedding_status(
        &self,
        chunk_id: &Uuid,
        status: EmbeddingStatus,
    ) -> DatabaseResult<()>;

    /// All chunks for a session, ordered by `chunk_index`
    async fn get_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<Vec<ChunkRecord>>;

    /// Chunk count for a session
    async fn count_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<i64>;

    /// Chunk IDs whose session row no longer exists
    async fn find_orphaned_chunks(&self, limit: i64) -> DatabaseResult<Vec<Uuid>>;

    /// Mark orphaned chunks with a final embedding status
    ///
    /// Returns the number of rows changed.
    async fn mark_orphaned_chunks(
        &self,
        chunk_ids: &[Uuid],
        status: EmbeddingStatus,
    ) -> DatabaseResult<u64>;
}

/// Durable job queue backed by the relational store
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `queued` job and return the row
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: i32,
    ) -> DatabaseResult<Job>;

    /// Atomically claim the next runnable job
    ///
    /// Selects `queued`/`retrying` rows whose `retry_after` has passed,
    /// ordered by `priority DESC, created_at ASC`, skipping rows locked by
    /// other workers. The claimed row moves to `processing` with
    /// `started_at` set and `attempts` incremented.
    async fn claim_next_job(&self) -> DatabaseResult<Option<Job>>;

    /// Terminal success
    async fn complete_job(&self, job_id: &Uuid, result: serde_json::Value) -> DatabaseResult<()>;

    /// Terminal failure
    async fn fail_job(
        &self,
        job_id: &Uuid,
        error_message: &str,
        result: Option<serde_json::Value>,
    ) -> DatabaseResult<()>;

    /// Schedule another attempt after `retry_after`
    async fn schedule_retry(
        &self,
        job_id: &Uuid,
        error_message: &str,
        retry_after: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Cancel a `queued`/`retrying` job
    ///
    /// Returns `false` if the job was not in a cancellable queue state
    /// (the caller signals in-flight jobs separately).
    async fn cancel_job(&self, job_id: &Uuid) -> DatabaseResult<bool>;

    /// Move a `processing` job to `cancelled` after its orchestrator
    /// observed the cancel signal
    async fn mark_cancelled(&self, job_id: &Uuid) -> DatabaseResult<()>;

    /// Fetch one job
    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<Job>>;

    /// List jobs, optionally filtered by status, newest first
    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> DatabaseResult<Vec<Job>>;

    /// Requeue or fail jobs stuck in `processing` since before `cutoff`
    ///
    /// Returns the number of rows changed.
    async fn recover_stale_jobs(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;
}
