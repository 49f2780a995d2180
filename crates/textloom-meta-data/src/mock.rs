//! In-memory store implementing all three store traits for testing
//!
//! Mirrors the Postgres semantics that matter to callers: terminal-state
//! immutability, claim ordering, retry gating, and idempotent chunk
//! upserts. A single struct backs all three traits so orphan detection can
//! see both tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::models::{ChunkRecord, EmbeddingStatus, Job, JobStatus, JobType, Session, SessionStatus};
use crate::traits::{ChunkStore, JobStore, SessionStore};

#[derive(Default)]
struct MetaState {
    sessions: HashMap<Uuid, Session>,
    chunks: HashMap<Uuid, ChunkRecord>,
    jobs: HashMap<Uuid, Job>,
}

/// In-memory metadata store for tests
#[derive(Clone, Default)]
pub struct MockMetaStore {
    state: Arc<Mutex<MetaState>>,
}

impl MockMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> MutexGuard<'_, MetaState> {
        self.state.lock().unwrap()
    }

    /// Test helper: age a session's heartbeat
    pub fn set_last_heartbeat(&self, session_id: &Uuid, at: DateTime<Utc>) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.last_heartbeat = at;
        }
    }

    /// Test helper: age a session's creation time
    pub fn set_created_at(&self, session_id: &Uuid, at: DateTime<Utc>) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.created_at = at;
        }
    }

    /// Test helper: age a job's claim time
    pub fn set_job_started_at(&self, job_id: &Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            job.started_at = Some(at);
        }
    }

    /// Test helper: drop a session row outright, orphaning its chunks
    pub fn delete_session_row(&self, session_id: &Uuid) {
        self.lock().sessions.remove(session_id);
    }

    /// Test helper: count of all chunk rows
    pub fn chunk_row_count(&self) -> usize {
        self.lock().chunks.len()
    }
}

#[async_trait]
impl SessionStore for MockMetaStore {
    async fn create_session(
        &self,
        session_id: Uuid,
        url: &str,
        filename: Option<&str>,
    ) -> DatabaseResult<Session> {
        let now = Utc::now();
        let session = Session {
            session_id,
            url: url.to_string(),
            filename: filename.map(str::to_string),
            status: SessionStatus::Processing,
            total_chunks: None,
            completed_chunks: 0,
            failed_chunks: 0,
            last_heartbeat: now,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().sessions.insert(session_id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &Uuid) -> DatabaseResult<Option<Session>> {
        Ok(self.lock().sessions.get(session_id).cloned())
    }

    async fn heartbeat(&self, session_id: &Uuid) -> DatabaseResult<()> {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            if session.status == SessionStatus::Processing {
                session.last_heartbeat = Utc::now();
                session.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_total_chunks(&self, session_id: &Uuid, total: i32) -> DatabaseResult<()> {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            if session.status == SessionStatus::Processing {
                session.total_chunks = Some(total);
                session.last_heartbeat = Utc::now();
                session.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        session_id: &Uuid,
        completed_chunks: i32,
        failed_chunks: i32,
    ) -> DatabaseResult<()> {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            if session.status == SessionStatus::Processing {
                session.completed_chunks = completed_chunks;
                session.failed_chunks = failed_chunks;
                session.last_heartbeat = Utc::now();
                session.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn record_error(&self, session_id: &Uuid, message: &str) -> DatabaseResult<()> {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            if session.error_message.is_none() {
                session.error_message = Some(message.to_string());
            }
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn end_session(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> DatabaseResult<bool> {
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Err(DatabaseError::NotFound(format!("session {session_id}")));
        };
        if session.status.is_terminal() {
            return Ok(false);
        }
        session.status = status;
        if let Some(message) = error_message {
            if session.error_message.is_none() {
                session.error_message = Some(message.to_string());
            }
        }
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_active_sessions(&self) -> DatabaseResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Processing)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn fail_stale_heartbeats(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for session in self.lock().sessions.values_mut() {
            if session.status == SessionStatus::Processing && session.last_heartbeat < cutoff {
                session.status = SessionStatus::Failed;
                session.error_message = Some(reason.to_string());
                session.updated_at = Utc::now();
                ids.push(session.session_id);
            }
        }
        Ok(ids)
    }

    async fn fail_expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for session in self.lock().sessions.values_mut() {
            if session.status == SessionStatus::Processing && session.created_at < cutoff {
                session.status = SessionStatus::Failed;
                session.error_message = Some(reason.to_string());
                session.updated_at = Utc::now();
                ids.push(session.session_id);
            }
        }
        Ok(ids)
    }

    async fn session_pressure(&self) -> DatabaseResult<(i64, i64)> {
        let state = self.lock();
        let processing = state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Processing)
            .count() as i64;
        Ok((processing, state.sessions.len() as i64))
    }
}

#[async_trait]
impl ChunkStore for MockMetaStore {
    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> DatabaseResult<()> {
        let mut state = self.lock();
        match state.chunks.get_mut(&chunk.chunk_id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = chunk.clone();
                existing.created_at = created_at;
                existing.updated_at = Utc::now();
            }
            None => {
                state.chunks.insert(chunk.chunk_id, chunk.clone());
            }
        }
        Ok(())
    }

    async fn set_embedding_status(
        &self,
        chunk_id: &Uuid,
        status: EmbeddingStatus,
    ) -> DatabaseResult<()> {
        if let Some(chunk) = self.lock().chunks.get_mut(chunk_id) {
            chunk.embedding_status = status;
            chunk.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<Vec<ChunkRecord>> {
        let mut chunks: Vec<ChunkRecord> = self
            .lock()
            .chunks
            .values()
            .filter(|c| c.session_id == *session_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn count_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<i64> {
        Ok(self
            .lock()
            .chunks
            .values()
            .filter(|c| c.session_id == *session_id)
            .count() as i64)
    }

    async fn find_orphaned_chunks(&self, limit: i64) -> DatabaseResult<Vec<Uuid>> {
        let state = self.lock();
        Ok(state
            .chunks
            .values()
            .filter(|c| !state.sessions.contains_key(&c.session_id))
            .take(limit as usize)
            .map(|c| c.chunk_id)
            .collect())
    }

    async fn mark_orphaned_chunks(
        &self,
        chunk_ids: &[Uuid],
        status: EmbeddingStatus,
    ) -> DatabaseResult<u64> {
        let mut changed = 0u64;
        let mut state = self.lock();
        for chunk_id in chunk_ids {
            if let Some(chunk) = state.chunks.get_mut(chunk_id) {
                chunk.embedding_status = status;
                chunk.updated_at = Utc::now();
                changed = changed.saturating_add(1);
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl JobStore for MockMetaStore {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: i32,
    ) -> DatabaseResult<Job> {
        let now = Utc::now();
        let job = Job {
            job_id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Queued,
            priority,
            payload,
            result: None,
            error_message: None,
            attempts: 0,
            max_attempts,
            retry_after: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.lock().jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn claim_next_job(&self) -> DatabaseResult<Option<Job>> {
        let now = Utc::now();
        let mut state = self.lock();

        let job_id = {
            let mut runnable: Vec<&Job> = state
                .jobs
                .values()
                .filter(|j| {
                    matches!(j.status, JobStatus::Queued | JobStatus::Retrying)
                        && j.retry_after.is_none_or(|t| t <= now)
                })
                .collect();
            runnable.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            match runnable.first() {
                Some(job) => job.job_id,
                None => return Ok(None),
            }
        };

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.attempts = job.attempts.saturating_add(1);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, job_id: &Uuid, result: serde_json::Value) -> DatabaseResult<()> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: &Uuid,
        error_message: &str,
        result: Option<serde_json::Value>,
    ) -> DatabaseResult<()> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error_message = Some(error_message.to_string());
                if result.is_some() {
                    job.result = result;
                }
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        job_id: &Uuid,
        error_message: &str,
        retry_after: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Retrying;
                job.error_message = Some(error_message.to_string());
                job.retry_after = Some(retry_after);
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn cancel_job(&self, job_id: &Uuid) -> DatabaseResult<bool> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            if matches!(job.status, JobStatus::Queued | JobStatus::Retrying) {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn mark_cancelled(&self, job_id: &Uuid) -> DatabaseResult<()> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<Job>> {
        Ok(self.lock().jobs.get(job_id).cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> DatabaseResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn recover_stale_jobs(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut changed = 0u64;
        for job in self.lock().jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.started_at.is_some_and(|t| t < cutoff)
            {
                if job.attempts >= job.max_attempts {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(Utc::now());
                } else {
                    job.status = JobStatus::Retrying;
                    job.retry_after = None;
                }
                if job.error_message.is_none() {
                    job.error_message = Some("worker lost".to_string());
                }
                job.updated_at = Utc::now();
                changed = changed.saturating_add(1);
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_end_session_is_terminal_once() {
        let store = MockMetaStore::new();
        let id = Uuid::new_v4();
        store.create_session(id, "http://example/a", None).await.unwrap();

        assert!(store
            .end_session(&id, SessionStatus::Completed, None)
            .await
            .unwrap());
        // Second transition is a no-op
        assert!(!store
            .end_session(&id, SessionStatus::Failed, Some("late"))
            .await
            .unwrap());

        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.error_message.is_none());
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let store = MockMetaStore::new();
        // Enqueued oldest-first: C (pri 5), A (pri 5), B (pri 10)
        let c = store
            .enqueue_job(JobType::UrlProcessing, json!({"url": "c"}), 5, 3)
            .await
            .unwrap();
        let a = store
            .enqueue_job(JobType::UrlProcessing, json!({"url": "a"}), 5, 3)
            .await
            .unwrap();
        let b = store
            .enqueue_job(JobType::UrlProcessing, json!({"url": "b"}), 10, 3)
            .await
            .unwrap();

        let first = store.claim_next_job().await.unwrap().unwrap();
        let second = store.claim_next_job().await.unwrap().unwrap();
        let third = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(first.job_id, b.job_id, "highest priority first");
        assert_eq!(second.job_id, c.job_id, "then oldest at equal priority");
        assert_eq!(third.job_id, a.job_id);
        assert!(store.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_after_gates_claims() {
        let store = MockMetaStore::new();
        let job = store
            .enqueue_job(JobType::UrlProcessing, json!({}), 0, 3)
            .await
            .unwrap();

        let claimed = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);

        store
            .schedule_retry(
                &job.job_id,
                "transient",
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert!(
            store.claim_next_job().await.unwrap().is_none(),
            "future retry_after must gate the claim"
        );
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        let store = MockMetaStore::new();
        let session_id = Uuid::new_v4();
        store
            .create_session(session_id, "http://example/a", None)
            .await
            .unwrap();

        let chunk_id = crate::chunk_id::generate_chunk_id(&session_id, 0);
        let now = Utc::now();
        let chunk = ChunkRecord {
            chunk_id,
            session_id,
            url: "http://example/a".to_string(),
            title: None,
            chunk_index: 0,
            chunk_text: "v1".to_string(),
            contextual_summary: None,
            document_summary: None,
            embedding_status: EmbeddingStatus::Pending,
            processing_status: SessionStatus::Processing,
            sentiment: None,
            category: None,
            content_type: None,
            technical_level: None,
            main_topics: Vec::new(),
            key_concepts: None,
            emotions: Vec::new(),
            tags: None,
            key_entities: crate::models::ChunkEntities::default(),
            uses_contextual_embedding: false,
            created_at: now,
            updated_at: now,
        };
        store.upsert_chunk(&chunk).await.unwrap();

        let mut updated = chunk.clone();
        updated.chunk_text = "v2".to_string();
        updated.created_at = Utc::now();
        store.upsert_chunk(&updated).await.unwrap();

        let chunks = store.get_session_chunks(&session_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, "v2");
        assert_eq!(chunks[0].created_at, now, "created_at must not move");
    }

    #[tokio::test]
    async fn test_orphan_detection() {
        let store = MockMetaStore::new();
        let session_id = Uuid::new_v4();
        store
            .create_session(session_id, "http://example/a", None)
            .await
            .unwrap();

        let chunk_id = crate::chunk_id::generate_chunk_id(&session_id, 0);
        let now = Utc::now();
        let chunk = ChunkRecord {
            chunk_id,
            session_id,
            url: "u".to_string(),
            title: None,
            chunk_index: 0,
            chunk_text: "t".to_string(),
            contextual_summary: None,
            document_summary: None,
            embedding_status: EmbeddingStatus::Complete,
            processing_status: SessionStatus::Completed,
            sentiment: None,
            category: None,
            content_type: None,
            technical_level: None,
            main_topics: Vec::new(),
            key_concepts: None,
            emotions: Vec::new(),
            tags: None,
            key_entities: crate::models::ChunkEntities::default(),
            uses_contextual_embedding: false,
            created_at: now,
            updated_at: now,
        };
        store.upsert_chunk(&chunk).await.unwrap();

        assert!(store.find_orphaned_chunks(10).await.unwrap().is_empty());
        store.delete_session_row(&session_id);
        assert_eq!(store.find_orphaned_chunks(10).await.unwrap(), vec![chunk_id]);
    }
}
