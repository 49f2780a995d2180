//! End-to-end pipeline scenarios over in-memory stores
//!
//! These exercise the orchestrator, worker pool, session lifecycle, and
//! cleanup service together, with a real HTTP stub only where a URL input
//! is part of the scenario.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use textloom_analysis::{
    Analysis, AnalysisResult, AnalyzeOptions, ChunkAnalyzer, MockAnalyzer,
};
use textloom_config::{CleanupConfig, EventsConfig, JobConfig, ProcessingConfig, SourcesConfig};
use textloom_embeddings::{EmbeddingService, MockEmbeddingProvider};
use textloom_events::EventBus;
use textloom_meta_data::{
    ChunkStore, EmbeddingStatus, JobStatus, JobStore, JobType, MockMetaStore, SessionStatus,
    SessionStore, generate_chunk_id,
};
use textloom_pipeline::{
    CleanupService, JobWorkerPool, PipelineOrchestrator, SessionManager,
};
use textloom_sources::{ContentFetcher, FsUploadStore, UploadStore};
use textloom_vector_data::{MockStorage, VectorStorage};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIM: usize = 8;

struct Harness {
    store: Arc<MockMetaStore>,
    vectors: Arc<MockStorage>,
    events: EventBus,
    orchestrator: Arc<PipelineOrchestrator>,
    pool: Arc<JobWorkerPool>,
    uploads: Arc<FsUploadStore>,
    _upload_dir: tempfile::TempDir,
}

fn harness_with_analyzer(analyzer: Arc<dyn ChunkAnalyzer>, concurrency: usize) -> Harness {
    let store = Arc::new(MockMetaStore::new());
    let vectors = Arc::new(MockStorage::new(DIM));
    let events = EventBus::new(EventsConfig {
        keep_alive_interval_ms: 60_000,
        client_buffer: 4_096,
    });

    let provider = Arc::new(MockEmbeddingProvider::new(DIM));
    let embedder = Arc::new(EmbeddingService::new(provider, 10));

    let sources_config = SourcesConfig {
        fetch_timeout_secs: 5,
        max_redirects: 5,
        max_body_bytes: 10 * 1024 * 1024,
        upload_dir: "./uploads".to_string(),
    };
    let fetcher = Arc::new(ContentFetcher::new(&sources_config).unwrap());

    let upload_dir = tempfile::tempdir().unwrap();
    let uploads = Arc::new(FsUploadStore::new(upload_dir.path().to_path_buf()).unwrap());

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store) as Arc<dyn SessionStore>,
        events.clone(),
        5_000,
    ));

    let config = ProcessingConfig {
        chunk_size: 1_000,
        chunk_overlap: 200,
        max_concurrent_operations: concurrency,
        enable_contextual_embeddings: false,
        progress_update_interval_ms: 5_000,
    };

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        fetcher,
        Arc::clone(&uploads) as Arc<dyn UploadStore>,
        analyzer,
        embedder,
        Arc::clone(&store) as Arc<dyn ChunkStore>,
        Arc::clone(&vectors) as Arc<dyn VectorStorage>,
        sessions,
        events.clone(),
        config,
    ));

    let pool = Arc::new(JobWorkerPool::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&orchestrator),
        JobConfig {
            worker_pool_size: 2,
            poll_interval_ms: 20,
            max_attempts: 3,
        },
    ));

    Harness {
        store,
        vectors,
        events,
        orchestrator,
        pool,
        uploads,
        _upload_dir: upload_dir,
    }
}

fn harness(concurrency: usize) -> Harness {
    harness_with_analyzer(Arc::new(MockAnalyzer::new()), concurrency)
}

/// Drain every frame currently buffered for a subscriber, parsed
fn drain_events(receiver: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = receiver.try_recv() {
        frames.push(serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap());
    }
    frames
}

fn count_events(frames: &[serde_json::Value], name: &str) -> usize {
    frames.iter().filter(|f| f["event"] == name).count()
}

// S1: URL happy path with contextual embeddings
#[tokio::test]
async fn test_url_happy_path_with_contextual_embeddings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("x".repeat(2_400))
                .insert_header("content-type", "text/plain"),
        )
        .mount(&server)
        .await;

    let h = harness(5);
    let mut sub = h.events.subscribe();

    let job = h
        .store
        .enqueue_job(
            JobType::UrlProcessing,
            json!({
                "url": format!("{}/a", server.uri()),
                "options": {
                    "chunk_size": 1000,
                    "chunk_overlap": 200,
                    "enable_contextual_embeddings": true
                }
            }),
            0,
            3,
        )
        .await
        .unwrap();

    h.pool.process_one_job().await.unwrap();

    // Job terminal with a result carrying the session
    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["completed_chunks"], 3);
    assert_eq!(result["failed_chunks"], 0);

    let session_id: Uuid = serde_json::from_value(result["session_id"].clone()).unwrap();
    let session = h.store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_chunks, Some(3));
    assert_eq!(session.completed_chunks, 3);

    // Three chunk rows with dense indices and contextual summaries
    let chunks = h.store.get_session_chunks(&session_id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i32);
        assert_eq!(chunk.embedding_status, EmbeddingStatus::Complete);
        assert!(chunk.uses_contextual_embedding);
        assert!(
            chunk
                .contextual_summary
                .as_deref()
                .is_some_and(|s| !s.is_empty())
        );
        // Invariant: complete row => vector present, at the configured dim
        assert!(h.vectors.has_vector(&chunk.chunk_id).await.unwrap());
        assert_eq!(h.vectors.point_dimension(&chunk.chunk_id), Some(DIM));
    }
    assert_eq!(h.vectors.point_count(), 3);

    let frames = drain_events(&mut sub.receiver);
    assert_eq!(count_events(&frames, "processing_started"), 1);
    assert_eq!(count_events(&frames, "analysis_completed"), 3);
    assert_eq!(count_events(&frames, "embedding_created"), 3);
    assert_eq!(count_events(&frames, "chunk_processed"), 3);
    assert_eq!(count_events(&frames, "processing_completed"), 1);
}

// Law 6: same session id + same input => same chunk ids, same row count
#[tokio::test]
async fn test_reprocessing_same_session_is_idempotent() {
    let h = harness(5);
    let session_id = Uuid::new_v4();

    let upload_ref = h
        .uploads
        .store(
            Bytes::from("w".repeat(1_500)),
            Some("doc.txt".to_string()),
            Some("text/plain".to_string()),
        )
        .await
        .unwrap();

    let payload = json!({
        "upload_ref": upload_ref,
        "options": { "chunk_size": 1000, "chunk_overlap": 200, "session_id": session_id }
    });

    for _ in 0..2 {
        h.store
            .enqueue_job(JobType::FileProcessing, payload.clone(), 0, 3)
            .await
            .unwrap();
        h.pool.process_one_job().await.unwrap();
    }

    let chunks = h.store.get_session_chunks(&session_id).await.unwrap();
    assert_eq!(chunks.len(), 2, "second run must rewrite, not duplicate");
    assert_eq!(h.store.chunk_row_count(), 2);
    for chunk in &chunks {
        assert_eq!(
            chunk.chunk_id,
            generate_chunk_id(&session_id, chunk.chunk_index)
        );
    }
    assert_eq!(h.vectors.point_count(), 2);
}

// S4: partial failure completes the session with failed_chunks counted
#[tokio::test]
async fn test_partial_failure_still_completes() {
    let h = harness(5);
    let marker = textloom_analysis::mock::FAIL_MARKER;

    // Five exact 100-char windows; chunks 2 and 4 carry the fail marker
    let mut text = String::new();
    for i in 0..5 {
        let seg = if i == 2 || i == 4 {
            let mut s = marker.to_string();
            s.push_str(&"a".repeat(100 - marker.len()));
            s
        } else {
            "a".repeat(100)
        };
        text.push_str(&seg);
    }

    let upload_ref = h
        .uploads
        .store(Bytes::from(text), None, Some("text/plain".to_string()))
        .await
        .unwrap();

    let job = h
        .store
        .enqueue_job(
            JobType::FileProcessing,
            json!({
                "upload_ref": upload_ref,
                "options": { "chunk_size": 100, "chunk_overlap": 0 }
            }),
            0,
            3,
        )
        .await
        .unwrap();

    h.pool.process_one_job().await.unwrap();

    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1, "chunk failures must not consume job attempts");

    let result = job.result.unwrap();
    let session_id: Uuid = serde_json::from_value(result["session_id"].clone()).unwrap();

    let session = h.store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.completed_chunks, 3);
    assert_eq!(session.failed_chunks, 2);
    assert_eq!(session.total_chunks, Some(5));
    // Invariant: on completed, the counters cover the total
    assert_eq!(
        session.completed_chunks + session.failed_chunks,
        session.total_chunks.unwrap()
    );

    let chunks = h.store.get_session_chunks(&session_id).await.unwrap();
    assert_eq!(chunks.len(), 5, "failed chunks keep their rows");
    for chunk in &chunks {
        let expected = if chunk.chunk_index == 2 || chunk.chunk_index == 4 {
            EmbeddingStatus::Failed
        } else {
            EmbeddingStatus::Complete
        };
        assert_eq!(chunk.embedding_status, expected, "chunk {}", chunk.chunk_index);
    }
    assert_eq!(h.vectors.point_count(), 3);
}

// Boundary 11: empty extraction fails the session before any chunk exists
#[tokio::test]
async fn test_empty_content_fails_session() {
    let h = harness(5);

    let upload_ref = h
        .uploads
        .store(
            Bytes::from_static(b"   \n\n  "),
            None,
            Some("text/plain".to_string()),
        )
        .await
        .unwrap();

    let job = h
        .store
        .enqueue_job(
            JobType::FileProcessing,
            json!({ "upload_ref": upload_ref }),
            0,
            3,
        )
        .await
        .unwrap();

    h.pool.process_one_job().await.unwrap();

    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed, "validation errors are terminal");

    let sessions = h.store.list_jobs(None, 10).await.unwrap();
    assert_eq!(sessions.len(), 1);

    // Exactly one session exists, failed with the canonical message
    let (_, total) = h.store.session_pressure().await.unwrap();
    assert_eq!(total, 1);
    let active = h.store.list_active_sessions().await.unwrap();
    assert!(active.is_empty());
    assert_eq!(h.store.chunk_row_count(), 0);

    let result = job.result.unwrap();
    assert!(
        result["error_message"]
            .as_str()
            .unwrap()
            .contains("empty content")
    );
}

// Vector store loss: rows remain as recovery anchors, job retries
#[tokio::test]
async fn test_vector_write_failure_leaves_recovery_anchor() {
    let h = harness(5);
    h.vectors.set_fail_upserts(true);

    let upload_ref = h
        .uploads
        .store(
            Bytes::from("v".repeat(150)),
            None,
            Some("text/plain".to_string()),
        )
        .await
        .unwrap();

    let job = h
        .store
        .enqueue_job(
            JobType::FileProcessing,
            json!({
                "upload_ref": upload_ref,
                "options": { "chunk_size": 150, "chunk_overlap": 0 }
            }),
            0,
            3,
        )
        .await
        .unwrap();

    h.pool.process_one_job().await.unwrap();

    // All chunks failed at the vector stage => retryable kind => retrying
    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert!(job.retry_after.is_some());

    let jobs = h.store.list_jobs(Some(JobStatus::Retrying), 10).await.unwrap();
    assert_eq!(jobs.len(), 1);

    // The chunk row survived with embedding_status=failed and no vector
    assert_eq!(h.store.chunk_row_count(), 1);
    assert_eq!(h.vectors.point_count(), 0);
}

/// Analyzer that parks on chunks carrying a hold marker until released
struct HoldAnalyzer {
    inner: MockAnalyzer,
    reached: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl ChunkAnalyzer for HoldAnalyzer {
    async fn analyze(
        &self,
        chunk_text: &str,
        document_text: &str,
        options: &AnalyzeOptions,
    ) -> AnalysisResult<Analysis> {
        if chunk_text.contains("<<hold>>") {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.analyze(chunk_text, document_text, options).await
    }
}

// S5: cancellation lets in-flight chunks finish, writes nothing beyond
#[tokio::test]
async fn test_cancellation_stops_future_chunks() {
    let reached = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let analyzer = Arc::new(HoldAnalyzer {
        inner: MockAnalyzer::new(),
        reached: Arc::clone(&reached),
        release: Arc::clone(&release),
    });
    // Concurrency 1 so chunks run strictly in index order
    let h = harness_with_analyzer(analyzer, 1);
    let mut sub = h.events.subscribe();

    // Ten exact 100-char windows; chunk 2 carries the hold marker
    let mut text = String::new();
    for i in 0..10 {
        if i == 2 {
            text.push_str("<<hold>>");
            text.push_str(&"b".repeat(92));
        } else {
            text.push_str(&"b".repeat(100));
        }
    }

    let upload_ref = h
        .uploads
        .store(Bytes::from(text), None, Some("text/plain".to_string()))
        .await
        .unwrap();
    h.store
        .enqueue_job(
            JobType::FileProcessing,
            json!({
                "upload_ref": upload_ref,
                "options": { "chunk_size": 100, "chunk_overlap": 0 }
            }),
            0,
            3,
        )
        .await
        .unwrap();

    let claimed = h.store.claim_next_job().await.unwrap().unwrap();
    let token = CancellationToken::new();
    let orchestrator = Arc::clone(&h.orchestrator);
    let run_token = token.clone();
    let handle =
        tokio::spawn(async move { orchestrator.run_job(&claimed, &run_token).await });

    // Chunk 2 is in flight; cancel, then let it finish
    reached.notified().await;
    token.cancel();
    release.notify_one();

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.result["status"], "cancelled");

    let session_id: Uuid =
        serde_json::from_value(outcome.result["session_id"].clone()).unwrap();
    let session = h.store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);

    let chunks = h.store.get_session_chunks(&session_id).await.unwrap();
    assert!(
        chunks.iter().all(|c| c.chunk_index <= 2),
        "no chunk beyond the in-flight one may be written"
    );

    let frames = drain_events(&mut sub.receiver);
    let completed: Vec<_> = frames
        .iter()
        .filter(|f| f["event"] == "processing_completed")
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["data"]["status"], "cancelled");
}

// S3: a stuck session is failed by cleanup and goes quiet
#[tokio::test]
async fn test_stuck_session_failed_by_cleanup() {
    let h = harness(5);
    let mut sub = h.events.subscribe();

    // Simulate an orchestrator that died mid-run
    let session = h
        .store
        .create_session(Uuid::new_v4(), "http://example/dead", None)
        .await
        .unwrap();
    h.store.set_last_heartbeat(
        &session.session_id,
        Utc::now() - ChronoDuration::minutes(5),
    );

    let cleanup = CleanupService::new(
        Arc::clone(&h.store) as Arc<dyn SessionStore>,
        Arc::clone(&h.store) as Arc<dyn ChunkStore>,
        Arc::clone(&h.store) as Arc<dyn JobStore>,
        Arc::clone(&h.vectors) as Arc<dyn VectorStorage>,
        CleanupConfig {
            cleanup_interval_ms: 120_000,
            emergency_interval_ms: 30_000,
            session_timeout_ms: 480_000,
            heartbeat_timeout_ms: 90_000,
        },
    );

    let report = cleanup.run_once(false).await.unwrap();
    assert_eq!(report.stale_heartbeats_failed, 1);

    let row = h.store.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Failed);
    assert_eq!(row.error_message.as_deref(), Some("heartbeat timeout"));

    // Cleanup emits no stream events for the dead session
    let frames = drain_events(&mut sub.receiver);
    let for_session = frames.iter().any(|f| {
        f["data"]["session_id"] == json!(session.session_id)
    });
    assert!(!for_session);
}

// S6: claim order is priority first, then age
#[tokio::test]
async fn test_queue_ordering_priority_then_age() {
    let h = harness(5);

    // Enqueued oldest-first: C (pri 5), A (pri 5), B (pri 10)
    let c = h
        .store
        .enqueue_job(JobType::UrlProcessing, json!({"url": "http://c"}), 5, 3)
        .await
        .unwrap();
    let a = h
        .store
        .enqueue_job(JobType::UrlProcessing, json!({"url": "http://a"}), 5, 3)
        .await
        .unwrap();
    let b = h
        .store
        .enqueue_job(JobType::UrlProcessing, json!({"url": "http://b"}), 10, 3)
        .await
        .unwrap();

    let order: Vec<Uuid> = [
        h.store.claim_next_job().await.unwrap().unwrap().job_id,
        h.store.claim_next_job().await.unwrap().unwrap().job_id,
        h.store.claim_next_job().await.unwrap().unwrap().job_id,
    ]
    .to_vec();
    assert_eq!(order, vec![b.job_id, c.job_id, a.job_id]);
}

// Cancellation of a queued job never reaches the orchestrator
#[tokio::test]
async fn test_cancel_queued_job() {
    let h = harness(5);
    let job = h
        .store
        .enqueue_job(JobType::UrlProcessing, json!({"url": "http://x"}), 0, 3)
        .await
        .unwrap();

    assert!(h.pool.cancel(&job.job_id).await.unwrap());
    let row = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Cancelled);
    assert!(row.completed_at.is_some());

    // Nothing left to claim
    assert!(h.pool.process_one_job().await.unwrap().is_none());
}

// Batch jobs aggregate one session per URL
#[tokio::test]
async fn test_batch_processing_aggregates_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("m".repeat(400))
                .insert_header("content-type", "text/plain"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("n".repeat(400))
                .insert_header("content-type", "text/plain"),
        )
        .mount(&server)
        .await;

    let h = harness(5);
    let job = h
        .store
        .enqueue_job(
            JobType::BatchProcessing,
            json!({
                "urls": [format!("{}/one", server.uri()), format!("{}/two", server.uri())],
                "options": { "chunk_size": 400, "chunk_overlap": 0 }
            }),
            0,
            3,
        )
        .await
        .unwrap();

    h.pool.process_one_job().await.unwrap();

    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(result["completed_chunks"], 2);

    let (_, total_sessions) = h.store.session_pressure().await.unwrap();
    assert_eq!(total_sessions, 2);
}

// Orphan scan: vectors decide complete vs failed
#[tokio::test]
async fn test_orphan_scan_reconciles() {
    let h = harness(5);

    let upload_ref = h
        .uploads
        .store(
            Bytes::from("o".repeat(300)),
            None,
            Some("text/plain".to_string()),
        )
        .await
        .unwrap();
    let job = h
        .store
        .enqueue_job(
            JobType::FileProcessing,
            json!({
                "upload_ref": upload_ref,
                "options": { "chunk_size": 300, "chunk_overlap": 0 }
            }),
            0,
            3,
        )
        .await
        .unwrap();
    h.pool.process_one_job().await.unwrap();

    let job = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    let session_id: Uuid =
        serde_json::from_value(job.result.unwrap()["session_id"].clone()).unwrap();

    // Orphan the chunks, then mark one's vector missing
    let chunks = h.store.get_session_chunks(&session_id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    h.store.delete_session_row(&session_id);

    let cleanup = CleanupService::new(
        Arc::clone(&h.store) as Arc<dyn SessionStore>,
        Arc::clone(&h.store) as Arc<dyn ChunkStore>,
        Arc::clone(&h.store) as Arc<dyn JobStore>,
        Arc::clone(&h.vectors) as Arc<dyn VectorStorage>,
        CleanupConfig {
            cleanup_interval_ms: 120_000,
            emergency_interval_ms: 30_000,
            session_timeout_ms: 480_000,
            heartbeat_timeout_ms: 90_000,
        },
    );

    let (completed, failed) = cleanup.orphan_scan().await.unwrap();
    assert_eq!((completed, failed), (1, 0));

    // Remove the vector and the next scan downgrades it
    h.vectors.delete_vectors(&[chunks[0].chunk_id]).await.unwrap();
    let (_, failed) = cleanup.orphan_scan().await.unwrap();
    assert_eq!(failed, 1);
}

// Stale processing jobs are recovered once past the recovery window
#[tokio::test]
async fn test_stale_job_recovery() {
    let h = harness(5);
    let job = h
        .store
        .enqueue_job(JobType::UrlProcessing, json!({"url": "http://x"}), 0, 3)
        .await
        .unwrap();
    let claimed = h.store.claim_next_job().await.unwrap().unwrap();
    assert_eq!(claimed.job_id, job.job_id);

    // Pretend the worker died 20 minutes ago
    h.store
        .set_job_started_at(&job.job_id, Utc::now() - ChronoDuration::minutes(20));

    let cleanup = CleanupService::new(
        Arc::clone(&h.store) as Arc<dyn SessionStore>,
        Arc::clone(&h.store) as Arc<dyn ChunkStore>,
        Arc::clone(&h.store) as Arc<dyn JobStore>,
        Arc::clone(&h.vectors) as Arc<dyn VectorStorage>,
        CleanupConfig {
            cleanup_interval_ms: 120_000,
            emergency_interval_ms: 30_000,
            session_timeout_ms: 480_000,
            heartbeat_timeout_ms: 90_000,
        },
    );

    assert_eq!(cleanup.stale_job_scan().await.unwrap(), 1);
    let row = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Retrying, "attempt budget left => requeue");
}
