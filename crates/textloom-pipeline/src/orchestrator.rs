//! Pipeline orchestrator
//!
//! One actor per job. Chunk workers run under a bounded semaphore and push
//! their outcomes into a channel; the orchestrator task is the only writer
//! of session state, draining that channel and committing progress. Cancel
//! signals are observed at phase boundaries and before each chunk enqueue;
//! in-flight chunks are allowed to finish.

use crate::error::{PipelineError, PipelineResult};
use crate::payload::{JobInput, JobPayload, ProcessingOptions};
use crate::session::SessionManager;
use serde_json::json;
use std::sync::Arc;
use textloom_analysis::{Analysis, AnalyzeOptions, ChunkAnalyzer};
use textloom_chunking::{ChunkDraft, Chunker};
use textloom_common::ErrorKind;
use textloom_config::ProcessingConfig;
use textloom_embeddings::{EmbeddingService, embedding_input};
use textloom_events::{BroadcastFilter, Event, EventBus, EventType};
use textloom_meta_data::{
    ChunkEntities, ChunkRecord, ChunkStore, EmbeddingStatus, Job, SessionStatus,
    generate_chunk_id,
};
use textloom_sources::{ContentFetcher, ContentSource, UploadStore};
use textloom_vector_data::{VectorPayload, VectorStorage};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Terminal shape of one session run
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub error_message: Option<String>,
}

impl SessionOutcome {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "session_id": self.session_id,
            "status": self.status.to_string(),
            "total_chunks": self.total_chunks,
            "completed_chunks": self.completed_chunks,
            "failed_chunks": self.failed_chunks,
            "error_message": self.error_message,
        })
    }
}

/// What a finished job hands back to the queue layer
#[derive(Debug, Clone)]
pub struct JobRunOutcome {
    /// Terminal `result` object for the job row
    pub result: serde_json::Value,
    /// The cancel signal decided this run
    pub cancelled: bool,
}

/// What one chunk worker reports back over the channel
enum ChunkOutcome {
    Success {
        chunk_index: usize,
        chunk_id: Uuid,
    },
    Failed {
        chunk_index: usize,
        kind: ErrorKind,
        message: String,
    },
    /// Relational store failure; sinks the whole job
    Fatal(PipelineError),
}

/// Everything a chunk worker needs, cheap to clone per task
struct ChunkContext {
    session_id: Uuid,
    url: String,
    title: Option<String>,
    content_type: String,
    document_text: Arc<String>,
    options: ProcessingOptions,
    analyzer: Arc<dyn ChunkAnalyzer>,
    embedder: Arc<EmbeddingService>,
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorStorage>,
    events: EventBus,
}

/// The central actor composing fetch, chunk, analyze, embed, and persist
pub struct PipelineOrchestrator {
    fetcher: Arc<ContentFetcher>,
    uploads: Arc<dyn UploadStore>,
    analyzer: Arc<dyn ChunkAnalyzer>,
    embedder: Arc<EmbeddingService>,
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorStorage>,
    sessions: Arc<SessionManager>,
    events: EventBus,
    config: ProcessingConfig,
}

impl PipelineOrchestrator {
    /// Wire up an orchestrator from its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<ContentFetcher>,
        uploads: Arc<dyn UploadStore>,
        analyzer: Arc<dyn ChunkAnalyzer>,
        embedder: Arc<EmbeddingService>,
        chunks: Arc<dyn ChunkStore>,
        vectors: Arc<dyn VectorStorage>,
        sessions: Arc<SessionManager>,
        events: EventBus,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            fetcher,
            uploads,
            analyzer,
            embedder,
            chunks,
            vectors,
            sessions,
            events,
            config,
        }
    }

    /// Session manager shared with the rest of the system
    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Run one claimed job to its terminal state
    ///
    /// # Errors
    ///
    /// Returns an error when the job cannot produce a terminal session
    /// outcome: payload rejects, a fatal extract/chunk failure, an
    /// all-chunks-failed run, or infrastructure loss. The error's kind
    /// drives the queue's retry policy.
    pub async fn run_job(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> PipelineResult<JobRunOutcome> {
        let payload = JobPayload::parse(job, &self.config)?;

        match payload.input {
            JobInput::Url(ref url) => {
                let outcome = self
                    .run_session(
                        &ContentSource::Url(url.clone()),
                        None,
                        &payload.options,
                        cancel,
                    )
                    .await?;
                Ok(JobRunOutcome {
                    cancelled: outcome.status == SessionStatus::Cancelled,
                    result: outcome.to_json(),
                })
            }
            JobInput::Upload { ref upload_ref } => {
                let stored = self.uploads.fetch(upload_ref).await?;
                let filename = stored.filename.clone();
                let source = ContentSource::Upload {
                    bytes: stored.bytes,
                    mime: stored.mime,
                    filename: stored.filename,
                };
                let outcome = self
                    .run_session(&source, filename.as_deref(), &payload.options, cancel)
                    .await?;
                Ok(JobRunOutcome {
                    cancelled: outcome.status == SessionStatus::Cancelled,
                    result: outcome.to_json(),
                })
            }
            JobInput::Batch { ref urls } => self.run_batch(urls, &payload.options, cancel).await,
        }
    }

    /// Batch jobs run URLs sequentially, one session each, and aggregate
    async fn run_batch(
        &self,
        urls: &[String],
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<JobRunOutcome> {
        // A client-provided session id cannot cover several sessions
        let options = ProcessingOptions {
            session_id: None,
            ..*options
        };

        let mut sessions = Vec::new();
        let mut completed = 0i64;
        let mut failed = 0i64;
        let mut first_error: Option<String> = None;

        for url in urls {
            if cancel.is_cancelled() {
                break;
            }
            match self
                .run_session(&ContentSource::Url(url.clone()), None, &options, cancel)
                .await
            {
                Ok(outcome) => {
                    completed = completed.saturating_add(i64::from(outcome.completed_chunks));
                    failed = failed.saturating_add(i64::from(outcome.failed_chunks));
                    sessions.push(outcome.to_json());
                }
                // Infrastructure loss sinks the whole batch; anything else
                // is that URL's outcome
                Err(e) if e.kind() == ErrorKind::RelationalStoreUnavailable => return Err(e),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                    sessions.push(json!({ "url": url, "error_message": e.to_string() }));
                }
            }
        }

        Ok(JobRunOutcome {
            cancelled: cancel.is_cancelled(),
            result: json!({
                "sessions": sessions,
                "completed_chunks": completed,
                "failed_chunks": failed,
                "error_message": first_error,
            }),
        })
    }

    /// Run one session end to end
    async fn run_session(
        &self,
        source: &ContentSource,
        filename: Option<&str>,
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<SessionOutcome> {
        // Phase 1: Acquire
        let url = match source {
            ContentSource::Url(url) => url.clone(),
            ContentSource::Upload { bytes, .. } => textloom_sources::synthetic_upload_url(bytes),
        };
        let session = self.sessions.start(&url, filename, options.session_id).await?;
        let session_id = session.session_id;

        self.emit(
            session_id,
            EventType::ProcessingStarted,
            json!({ "url": url, "filename": filename }),
        );
        info!(session_id = %session_id, url = %url, "Processing started");

        match self.process(session_id, &url, source, options, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(PipelineError::Cancelled) => {
                self.sessions
                    .end(&session_id, SessionStatus::Cancelled, None)
                    .await?;
                let outcome = self.outcome_from_row(session_id, SessionStatus::Cancelled).await;
                self.emit_completed(&outcome);
                Ok(outcome)
            }
            Err(e) if e.kind() == ErrorKind::RelationalStoreUnavailable => {
                // The session row cannot be finalized either; the cleanup
                // service will fail it once the store is back
                error!(session_id = %session_id, error = %e, "Relational store lost mid-session");
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(session_id = %session_id, error = %message, "Session failed");
                self.sessions.record_error(&session_id, &message).await?;
                self.sessions
                    .end(&session_id, SessionStatus::Failed, Some(&message))
                    .await?;
                self.emit(
                    session_id,
                    EventType::ErrorOccurred,
                    json!({ "error": message }),
                );
                let outcome = self.outcome_from_row(session_id, SessionStatus::Failed).await;
                self.emit_completed(&outcome);
                Err(e)
            }
        }
    }

    /// Phases 2-5 against an existing session row
    async fn process(
        &self,
        session_id: Uuid,
        url: &str,
        source: &ContentSource,
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<SessionOutcome> {
        // Phase 2: Extract
        check_cancel(cancel)?;
        let document = self.fetcher.fetch(source).await?;
        self.sessions.heartbeat(&session_id).await?;
        check_cancel(cancel)?;

        let text = document.text.trim();
        if text.is_empty() {
            return Err(PipelineError::EmptyContent);
        }

        // Phase 3: Chunk
        let chunker = Chunker::new(options.chunk_options());
        let drafts = chunker.chunk(text);
        if drafts.is_empty() {
            return Err(PipelineError::EmptyContent);
        }
        let total = drafts.len();
        self.sessions.set_total_chunks(&session_id, total as i32).await?;
        check_cancel(cancel)?;

        // Phase 4: per-chunk pipeline under bounded concurrency
        let concurrency = self.config.max_concurrent_operations.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let (tx, mut rx) = mpsc::channel::<ChunkOutcome>(concurrency.saturating_mul(2));
        let document_text = Arc::new(text.to_string());

        let mut tasks = JoinSet::new();
        let mut enqueued = 0usize;

        for draft in drafts {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = cancel.cancelled() => break,
            };

            let ctx = ChunkContext {
                session_id,
                url: url.to_string(),
                title: document.title.clone(),
                content_type: document.kind.as_str().to_string(),
                document_text: Arc::clone(&document_text),
                options: *options,
                analyzer: Arc::clone(&self.analyzer),
                embedder: Arc::clone(&self.embedder),
                chunks: Arc::clone(&self.chunks),
                vectors: Arc::clone(&self.vectors),
                events: self.events.clone(),
            };
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = process_chunk(&ctx, &draft).await;
                drop(permit);
                let _ = tx.send(outcome).await;
            });
            enqueued = enqueued.saturating_add(1);
        }
        drop(tx);
        debug!(session_id = %session_id, enqueued, total, "Chunk enqueue finished");

        // Single-writer drain: this loop is the only place session progress
        // is committed
        let mut completed = 0i32;
        let mut failed = 0i32;
        let mut last_failure: Option<(ErrorKind, String)> = None;
        let mut infrastructure: Option<PipelineError> = None;

        while let Some(outcome) = rx.recv().await {
            match outcome {
                ChunkOutcome::Success {
                    chunk_index,
                    chunk_id,
                } => {
                    completed = completed.saturating_add(1);
                    self.emit(
                        session_id,
                        EventType::ChunkProcessed,
                        json!({ "chunk_index": chunk_index, "chunk_id": chunk_id }),
                    );
                }
                ChunkOutcome::Failed {
                    chunk_index,
                    kind,
                    message,
                } => {
                    failed = failed.saturating_add(1);
                    self.emit(
                        session_id,
                        EventType::ErrorOccurred,
                        json!({ "chunk_index": chunk_index, "error": message, "kind": kind }),
                    );
                    last_failure = Some((kind, message));
                }
                ChunkOutcome::Fatal(e) => {
                    // Stop feeding work; in-flight chunks drain out
                    cancel.cancel();
                    if infrastructure.is_none() {
                        infrastructure = Some(e);
                    }
                    continue;
                }
            }

            self.sessions.heartbeat(&session_id).await?;
            self.sessions
                .update_progress(&session_id, completed, failed, "processing", false)
                .await?;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(session_id = %session_id, error = %e, "Chunk task panicked");
            }
        }

        if let Some(e) = infrastructure {
            return Err(e);
        }

        // Phase 5: Finalize
        self.sessions
            .update_progress(&session_id, completed, failed, "finalizing", true)
            .await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if completed == 0 {
            let (kind, message) =
                last_failure.unwrap_or((ErrorKind::Internal, "no chunks processed".to_string()));
            return Err(PipelineError::Chunks {
                kind,
                message: format!("all chunks failed: {message}"),
            });
        }
        if i64::from(failed).saturating_mul(2) > total as i64 {
            let (kind, message) =
                last_failure.unwrap_or((ErrorKind::Internal, "unknown".to_string()));
            return Err(PipelineError::Chunks {
                kind,
                message: format!("chunk failure rate exceeded 50%: {message}"),
            });
        }

        self.sessions
            .end(&session_id, SessionStatus::Completed, None)
            .await?;

        let outcome = SessionOutcome {
            session_id,
            status: SessionStatus::Completed,
            total_chunks: total as i32,
            completed_chunks: completed,
            failed_chunks: failed,
            error_message: None,
        };
        self.emit_completed(&outcome);
        info!(
            session_id = %session_id,
            completed, failed, total,
            "Processing completed"
        );
        Ok(outcome)
    }

    /// Rebuild an outcome from the session row for non-completed endings
    async fn outcome_from_row(&self, session_id: Uuid, status: SessionStatus) -> SessionOutcome {
        let row = self.sessions.get(&session_id).await.ok().flatten();
        SessionOutcome {
            session_id,
            status,
            total_chunks: row.as_ref().and_then(|s| s.total_chunks).unwrap_or(0),
            completed_chunks: row.as_ref().map_or(0, |s| s.completed_chunks),
            failed_chunks: row.as_ref().map_or(0, |s| s.failed_chunks),
            error_message: row.and_then(|s| s.error_message),
        }
    }

    fn emit(&self, session_id: Uuid, event_type: EventType, data: serde_json::Value) {
        self.events.broadcast(
            &Event::for_session(session_id, event_type, data),
            &BroadcastFilter::default(),
        );
    }

    fn emit_completed(&self, outcome: &SessionOutcome) {
        self.emit(
            outcome.session_id,
            EventType::ProcessingCompleted,
            json!({
                "status": outcome.status.to_string(),
                "completed_chunks": outcome.completed_chunks,
                "failed_chunks": outcome.failed_chunks,
                "error_message": outcome.error_message,
            }),
        );
    }
}

fn check_cancel(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// The per-chunk pipeline: analyze, embed, persist row then vector
async fn process_chunk(ctx: &ChunkContext, draft: &ChunkDraft) -> ChunkOutcome {
    let chunk_index = draft.index;
    let chunk_id = generate_chunk_id(&ctx.session_id, chunk_index as i32);

    // (a) Analyze
    let analyze_options = AnalyzeOptions {
        contextual_summary: ctx.options.enable_contextual_embeddings,
        document_summary: ctx.options.generate_summary && chunk_index == 0,
    };
    let analysis = match ctx
        .analyzer
        .analyze(&draft.text, &ctx.document_text, &analyze_options)
        .await
    {
        Ok(analysis) => analysis,
        Err(e) => {
            let message = e.to_string();
            let kind = e.kind();
            let record = chunk_record(ctx, draft, chunk_id, None, EmbeddingStatus::Failed);
            if let Err(db) = ctx.chunks.upsert_chunk(&record).await {
                return ChunkOutcome::Fatal(db.into());
            }
            return ChunkOutcome::Failed {
                chunk_index,
                kind,
                message: format!("analysis failed: {message}"),
            };
        }
    };
    broadcast(ctx, EventType::AnalysisCompleted, json!({ "chunk_index": chunk_index }));

    // (b) Embed the contextual summary + chunk text
    let input = embedding_input(&draft.text, analysis.contextual_summary.as_deref());
    let vector = match ctx.embedder.embed_one(&input).await {
        Ok(vector) => vector,
        Err(e) => {
            let message = e.to_string();
            let kind = e.kind();
            let record =
                chunk_record(ctx, draft, chunk_id, Some(&analysis), EmbeddingStatus::Failed);
            if let Err(db) = ctx.chunks.upsert_chunk(&record).await {
                return ChunkOutcome::Fatal(db.into());
            }
            return ChunkOutcome::Failed {
                chunk_index,
                kind,
                message: format!("embedding failed: {message}"),
            };
        }
    };
    broadcast(
        ctx,
        EventType::EmbeddingCreated,
        json!({ "chunk_index": chunk_index, "dimensions": vector.len() }),
    );

    // (c) Persist: relational row before the vector
    let mut record = chunk_record(
        ctx,
        draft,
        chunk_id,
        Some(&analysis),
        EmbeddingStatus::Processing,
    );
    if let Err(db) = ctx.chunks.upsert_chunk(&record).await {
        return ChunkOutcome::Fatal(db.into());
    }

    let payload = VectorPayload {
        url: ctx.url.clone(),
        title: ctx.title.clone(),
        chunk_index: chunk_index as i32,
        category: record.category.clone(),
        sentiment: record.sentiment.clone(),
        main_topics: record.main_topics.clone(),
        uses_contextual_embedding: record.uses_contextual_embedding,
    };
    match ctx.vectors.upsert_vector(chunk_id, vector, payload).await {
        Ok(()) => {
            record.embedding_status = EmbeddingStatus::Complete;
            record.processing_status = SessionStatus::Completed;
            if let Err(db) = ctx.chunks.upsert_chunk(&record).await {
                return ChunkOutcome::Fatal(db.into());
            }
            ChunkOutcome::Success {
                chunk_index,
                chunk_id,
            }
        }
        Err(e) => {
            // The row stays behind as the recovery anchor
            let message = e.to_string();
            let kind = e.kind();
            if let Err(db) = ctx
                .chunks
                .set_embedding_status(&chunk_id, EmbeddingStatus::Failed)
                .await
            {
                return ChunkOutcome::Fatal(db.into());
            }
            ChunkOutcome::Failed {
                chunk_index,
                kind,
                message: format!("vector write failed: {message}"),
            }
        }
    }
}

fn broadcast(ctx: &ChunkContext, event_type: EventType, data: serde_json::Value) {
    ctx.events.broadcast(
        &Event::for_session(ctx.session_id, event_type, data),
        &BroadcastFilter::default(),
    );
}

fn chunk_record(
    ctx: &ChunkContext,
    draft: &ChunkDraft,
    chunk_id: Uuid,
    analysis: Option<&Analysis>,
    embedding_status: EmbeddingStatus,
) -> ChunkRecord {
    let now = chrono::Utc::now();
    let contextual_summary = analysis.and_then(|a| a.contextual_summary.clone());
    let uses_contextual_embedding = contextual_summary.is_some();

    ChunkRecord {
        chunk_id,
        session_id: ctx.session_id,
        url: ctx.url.clone(),
        title: ctx.title.clone(),
        chunk_index: draft.index as i32,
        chunk_text: draft.text.clone(),
        contextual_summary,
        document_summary: analysis.and_then(|a| a.document_summary.clone()),
        embedding_status,
        processing_status: if embedding_status == EmbeddingStatus::Failed {
            SessionStatus::Failed
        } else {
            SessionStatus::Processing
        },
        sentiment: analysis.map(|a| a.sentiment.clone()),
        category: analysis.map(|a| a.category.clone()),
        content_type: analysis
            .map(|a| a.content_type.clone())
            .or_else(|| Some(ctx.content_type.clone())),
        technical_level: analysis.map(|a| a.technical_level.clone()),
        main_topics: analysis.map(|a| a.main_topics.clone()).unwrap_or_default(),
        key_concepts: analysis.map(|a| a.key_concepts.clone()),
        emotions: analysis.map(|a| a.emotions.clone()).unwrap_or_default(),
        tags: analysis.map(|a| a.tags.clone()),
        key_entities: analysis
            .map(|a| ChunkEntities {
                people: a.key_entities.people.clone(),
                organizations: a.key_entities.organizations.clone(),
                locations: a.key_entities.locations.clone(),
            })
            .unwrap_or_default(),
        uses_contextual_embedding,
        created_at: now,
        updated_at: now,
    }
}
