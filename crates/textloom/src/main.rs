//! Textloom daemon
//!
//! Wires the ingestion pipeline together and runs it: worker pool over the
//! durable job queue, cleanup scans, and the progress event stream. The
//! HTTP surface lives elsewhere; this binary owns the long-running core.

#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use textloom_analysis::OpenAiAnalyzer;
use textloom_config::{ApplicationConfig, validation::Validate};
use textloom_embeddings::{EmbeddingService, OpenAiEmbeddings};
use textloom_events::EventBus;
use textloom_meta_data::{
    JobStore, JobType, PgChunkStore, PgJobStore, PgSessionStore, PoolManager, run_migrations,
};
use textloom_pipeline::{
    CleanupService, JobWorkerPool, PipelineOrchestrator, SessionManager,
};
use textloom_sources::{ContentFetcher, FsUploadStore};
use textloom_vector_data::QdrantStorage;
use tracing::info;

#[derive(Parser)]
#[command(name = "textloom", about = "Document ingestion pipeline daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and cleanup service (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Enqueue a URL-processing job and exit
    EnqueueUrl {
        /// URL to ingest
        url: String,
        /// Queue priority; higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Generate contextual summaries and embed with them
        #[arg(long)]
        contextual: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    textloom_common::initialize_environment();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ApplicationConfig::from_env();
    config.validate().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
        Command::EnqueueUrl {
            url,
            priority,
            contextual,
        } => enqueue_url(config, url, priority, contextual).await,
    }
}

async fn migrate(config: ApplicationConfig) -> Result<()> {
    let pools = PoolManager::new(&config.database)
        .await
        .context("database connection failed")?;
    run_migrations(pools.write_pool())
        .await
        .context("migration failed")?;
    println!("Migrations applied");
    Ok(())
}

async fn enqueue_url(
    config: ApplicationConfig,
    url: String,
    priority: i32,
    contextual: bool,
) -> Result<()> {
    let pools = PoolManager::new(&config.database)
        .await
        .context("database connection failed")?;
    let jobs = PgJobStore::new(pools);

    let job = jobs
        .enqueue_job(
            JobType::UrlProcessing,
            serde_json::json!({
                "url": url,
                "options": { "enable_contextual_embeddings": contextual },
            }),
            priority,
            config.jobs.max_attempts,
        )
        .await
        .context("enqueue failed")?;

    println!("Enqueued job {}", job.job_id);
    Ok(())
}

async fn serve(config: ApplicationConfig) -> Result<()> {
    info!(
        database = %config.database.safe_connection_string(),
        qdrant = %config.vector_storage.url,
        workers = config.jobs.worker_pool_size,
        "Starting textloom"
    );

    // Storage layer
    let pools = PoolManager::new(&config.database)
        .await
        .context("database connection failed")?;
    if config.database.auto_migrate {
        run_migrations(pools.write_pool())
            .await
            .context("migration failed")?;
    }
    let sessions = Arc::new(PgSessionStore::new(pools.clone()));
    let chunks = Arc::new(PgChunkStore::new(pools.clone()));
    let jobs = Arc::new(PgJobStore::new(pools.clone()));
    let vectors = Arc::new(
        QdrantStorage::new(&config.vector_storage)
            .await
            .context("vector store unavailable")?,
    );

    // Providers and adapters
    let fetcher = Arc::new(ContentFetcher::new(&config.sources).context("fetcher init failed")?);
    let uploads = Arc::new(
        FsUploadStore::new(config.sources.upload_dir.clone().into())
            .context("upload store init failed")?,
    );
    let analyzer =
        Arc::new(OpenAiAnalyzer::new(config.provider.clone()).context("analyzer init failed")?);
    let embeddings_provider =
        Arc::new(OpenAiEmbeddings::new(config.provider.clone()).context("embedder init failed")?);
    let embedder = Arc::new(EmbeddingService::new(
        embeddings_provider,
        config.provider.batch_size,
    ));

    // Event stream + session lifecycle
    let events = EventBus::new(config.events.clone());
    let session_manager = Arc::new(SessionManager::new(
        Arc::clone(&sessions) as _,
        events.clone(),
        config.processing.progress_update_interval_ms,
    ));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        fetcher,
        uploads,
        analyzer,
        embedder,
        Arc::clone(&chunks) as _,
        Arc::clone(&vectors) as _,
        session_manager,
        events.clone(),
        config.processing.clone(),
    ));

    let pool = Arc::new(JobWorkerPool::new(
        Arc::clone(&jobs) as _,
        orchestrator,
        config.jobs.clone(),
    ));
    let cleanup = Arc::new(CleanupService::new(
        Arc::clone(&sessions) as _,
        Arc::clone(&chunks) as _,
        Arc::clone(&jobs) as _,
        Arc::clone(&vectors) as _,
        config.cleanup.clone(),
    ));

    let pool_shutdown = pool.shutdown_handle();
    let cleanup_shutdown = cleanup.shutdown_handle();

    let pool_task = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run().await })
    };
    let cleanup_task = {
        let cleanup = Arc::clone(&cleanup);
        tokio::spawn(async move { cleanup.run().await })
    };

    println!("textloom is running; press Ctrl-C to stop");
    wait_for_shutdown().await;
    info!("Shutdown signal received");

    pool_shutdown.store(true, Ordering::Relaxed);
    cleanup_shutdown.store(true, Ordering::Relaxed);
    events.shutdown();

    let _ = pool_task.await;
    let _ = cleanup_task.await;
    pools.close().await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
