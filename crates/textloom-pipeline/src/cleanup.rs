//! Cleanup service
//!
//! Three periodic scans run against the authoritative store: a fast
//! heartbeat scan for stuck sessions, a slower timeout scan for sessions
//! that outlived their budget, and an orphan scan reconciling chunk rows
//! whose session disappeared. Jobs abandoned by dead workers are recovered
//! on the slow cadence too. Scan failures never propagate; the next tick
//! retries.

use crate::error::{PipelineError, PipelineResult};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use textloom_config::CleanupConfig;
use textloom_meta_data::{ChunkStore, EmbeddingStatus, JobStore, SessionStore};
use textloom_vector_data::VectorStorage;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pressure guard: abort non-forced runs when more than half of a
/// non-trivial session table is still processing
const PRESSURE_MIN_ROWS: i64 = 100;

/// Orphans examined per scan
const ORPHAN_SCAN_LIMIT: i64 = 500;

/// What one cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub stale_heartbeats_failed: usize,
    pub expired_sessions_failed: usize,
    pub orphans_completed: usize,
    pub orphans_failed: usize,
    pub stale_jobs_recovered: u64,
}

impl CleanupReport {
    /// Total sessions moved to a terminal state by this pass
    pub const fn sessions_cleaned(&self) -> usize {
        self.stale_heartbeats_failed + self.expired_sessions_failed
    }
}

/// Periodic and on-demand cleanup over sessions, chunks, and jobs
pub struct CleanupService {
    sessions: Arc<dyn SessionStore>,
    chunks: Arc<dyn ChunkStore>,
    jobs: Arc<dyn JobStore>,
    vectors: Arc<dyn VectorStorage>,
    config: CleanupConfig,
    shutdown_signal: Arc<AtomicBool>,
}

impl CleanupService {
    /// Wire up the service; `run` starts the periodic scans
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: Arc<dyn ChunkStore>,
        jobs: Arc<dyn JobStore>,
        vectors: Arc<dyn VectorStorage>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            sessions,
            chunks,
            jobs,
            vectors,
            config,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle for graceful shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_signal)
    }

    /// Run the emergency and main scan loops until shutdown
    pub async fn run(self: Arc<Self>) {
        info!(
            emergency_interval_ms = self.config.emergency_interval_ms,
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            "Cleanup service started"
        );

        let mut join_set = tokio::task::JoinSet::new();

        let emergency = Arc::clone(&self);
        join_set.spawn(async move {
            let interval = Duration::from_millis(emergency.config.emergency_interval_ms.max(1));
            loop {
                sleep(interval).await;
                if emergency.shutdown_signal.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = emergency.heartbeat_scan(false).await {
                    log_scan_error("heartbeat", &e);
                }
            }
        });

        let main = Arc::clone(&self);
        join_set.spawn(async move {
            let interval = Duration::from_millis(main.config.cleanup_interval_ms.max(1));
            loop {
                sleep(interval).await;
                if main.shutdown_signal.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = main.timeout_scan(false).await {
                    log_scan_error("timeout", &e);
                }
                if let Err(e) = main.orphan_scan().await {
                    log_scan_error("orphan", &e);
                }
                if let Err(e) = main.stale_job_scan().await {
                    log_scan_error("stale-job", &e);
                }
            }
        });

        while join_set.join_next().await.is_some() {}
        info!("Cleanup service stopped");
    }

    /// One full pass of every scan, for on-demand cleanup
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::UnsafeCleanup` when the pressure guard
    /// trips and `force` is off; store failures propagate.
    pub async fn run_once(&self, force: bool) -> PipelineResult<CleanupReport> {
        let stale = self.heartbeat_scan(force).await?;
        let expired = self.timeout_scan(force).await?;
        let (orphans_completed, orphans_failed) = self.orphan_scan().await?;
        let stale_jobs = self.stale_job_scan().await?;

        Ok(CleanupReport {
            stale_heartbeats_failed: stale.len(),
            expired_sessions_failed: expired.len(),
            orphans_completed,
            orphans_failed,
            stale_jobs_recovered: stale_jobs,
        })
    }

    /// Fail sessions whose heartbeat went silent
    ///
    /// # Errors
    ///
    /// Pressure guard and store failures.
    pub async fn heartbeat_scan(&self, force: bool) -> PipelineResult<Vec<Uuid>> {
        self.guard_pressure(force).await?;

        let cutoff =
            Utc::now() - ChronoDuration::milliseconds(self.config.heartbeat_timeout_ms as i64);
        let failed = self
            .sessions
            .fail_stale_heartbeats(cutoff, "heartbeat timeout")
            .await?;

        if failed.is_empty() {
            debug!("Heartbeat scan found nothing");
        } else {
            warn!(count = failed.len(), "Heartbeat scan failed stuck sessions");
        }
        Ok(failed)
    }

    /// Fail sessions that outlived the session timeout
    ///
    /// # Errors
    ///
    /// Pressure guard and store failures.
    pub async fn timeout_scan(&self, force: bool) -> PipelineResult<Vec<Uuid>> {
        self.guard_pressure(force).await?;

        let cutoff =
            Utc::now() - ChronoDuration::milliseconds(self.config.session_timeout_ms as i64);
        let failed = self
            .sessions
            .fail_expired_sessions(cutoff, "session timeout exceeded")
            .await?;

        if !failed.is_empty() {
            warn!(count = failed.len(), "Timeout scan failed expired sessions");
        }
        Ok(failed)
    }

    /// Reconcile chunk rows whose session row no longer exists
    ///
    /// Orphans with a vector present are marked `complete`; the rest are
    /// marked `failed`. Returns `(completed, failed)` counts.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn orphan_scan(&self) -> PipelineResult<(usize, usize)> {
        let orphans = self.chunks.find_orphaned_chunks(ORPHAN_SCAN_LIMIT).await?;
        if orphans.is_empty() {
            return Ok((0, 0));
        }

        let mut with_vector = Vec::new();
        let mut without_vector = Vec::new();
        for chunk_id in orphans {
            match self.vectors.has_vector(&chunk_id).await {
                Ok(true) => with_vector.push(chunk_id),
                Ok(false) => without_vector.push(chunk_id),
                Err(e) => {
                    // Undecidable without the vector store; leave for the
                    // next scan
                    warn!(chunk_id = %chunk_id, error = %e, "Orphan check skipped");
                }
            }
        }

        self.chunks
            .mark_orphaned_chunks(&with_vector, EmbeddingStatus::Complete)
            .await?;
        self.chunks
            .mark_orphaned_chunks(&without_vector, EmbeddingStatus::Failed)
            .await?;

        info!(
            completed = with_vector.len(),
            failed = without_vector.len(),
            "Orphan scan reconciled chunks"
        );
        Ok((with_vector.len(), without_vector.len()))
    }

    /// Requeue or fail jobs held by workers that died
    ///
    /// The cutoff is the session timeout plus one scan interval: past
    /// that, no live worker can still be running the job.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn stale_job_scan(&self) -> PipelineResult<u64> {
        let window = self
            .config
            .session_timeout_ms
            .saturating_add(self.config.cleanup_interval_ms);
        let cutoff = Utc::now() - ChronoDuration::milliseconds(window as i64);
        Ok(self.jobs.recover_stale_jobs(cutoff).await?)
    }

    /// Abort non-forced runs while most of a busy table is mid-flight
    async fn guard_pressure(&self, force: bool) -> PipelineResult<()> {
        if force {
            return Ok(());
        }
        let (processing, total) = self.sessions.session_pressure().await?;
        if total > PRESSURE_MIN_ROWS && processing.saturating_mul(2) > total {
            return Err(PipelineError::UnsafeCleanup(format!(
                "{processing} of {total} sessions are processing"
            )));
        }
        Ok(())
    }
}

fn log_scan_error(scan: &str, error: &PipelineError) {
    // Scan failures are logged, never propagated; the next tick retries
    if matches!(error, PipelineError::UnsafeCleanup(_)) {
        warn!(scan, error = %error, "Cleanup scan skipped");
    } else {
        error!(scan, error = %error, "Cleanup scan failed");
    }
}
