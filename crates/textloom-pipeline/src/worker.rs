//! Background worker pool for the job queue
//!
//! A fixed pool of workers polls the durable queue, claims jobs with the
//! store's SKIP LOCKED protocol, and drives the orchestrator. Completion
//! bookkeeping (retry backoff, terminal failure, cancellation) lives here.

use crate::error::PipelineError;
use crate::orchestrator::PipelineOrchestrator;
use dashmap::DashMap;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use textloom_config::JobConfig;
use textloom_meta_data::{DatabaseResult, Job, JobStore};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Retry backoff bounds: min(30s * 2^(k-1), 10min) with ±20% jitter
const RETRY_BASE_MS: u64 = 30_000;
const RETRY_CAP_MS: u64 = 600_000;

/// Worker pool claiming and dispatching queued jobs
pub struct JobWorkerPool {
    jobs: Arc<dyn JobStore>,
    orchestrator: Arc<PipelineOrchestrator>,
    config: JobConfig,
    shutdown_signal: Arc<AtomicBool>,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
}

impl JobWorkerPool {
    /// Create a pool; `run` starts it
    pub fn new(
        jobs: Arc<dyn JobStore>,
        orchestrator: Arc<PipelineOrchestrator>,
        config: JobConfig,
    ) -> Self {
        Self {
            jobs,
            orchestrator,
            config,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    /// Get a handle for graceful shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_signal)
    }

    /// Cancel a job wherever it is
    ///
    /// Queued/retrying jobs flip to `cancelled` in the store immediately;
    /// a processing job gets its cancel token fired and transitions when
    /// its orchestrator observes the signal.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel(&self, job_id: &Uuid) -> DatabaseResult<bool> {
        let queue_cancelled = self.jobs.cancel_job(job_id).await?;

        let signalled = self
            .cancellations
            .get(job_id)
            .map(|token| {
                token.cancel();
                true
            })
            .unwrap_or(false);

        if queue_cancelled || signalled {
            info!(job_id = %job_id, queue_cancelled, signalled, "Job cancellation requested");
        }
        Ok(queue_cancelled || signalled)
    }

    /// Main loop: spawns the worker tasks and waits for shutdown
    ///
    /// Runs until the shutdown signal is set; workers finish their current
    /// job before exiting.
    pub async fn run(self: Arc<Self>) {
        info!(workers = self.config.worker_pool_size, "Job worker pool started");

        let mut join_set = tokio::task::JoinSet::new();
        for worker_id in 0..self.config.worker_pool_size.max(1) {
            let pool = Arc::clone(&self);
            join_set.spawn(async move { pool.worker_loop(worker_id).await });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("Job worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Worker starting");

        loop {
            if self.shutdown_signal.load(Ordering::Relaxed) {
                debug!(worker_id, "Worker shutting down");
                break;
            }

            match self.jobs.claim_next_job().await {
                Ok(Some(job)) => {
                    self.process_job(&job).await;
                }
                Ok(None) => {
                    sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to claim job");
                    sleep(Duration::from_millis(
                        self.config.poll_interval_ms.saturating_mul(5),
                    ))
                    .await;
                }
            }
        }
    }

    /// Claim and run at most one job; for tests and manual draining
    ///
    /// Returns the processed job id, or `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Propagates claim failures; job execution failures are recorded on
    /// the job row, not returned.
    pub async fn process_one_job(&self) -> DatabaseResult<Option<Uuid>> {
        match self.jobs.claim_next_job().await? {
            Some(job) => {
                self.process_job(&job).await;
                Ok(Some(job.job_id))
            }
            None => Ok(None),
        }
    }

    async fn process_job(&self, job: &Job) {
        let token = CancellationToken::new();
        self.cancellations.insert(job.job_id, token.clone());

        let run = self.orchestrator.run_job(job, &token).await;
        self.cancellations.remove(&job.job_id);

        let bookkeeping = match run {
            Ok(outcome) if outcome.cancelled => {
                info!(job_id = %job.job_id, "Job observed cancel signal");
                self.jobs.mark_cancelled(&job.job_id).await
            }
            Ok(outcome) => self.jobs.complete_job(&job.job_id, outcome.result).await,
            Err(e) => self.handle_job_error(job, &e).await,
        };

        if let Err(e) = bookkeeping {
            error!(job_id = %job.job_id, error = %e, "Job bookkeeping failed");
        }
    }

    async fn handle_job_error(&self, job: &Job, error: &PipelineError) -> DatabaseResult<()> {
        let kind = error.kind();
        let message = format!("{}: {error}", kind.as_str());

        if kind.is_retryable() && job.attempts < job.max_attempts {
            let delay = retry_backoff(job.attempts.max(1) as u32);
            let retry_after = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
            info!(
                job_id = %job.job_id,
                attempts = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling job retry"
            );
            self.jobs
                .schedule_retry(&job.job_id, &message, retry_after)
                .await
        } else {
            let result = json!({
                "completed_chunks": 0,
                "failed_chunks": 0,
                "error_message": message,
            });
            self.jobs.fail_job(&job.job_id, &message, Some(result)).await
        }
    }
}

/// Backoff for attempt `k` (1-based): min(30s * 2^(k-1), 10min) ±20%
fn retry_backoff(attempt: u32) -> Duration {
    let exp = RETRY_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(RETRY_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_growth_and_cap() {
        let first = retry_backoff(1);
        assert!(first >= Duration::from_millis(24_000));
        assert!(first <= Duration::from_millis(36_000));

        let second = retry_backoff(2);
        assert!(second >= Duration::from_millis(48_000));
        assert!(second <= Duration::from_millis(72_000));

        for attempt in 1..=12 {
            assert!(retry_backoff(attempt) <= Duration::from_millis(720_000));
        }
    }
}
