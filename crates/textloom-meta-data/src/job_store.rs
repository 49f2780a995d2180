//! PostgreSQL job queue
//!
//! Claims use the `FOR UPDATE SKIP LOCKED` pattern so concurrent workers
//! never hold the same job; the claim, status flip, and attempt increment
//! are one statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseErrorExt, DatabaseResult};
use crate::models::{Job, JobStatus, JobType};
use crate::pool::PoolManager;
use crate::traits::JobStore;

/// Job queue over separated connection pools
pub struct PgJobStore {
    pools: PoolManager,
}

impl PgJobStore {
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }
}

fn job_from_row(row: &PgRow) -> Job {
    Job {
        job_id: row.get("job_id"),
        job_type: row.get::<String, _>("job_type").into(),
        status: row.get::<String, _>("status").into(),
        priority: row.get("priority"),
        payload: row.get("payload"),
        result: row.get("result"),
        error_message: row.get("error_message"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        retry_after: row.get("retry_after"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: i32,
    ) -> DatabaseResult<Job> {
        let row = sqlx::query(
            r"
            INSERT INTO jobs (job_id, job_type, status, priority, payload, max_attempts)
            VALUES ($1, $2, 'queued', $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(job_type.to_string())
        .bind(priority)
        .bind(payload)
        .bind(max_attempts)
        .fetch_one(self.pools.write_pool())
        .await
        .map_db_err("enqueue_job")?;

        let job = job_from_row(&row);
        info!(job_id = %job.job_id, job_type = %job.job_type, priority, "Enqueued job");
        Ok(job)
    }

    async fn claim_next_job(&self) -> DatabaseResult<Option<Job>> {
        let row = sqlx::query(
            r"
            WITH claimed AS (
                SELECT job_id FROM jobs
                WHERE status IN ('queued', 'retrying')
                  AND (retry_after IS NULL OR retry_after <= NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                started_at = NOW(),
                attempts = attempts + 1,
                updated_at = NOW()
            FROM claimed
            WHERE jobs.job_id = claimed.job_id
            RETURNING jobs.*
            ",
        )
        .fetch_optional(self.pools.write_pool())
        .await
        .map_db_err("claim_next_job")?;

        let job = row.as_ref().map(job_from_row);
        if let Some(ref job) = job {
            debug!(job_id = %job.job_id, attempts = job.attempts, "Claimed job");
        }
        Ok(job)
    }

    async fn complete_job(&self, job_id: &Uuid, result: serde_json::Value) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            ",
        )
        .bind(job_id)
        .bind(result)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("complete_job")?;

        info!(job_id = %job_id, "Job completed");
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: &Uuid,
        error_message: &str,
        result: Option<serde_json::Value>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                result = COALESCE($3, result),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1 AND status IN ('processing', 'queued', 'retrying')
            ",
        )
        .bind(job_id)
        .bind(error_message)
        .bind(result)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("fail_job")?;

        info!(job_id = %job_id, error = error_message, "Job failed");
        Ok(())
    }

    async fn schedule_retry(
        &self,
        job_id: &Uuid,
        error_message: &str,
        retry_after: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'retrying',
                error_message = $2,
                retry_after = $3,
                updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            ",
        )
        .bind(job_id)
        .bind(error_message)
        .bind(retry_after)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("schedule_retry")?;

        info!(job_id = %job_id, retry_after = %retry_after, "Job scheduled for retry");
        Ok(())
    }

    async fn cancel_job(&self, job_id: &Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE job_id = $1 AND status IN ('queued', 'retrying')
            ",
        )
        .bind(job_id)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("cancel_job")?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, job_id: &Uuid) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            ",
        )
        .bind(job_id)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("mark_cancelled")?;

        info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(self.pools.read_pool())
            .await
            .map_db_err("get_job")?;

        Ok(row.as_ref().map(job_from_row))
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> DatabaseResult<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r"
                    SELECT * FROM jobs
                    WHERE status = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    ",
                )
                .bind(status.to_string())
                .bind(limit)
                .fetch_all(self.pools.read_pool())
                .await
                .map_db_err("list_jobs")?
            }
            None => {
                sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(self.pools.read_pool())
                    .await
                    .map_db_err("list_jobs")?
            }
        };

        Ok(rows.iter().map(job_from_row).collect())
    }

    async fn recover_stale_jobs(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err("recover_stale_jobs_begin")?;

        // Jobs with attempt budget left go back to the queue; the rest fail
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = CASE
                    WHEN attempts >= max_attempts THEN 'failed'
                    ELSE 'retrying'
                END,
                error_message = COALESCE(error_message, 'worker lost'),
                completed_at = CASE
                    WHEN attempts >= max_attempts THEN NOW()
                    ELSE completed_at
                END,
                retry_after = NULL,
                updated_at = NOW()
            WHERE status = 'processing' AND started_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_db_err("recover_stale_jobs")?;

        tx.commit().await.map_db_err("recover_stale_jobs_commit")?;

        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "Recovered stale jobs");
        }
        Ok(result.rows_affected())
    }
}
