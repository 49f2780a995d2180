//! PostgreSQL session store
//!
//! Session state transitions are guarded single-statement updates keyed on
//! `status = 'processing'`, which is what makes terminal states immutable
//! and serializes transitions per session row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseErrorExt, DatabaseResult};
use crate::models::{Session, SessionStatus};
use crate::pool::PoolManager;
use crate::traits::SessionStore;

/// Session store over separated connection pools
pub struct PgSessionStore {
    pools: PoolManager,
}

impl PgSessionStore {
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        url: row.get("url"),
        filename: row.get("filename"),
        status: row.get::<String, _>("status").into(),
        total_chunks: row.get("total_chunks"),
        completed_chunks: row.get("completed_chunks"),
        failed_chunks: row.get("failed_chunks"),
        last_heartbeat: row.get("last_heartbeat"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(
        &self,
        session_id: Uuid,
        url: &str,
        filename: Option<&str>,
    ) -> DatabaseResult<Session> {
        // Reusing a session id (reprocessing the same input) re-acquires
        // the row as a fresh attempt
        let row = sqlx::query(
            r"
            INSERT INTO sessions (session_id, url, filename, status, last_heartbeat)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (session_id) DO UPDATE SET
                url = EXCLUDED.url,
                filename = EXCLUDED.filename,
                status = 'processing',
                total_chunks = NULL,
                completed_chunks = 0,
                failed_chunks = 0,
                error_message = NULL,
                last_heartbeat = NOW(),
                updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(session_id)
        .bind(url)
        .bind(filename)
        .fetch_one(self.pools.write_pool())
        .await
        .map_db_err("create_session")?;

        debug!(session_id = %session_id, url, "Created session");
        Ok(session_from_row(&row))
    }

    async fn get_session(&self, session_id: &Uuid) -> DatabaseResult<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(self.pools.read_pool())
            .await
            .map_db_err("get_session")?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn heartbeat(&self, session_id: &Uuid) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE sessions
            SET last_heartbeat = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND status = 'processing'
            ",
        )
        .bind(session_id)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("heartbeat")?;

        Ok(())
    }

    async fn set_total_chunks(&self, session_id: &Uuid, total: i32) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE sessions
            SET total_chunks = $2, last_heartbeat = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND status = 'processing'
            ",
        )
        .bind(session_id)
        .bind(total)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("set_total_chunks")?;

        Ok(())
    }

    async fn update_progress(
        &self,
        session_id: &Uuid,
        completed_chunks: i32,
        failed_chunks: i32,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE sessions
            SET completed_chunks = $2,
                failed_chunks = $3,
                last_heartbeat = NOW(),
                updated_at = NOW()
            WHERE session_id = $1 AND status = 'processing'
            ",
        )
        .bind(session_id)
        .bind(completed_chunks)
        .bind(failed_chunks)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("update_progress")?;

        Ok(())
    }

    async fn record_error(&self, session_id: &Uuid, message: &str) -> DatabaseResult<()> {
        // Keeps the first fatal cause; later context is logged, not stored
        sqlx::query(
            r"
            UPDATE sessions
            SET error_message = COALESCE(error_message, $2), updated_at = NOW()
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .bind(message)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("record_error")?;

        Ok(())
    }

    async fn end_session(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE sessions
            SET status = $2,
                error_message = COALESCE($3, error_message),
                updated_at = NOW()
            WHERE session_id = $1 AND status = 'processing'
            ",
        )
        .bind(session_id)
        .bind(status.to_string())
        .bind(error_message)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("end_session")?;

        let transitioned = result.rows_affected() > 0;
        if transitioned {
            info!(session_id = %session_id, status = %status, "Session ended");
        }
        Ok(transitioned)
    }

    async fn list_active_sessions(&self) -> DatabaseResult<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE status = 'processing' ORDER BY created_at ASC",
        )
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err("list_active_sessions")?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn fail_stale_heartbeats(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>> {
        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err("fail_stale_heartbeats_begin")?;

        let rows = sqlx::query(
            r"
            UPDATE sessions
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE status = 'processing' AND last_heartbeat < $1
            RETURNING session_id
            ",
        )
        .bind(cutoff)
        .bind(reason)
        .fetch_all(&mut *tx)
        .await
        .map_db_err("fail_stale_heartbeats")?;

        tx.commit().await.map_db_err("fail_stale_heartbeats_commit")?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("session_id")).collect();
        if !ids.is_empty() {
            info!(count = ids.len(), reason, "Failed stale-heartbeat sessions");
        }
        Ok(ids)
    }

    async fn fail_expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> DatabaseResult<Vec<Uuid>> {
        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err("fail_expired_sessions_begin")?;

        let rows = sqlx::query(
            r"
            UPDATE sessions
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE status = 'processing' AND created_at < $1
            RETURNING session_id
            ",
        )
        .bind(cutoff)
        .bind(reason)
        .fetch_all(&mut *tx)
        .await
        .map_db_err("fail_expired_sessions")?;

        tx.commit().await.map_db_err("fail_expired_sessions_commit")?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("session_id")).collect();
        if !ids.is_empty() {
            info!(count = ids.len(), reason, "Failed expired sessions");
        }
        Ok(ids)
    }

    async fn session_pressure(&self) -> DatabaseResult<(i64, i64)> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) AS total
            FROM sessions
            ",
        )
        .fetch_one(self.pools.read_pool())
        .await
        .map_db_err("session_pressure")?;

        Ok((row.get("processing"), row.get("total")))
    }
}
