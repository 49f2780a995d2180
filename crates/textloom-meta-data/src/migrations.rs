//! Database migration runner with advisory lock support

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row};
use tracing::info;

/// Advisory lock ID for migrations (arbitrary but stable)
const MIGRATION_LOCK_ID: i64 = 7319;

/// Ordered migration definitions
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (
        1,
        "create_sessions",
        r"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id UUID PRIMARY KEY,
            url TEXT NOT NULL,
            filename TEXT,
            status TEXT NOT NULL DEFAULT 'processing',
            total_chunks INTEGER,
            completed_chunks INTEGER NOT NULL DEFAULT 0,
            failed_chunks INTEGER NOT NULL DEFAULT 0,
            last_heartbeat TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_status_heartbeat
            ON sessions (status, last_heartbeat);
        CREATE INDEX IF NOT EXISTS idx_sessions_status_created
            ON sessions (status, created_at);
        ",
    ),
    (
        2,
        "create_chunks",
        r"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id UUID PRIMARY KEY,
            session_id UUID NOT NULL REFERENCES sessions (session_id),
            url TEXT NOT NULL,
            title TEXT,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            contextual_summary TEXT,
            document_summary TEXT,
            embedding_status TEXT NOT NULL DEFAULT 'pending',
            processing_status TEXT NOT NULL DEFAULT 'processing',
            sentiment TEXT,
            category TEXT,
            content_type TEXT,
            technical_level TEXT,
            main_topics JSONB NOT NULL DEFAULT '[]'::jsonb,
            key_concepts TEXT,
            emotions JSONB NOT NULL DEFAULT '[]'::jsonb,
            tags TEXT,
            key_entities JSONB NOT NULL DEFAULT '{}'::jsonb,
            uses_contextual_embedding BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (session_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_url ON chunks (url);
        CREATE INDEX IF NOT EXISTS idx_chunks_embedding_status
            ON chunks (embedding_status);
        ",
    ),
    (
        3,
        "create_jobs",
        r"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id UUID PRIMARY KEY,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            priority INTEGER NOT NULL DEFAULT 0,
            payload JSONB NOT NULL,
            result JSONB,
            error_message TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            retry_after TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_claim
            ON jobs (status, priority DESC, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_jobs_retry_after ON jobs (retry_after);
        ",
    ),
];

/// Run all pending migrations with advisory locking
///
/// # Errors
///
/// Returns `DatabaseError::Migration` if a migration statement fails or
/// the lock cannot be acquired.
pub async fn run_migrations(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("acquire lock: {e}")))?;

    // Ensure lock is released even on error
    let result = run_migrations_inner(pool).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("release lock: {e}")))?;

    result
}

async fn run_migrations_inner(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::Migration(format!("create migrations table: {e}")))?;

    let applied: Vec<i32> = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("fetch applied: {e}")))?
        .iter()
        .map(|row| row.get(0))
        .collect();

    for &(version, name, sql) in MIGRATIONS {
        if applied.contains(&version) {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Migration(format!("begin {name}: {e}")))?;

        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Migration(format!("apply {name}: {e}")))?;

        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Migration(format!("record {name}: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Migration(format!("commit {name}: {e}")))?;

        info!(version, name, "Applied migration");
    }

    Ok(())
}
