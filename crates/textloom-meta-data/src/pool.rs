//! Connection pool management with read/write separation
//!
//! Mutating stores get a smaller transactional pool; status queries and
//! cleanup scans share a larger read pool so scans cannot starve writers.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use textloom_config::DatabaseConfig;

/// Manages separate connection pools for different operation types
#[derive(Clone)]
pub struct PoolManager {
    /// Pool for write operations (sessions, chunks, job transitions)
    write_pool: PgPool,
    /// Pool for read operations (status queries, cleanup scans)
    read_pool: PgPool,
}

impl PoolManager {
    /// Create a new pool manager from database configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Database URL is malformed
    /// - Database server is unreachable or refuses connections
    /// - Connection timeout is exceeded for either pool
    pub async fn new(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let write_pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("write pool: {e}")))?;

        let read_pool = PgPoolOptions::new()
            .max_connections(config.max_connections.saturating_mul(2))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("read pool: {e}")))?;

        Ok(Self {
            write_pool,
            read_pool,
        })
    }

    /// Pool for mutations
    pub const fn write_pool(&self) -> &PgPool {
        &self.write_pool
    }

    /// Pool for queries and scans
    pub const fn read_pool(&self) -> &PgPool {
        &self.read_pool
    }

    /// Close all pools
    pub async fn close(&self) {
        self.write_pool.close().await;
        self.read_pool.close().await;
    }
}
