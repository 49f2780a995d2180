//! Error types for relational store operations

use textloom_common::ErrorKind;
use thiserror::Error;

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors from the relational store
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A query failed; `operation` names the logical operation for logs
    #[error("Database query failed during {operation}: {source}")]
    QueryFailed {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// Connection/pool level failure
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Migration runner failure
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Row payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Expected row was missing
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DatabaseError {
    /// Classify for the retry/propagation policy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::QueryFailed { .. } | Self::Connection(_) | Self::Migration(_) => {
                ErrorKind::RelationalStoreUnavailable
            }
            Self::Serialization(_) | Self::NotFound(_) => ErrorKind::Internal,
        }
    }
}

/// Extension to wrap sqlx errors with the logical operation name
pub trait DatabaseErrorExt<T> {
    /// Wrap an sqlx error, naming the logical operation
    fn map_db_err(self, operation: &str) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for Result<T, sqlx::Error> {
    fn map_db_err(self, operation: &str) -> DatabaseResult<T> {
        self.map_err(|source| DatabaseError::QueryFailed {
            operation: operation.to_string(),
            source,
        })
    }
}
