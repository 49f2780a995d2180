//! Domain models for database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an ingestion session
///
/// `processing` is the only non-terminal state; every transition out of it
/// is final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl SessionStatus {
    /// Whether this state is immutable
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid session status: {s}")),
        }
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::Processing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{status}")
    }
}

/// One ingestion attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub url: String,
    pub filename: Option<String>,
    pub status: SessionStatus,
    pub total_chunks: Option<i32>,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a chunk stands in the embed-and-store sequence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Complete,
    Failed,
    Skipped,
}

impl std::str::FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid embedding status: {s}")),
        }
    }
}

impl From<String> for EmbeddingStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::Pending)
    }
}

impl std::fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{status}")
    }
}

/// Named entities stored on a chunk row
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkEntities {
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

/// The atomic unit of the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: Uuid,
    pub session_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub contextual_summary: Option<String>,
    /// Whole-document summary; set on chunk 0 only
    pub document_summary: Option<String>,
    pub embedding_status: EmbeddingStatus,
    pub processing_status: SessionStatus,

    // Analysis fields
    pub sentiment: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub technical_level: Option<String>,
    pub main_topics: Vec<String>,
    pub key_concepts: Option<String>,
    pub emotions: Vec<String>,
    pub tags: Option<String>,
    pub key_entities: ChunkEntities,

    pub uses_contextual_embedding: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What kind of work a job carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    UrlProcessing,
    FileProcessing,
    BatchProcessing,
    Reprocessing,
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url_processing" => Ok(Self::UrlProcessing),
            "file_processing" => Ok(Self::FileProcessing),
            "batch_processing" => Ok(Self::BatchProcessing),
            "reprocessing" => Ok(Self::Reprocessing),
            _ => Err(format!("Invalid job type: {s}")),
        }
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::UrlProcessing)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::UrlProcessing => "url_processing",
            Self::FileProcessing => "file_processing",
            Self::BatchProcessing => "batch_processing",
            Self::Reprocessing => "reprocessing",
        };
        write!(f, "{kind}")
    }
}

/// Status of a queued job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    /// Whether this state is final (sets `completed_at`)
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "retrying" => Ok(Self::Retrying),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::Queued)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        };
        write!(f, "{status}")
    }
}

/// Durable queued unit of work; owns exactly one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_terminality() {
        assert!(!SessionStatus::Processing.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_job_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ["processing", "completed", "failed", "cancelled", "timeout"] {
            let parsed: SessionStatus = status.parse().unwrap_or(SessionStatus::Processing);
            assert_eq!(parsed.to_string(), status);
        }
        for status in [
            "queued",
            "processing",
            "completed",
            "failed",
            "cancelled",
            "retrying",
        ] {
            let parsed: JobStatus = status.parse().unwrap_or(JobStatus::Queued);
            assert_eq!(parsed.to_string(), status);
        }
    }
}
