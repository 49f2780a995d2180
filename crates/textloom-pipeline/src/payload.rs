//! Job payload parsing
//!
//! Payloads are opaque JSON at the queue layer; this module gives them
//! shape. Option values are clamped rather than rejected so a sloppy
//! client still gets a sane pipeline.

use crate::error::{PipelineError, PipelineResult};
use serde::Deserialize;
use textloom_chunking::ChunkOptions;
use textloom_config::ProcessingConfig;
use textloom_meta_data::{Job, JobType};
use uuid::Uuid;

/// What the job operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    /// Fetch and process one URL
    Url(String),
    /// Process previously uploaded bytes
    Upload { upload_ref: String },
    /// Process several URLs under one job, one session each
    Batch { urls: Vec<String> },
}

/// Recognized processing options, resolved against config defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub enable_contextual_embeddings: bool,
    pub generate_summary: bool,
    /// Client-provided session id, if any
    pub session_id: Option<Uuid>,
}

impl ProcessingOptions {
    /// Chunker options (already clamped)
    pub const fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}

/// Parsed job payload
#[derive(Debug, Clone)]
pub struct JobPayload {
    pub input: JobInput,
    pub options: ProcessingOptions,
}

#[derive(Debug, Default, Deserialize)]
struct RawOptions {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    enable_contextual_embeddings: Option<bool>,
    generate_summary: Option<bool>,
    session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    url: Option<String>,
    upload_ref: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    options: RawOptions,
}

impl JobPayload {
    /// Parse a job row's payload, resolving options against defaults
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Payload` when the payload is malformed or
    /// names no input for its job type.
    pub fn parse(job: &Job, defaults: &ProcessingConfig) -> PipelineResult<Self> {
        let raw: RawPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| PipelineError::Payload(format!("malformed payload: {e}")))?;

        let input = match job.job_type {
            JobType::BatchProcessing => {
                if raw.urls.is_empty() {
                    return Err(PipelineError::Payload(
                        "batch_processing payload needs a non-empty urls array".to_string(),
                    ));
                }
                JobInput::Batch { urls: raw.urls }
            }
            JobType::FileProcessing => match raw.upload_ref {
                Some(upload_ref) => JobInput::Upload { upload_ref },
                None => {
                    return Err(PipelineError::Payload(
                        "file_processing payload needs upload_ref".to_string(),
                    ));
                }
            },
            JobType::UrlProcessing | JobType::Reprocessing => match raw.url {
                Some(url) => JobInput::Url(url),
                None => {
                    return Err(PipelineError::Payload(format!(
                        "{} payload needs url",
                        job.job_type
                    )));
                }
            },
        };

        let clamped = ChunkOptions {
            size: raw.options.chunk_size.unwrap_or(defaults.chunk_size),
            overlap: raw.options.chunk_overlap.unwrap_or(defaults.chunk_overlap),
        }
        .clamped();

        Ok(Self {
            input,
            options: ProcessingOptions {
                chunk_size: clamped.size,
                chunk_overlap: clamped.overlap,
                enable_contextual_embeddings: raw
                    .options
                    .enable_contextual_embeddings
                    .unwrap_or(defaults.enable_contextual_embeddings),
                generate_summary: raw.options.generate_summary.unwrap_or(false),
                session_id: raw.options.session_id,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use textloom_meta_data::JobStatus;

    fn defaults() -> ProcessingConfig {
        ProcessingConfig {
            chunk_size: 1200,
            chunk_overlap: 200,
            max_concurrent_operations: 5,
            enable_contextual_embeddings: false,
            progress_update_interval_ms: 5_000,
        }
    }

    fn job(job_type: JobType, payload: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            job_id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Queued,
            priority: 0,
            payload,
            result: None,
            error_message: None,
            attempts: 0,
            max_attempts: 3,
            retry_after: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_url_payload_with_options() {
        let job = job(
            JobType::UrlProcessing,
            json!({
                "url": "http://example/a",
                "options": {
                    "chunk_size": 1000,
                    "chunk_overlap": 200,
                    "enable_contextual_embeddings": true
                }
            }),
        );
        let payload = JobPayload::parse(&job, &defaults()).unwrap();

        assert_eq!(payload.input, JobInput::Url("http://example/a".to_string()));
        assert_eq!(payload.options.chunk_size, 1000);
        assert!(payload.options.enable_contextual_embeddings);
        assert!(!payload.options.generate_summary);
    }

    #[test]
    fn test_options_are_clamped() {
        let job = job(
            JobType::UrlProcessing,
            json!({
                "url": "http://example/a",
                "options": { "chunk_size": 50, "chunk_overlap": 4000 }
            }),
        );
        let payload = JobPayload::parse(&job, &defaults()).unwrap();

        assert_eq!(payload.options.chunk_size, 100);
        assert_eq!(payload.options.chunk_overlap, 100);
    }

    #[test]
    fn test_file_payload_requires_upload_ref() {
        let missing = job(JobType::FileProcessing, json!({"url": "http://x"}));
        assert!(JobPayload::parse(&missing, &defaults()).is_err());

        let ok = job(JobType::FileProcessing, json!({"upload_ref": "abc123"}));
        let payload = JobPayload::parse(&ok, &defaults()).unwrap();
        assert_eq!(
            payload.input,
            JobInput::Upload {
                upload_ref: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_batch_payload() {
        let empty = job(JobType::BatchProcessing, json!({"urls": []}));
        assert!(JobPayload::parse(&empty, &defaults()).is_err());

        let ok = job(
            JobType::BatchProcessing,
            json!({"urls": ["http://a", "http://b"]}),
        );
        let payload = JobPayload::parse(&ok, &defaults()).unwrap();
        assert!(
            matches!(payload.input, JobInput::Batch { ref urls } if urls.len() == 2)
        );
    }

    #[test]
    fn test_client_session_id_passes_through() {
        let session_id = Uuid::new_v4();
        let job = job(
            JobType::Reprocessing,
            json!({"url": "http://a", "options": {"session_id": session_id}}),
        );
        let payload = JobPayload::parse(&job, &defaults()).unwrap();
        assert_eq!(payload.options.session_id, Some(session_id));
    }
}
