//! Ingestion pipeline and session lifecycle
//!
//! The stateful core of the system: the per-job orchestrator
//! (extract -> chunk -> analyze -> embed -> store), the session manager
//! that owns per-upload state and heartbeats, the worker pool that claims
//! jobs from the durable queue, and the cleanup service that fails stuck
//! sessions and recovers orphaned chunks.

pub mod cleanup;
pub mod error;
pub mod orchestrator;
pub mod payload;
pub mod session;
pub mod worker;

pub use cleanup::{CleanupReport, CleanupService};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{JobRunOutcome, PipelineOrchestrator, SessionOutcome};
pub use payload::{JobInput, JobPayload, ProcessingOptions};
pub use session::SessionManager;
pub use worker::JobWorkerPool;
