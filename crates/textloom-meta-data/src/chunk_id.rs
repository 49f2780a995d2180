//! Deterministic chunk ID generation

use uuid::{Uuid, uuid};

/// Namespace UUID for Textloom chunk IDs (randomly generated once)
/// This ensures our UUIDs don't collide with other systems
const TEXTLOOM_NAMESPACE: Uuid = uuid!("3e0c91b4-5a27-4d86-b1f0-8c2d94e7a651");

/// Generate a deterministic chunk ID from session and position
///
/// Re-running a session over the same input reproduces the same IDs, which
/// is what makes chunk upserts idempotent. The vector store point ID is
/// always this value.
///
/// Returns a UUID v5 which is deterministic based on the input
pub fn generate_chunk_id(session_id: &Uuid, chunk_index: i32) -> Uuid {
    let data = format!("{session_id}:{chunk_index}");
    Uuid::new_v5(&TEXTLOOM_NAMESPACE, data.as_bytes())
}
