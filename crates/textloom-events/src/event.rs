//! Event model and on-wire framing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Headers the HTTP layer sets when opening a stream
pub const STREAM_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("X-Accel-Buffering", "no"),
];

/// Kinds of events emitted over the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    ProcessingStarted,
    ChunkProcessed,
    EmbeddingCreated,
    AnalysisCompleted,
    ProgressUpdate,
    SessionUpdated,
    ProcessingCompleted,
    ErrorOccurred,
    Heartbeat,
}

impl EventType {
    /// Stable snake_case label used on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ProcessingStarted => "processing_started",
            Self::ChunkProcessed => "chunk_processed",
            Self::EmbeddingCreated => "embedding_created",
            Self::AnalysisCompleted => "analysis_completed",
            Self::ProgressUpdate => "progress_update",
            Self::SessionUpdated => "session_updated",
            Self::ProcessingCompleted => "processing_completed",
            Self::ErrorOccurred => "error_occurred",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress event; in-memory only, never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Session this event belongs to; `None` for global broadcasts
    pub session_id: Option<Uuid>,
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Global event (heartbeats, connection bookkeeping)
    pub fn global(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            session_id: None,
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Session-scoped event; the session id is injected into the payload
    pub fn for_session(session_id: Uuid, event_type: EventType, data: serde_json::Value) -> Self {
        let data = match data {
            serde_json::Value::Object(mut map) => {
                map.insert("session_id".to_string(), json!(session_id));
                serde_json::Value::Object(map)
            }
            other => json!({ "session_id": session_id, "payload": other }),
        };
        Self {
            session_id: Some(session_id),
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Line-delimited wire framing: `data: {json}\n\n`
    pub fn frame(&self) -> String {
        let body = json!({
            "event": self.event_type.as_str(),
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
        });
        format!("data: {body}\n\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let event = Event::global(EventType::Heartbeat, json!({"beat": 1}));
        let frame = event.frame();

        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));

        let body: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(body["event"], "heartbeat");
        assert_eq!(body["data"]["beat"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_session_event_injects_session_id() {
        let session_id = Uuid::new_v4();
        let event = Event::for_session(session_id, EventType::ChunkProcessed, json!({"chunk_index": 2}));
        assert_eq!(event.data["session_id"], json!(session_id));
        assert_eq!(event.data["chunk_index"], 2);
    }

    #[test]
    fn test_event_type_labels() {
        assert_eq!(EventType::ProcessingStarted.as_str(), "processing_started");
        assert_eq!(EventType::ProcessingCompleted.to_string(), "processing_completed");
    }
}
