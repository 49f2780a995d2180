//! Session manager
//!
//! Single owner of session-row mutations during a run. Progress writes are
//! throttled: redundant updates inside the configured window are coalesced
//! unless forced. The underlying store serializes transitions per session
//! row, and terminal states are immutable there.

use crate::error::PipelineResult;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use textloom_events::{BroadcastFilter, Event, EventBus, EventType};
use textloom_meta_data::{Session, SessionStatus, SessionStore};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq)]
struct ProgressMark {
    at: Instant,
    completed_chunks: i32,
    failed_chunks: i32,
}

/// Owns the Session entity for the pipeline
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    events: EventBus,
    throttle: DashMap<Uuid, ProgressMark>,
    interval: Duration,
}

impl SessionManager {
    /// Create a manager over a session store
    pub fn new(store: Arc<dyn SessionStore>, events: EventBus, interval_ms: u64) -> Self {
        Self {
            store,
            events,
            throttle: DashMap::new(),
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Create a session row in `processing` with a fresh heartbeat
    ///
    /// # Errors
    ///
    /// Propagates store failures (including duplicate client-provided ids).
    pub async fn start(
        &self,
        url: &str,
        filename: Option<&str>,
        session_id: Option<Uuid>,
    ) -> PipelineResult<Session> {
        let id = session_id.unwrap_or_else(Uuid::new_v4);
        let session = self.store.create_session(id, url, filename).await?;
        Ok(session)
    }

    /// Refresh `last_heartbeat` only
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn heartbeat(&self, session_id: &Uuid) -> PipelineResult<()> {
        self.store.heartbeat(session_id).await?;
        Ok(())
    }

    /// Persist the chunk total once chunking is done
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn set_total_chunks(&self, session_id: &Uuid, total: i32) -> PipelineResult<()> {
        self.store.set_total_chunks(session_id, total).await?;
        self.events.broadcast(
            &Event::for_session(
                *session_id,
                EventType::SessionUpdated,
                json!({ "total_chunks": total }),
            ),
            &BroadcastFilter::default(),
        );
        Ok(())
    }

    /// Write progress counters and emit `progress_update`
    ///
    /// Redundant updates (same counters) within the throttle window are
    /// coalesced unless `force` is set. Returns whether an event was
    /// emitted.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn update_progress(
        &self,
        session_id: &Uuid,
        completed_chunks: i32,
        failed_chunks: i32,
        stage: &str,
        force: bool,
    ) -> PipelineResult<bool> {
        if !force {
            if let Some(mark) = self.throttle.get(session_id) {
                let unchanged = mark.completed_chunks == completed_chunks
                    && mark.failed_chunks == failed_chunks;
                if unchanged && mark.at.elapsed() < self.interval {
                    debug!(session_id = %session_id, "Coalesced redundant progress update");
                    return Ok(false);
                }
            }
        }

        self.store
            .update_progress(session_id, completed_chunks, failed_chunks)
            .await?;
        self.throttle.insert(
            *session_id,
            ProgressMark {
                at: Instant::now(),
                completed_chunks,
                failed_chunks,
            },
        );

        self.events.broadcast(
            &Event::for_session(
                *session_id,
                EventType::ProgressUpdate,
                json!({
                    "completed_chunks": completed_chunks,
                    "failed_chunks": failed_chunks,
                    "stage": stage,
                }),
            ),
            &BroadcastFilter::default(),
        );
        Ok(true)
    }

    /// Record error context without deciding the session's fate
    ///
    /// Only the orchestrator's terminal decision (or the cleanup service)
    /// moves a session to `failed`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn record_error(&self, session_id: &Uuid, message: &str) -> PipelineResult<()> {
        self.store.record_error(session_id, message).await?;
        Ok(())
    }

    /// Transition to a terminal state; no-op when already terminal
    ///
    /// Returns whether this call performed the transition.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn end(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<bool> {
        let transitioned = self
            .store
            .end_session(session_id, status, error_message)
            .await?;
        self.throttle.remove(session_id);

        if transitioned {
            self.events.broadcast(
                &Event::for_session(
                    *session_id,
                    EventType::SessionUpdated,
                    json!({ "status": status.to_string() }),
                ),
                &BroadcastFilter::default(),
            );
        }
        Ok(transitioned)
    }

    /// Fetch the current session row
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get(&self, session_id: &Uuid) -> PipelineResult<Option<Session>> {
        Ok(self.store.get_session(session_id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use textloom_config::EventsConfig;
    use textloom_meta_data::MockMetaStore;

    fn manager(interval_ms: u64) -> (SessionManager, EventBus, Arc<MockMetaStore>) {
        let store = Arc::new(MockMetaStore::new());
        let events = EventBus::new(EventsConfig {
            keep_alive_interval_ms: 60_000,
            client_buffer: 64,
        });
        let manager = SessionManager::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            events.clone(),
            interval_ms,
        );
        (manager, events, store)
    }

    fn count_progress_events(receiver: &mut tokio::sync::mpsc::Receiver<String>) -> usize {
        let mut count = 0;
        while let Ok(frame) = receiver.try_recv() {
            if frame.contains("\"event\":\"progress_update\"") {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_identical_progress_coalesced_within_window() {
        let (manager, events, _) = manager(60_000);
        let mut sub = events.subscribe();
        let session = manager.start("http://a", None, None).await.unwrap();

        let first = manager
            .update_progress(&session.session_id, 1, 0, "processing", false)
            .await
            .unwrap();
        let second = manager
            .update_progress(&session.session_id, 1, 0, "processing", false)
            .await
            .unwrap();
        assert!(first);
        assert!(!second, "identical update inside window must coalesce");

        // Drain the connected frame then count progress frames
        let _ = sub.receiver.recv().await;
        assert_eq!(count_progress_events(&mut sub.receiver), 1);
    }

    #[tokio::test]
    async fn test_changed_progress_not_coalesced() {
        let (manager, _, _) = manager(60_000);
        let session = manager.start("http://a", None, None).await.unwrap();

        assert!(manager
            .update_progress(&session.session_id, 1, 0, "processing", false)
            .await
            .unwrap());
        assert!(manager
            .update_progress(&session.session_id, 2, 0, "processing", false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_force_bypasses_throttle() {
        let (manager, _, _) = manager(60_000);
        let session = manager.start("http://a", None, None).await.unwrap();

        assert!(manager
            .update_progress(&session.session_id, 1, 0, "processing", false)
            .await
            .unwrap());
        assert!(manager
            .update_progress(&session.session_id, 1, 0, "processing", true)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_end_twice_is_noop() {
        let (manager, _, store) = manager(1_000);
        let session = manager.start("http://a", None, None).await.unwrap();

        assert!(manager
            .end(&session.session_id, SessionStatus::Completed, None)
            .await
            .unwrap());
        assert!(!manager
            .end(&session.session_id, SessionStatus::Failed, Some("late"))
            .await
            .unwrap());

        let row = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_client_session_id_used() {
        let (manager, _, _) = manager(1_000);
        let wanted = Uuid::new_v4();
        let session = manager.start("http://a", None, Some(wanted)).await.unwrap();
        assert_eq!(session.session_id, wanted);
    }
}
