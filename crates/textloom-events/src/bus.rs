//! Client registry and delivery
//!
//! The bus owns its registry behind a single mutex; broadcasts hold the
//! lock only long enough to snapshot the recipient list. The keep-alive
//! timer is owned here too: started when the first client subscribes,
//! stopped when the last one leaves.

use crate::event::{Event, EventType};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use textloom_config::EventsConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Handle returned to a subscriber; the HTTP layer drains `receiver` into
/// the socket
pub struct Subscription {
    pub client_id: String,
    pub receiver: mpsc::Receiver<String>,
}

/// Recipient selection for broadcasts
#[derive(Debug, Clone, Default)]
pub struct BroadcastFilter {
    /// Skip these client ids
    pub exclude: Vec<String>,
    /// If non-empty, send only to these client ids
    pub include_only: Vec<String>,
}

impl BroadcastFilter {
    fn accepts(&self, client_id: &str) -> bool {
        if self.exclude.iter().any(|c| c == client_id) {
            return false;
        }
        self.include_only.is_empty() || self.include_only.iter().any(|c| c == client_id)
    }
}

struct ClientHandle {
    sender: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    message_count: u64,
}

struct BusInner {
    clients: Mutex<HashMap<String, ClientHandle>>,
    keep_alive: Mutex<Option<tokio::task::JoinHandle<()>>>,
    config: EventsConfig,
}

/// Multiplexes progress events to connected clients
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with no clients
    pub fn new(config: EventsConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                clients: Mutex::new(HashMap::new()),
                keep_alive: Mutex::new(None),
                config,
            }),
        }
    }

    #[allow(clippy::unwrap_used)]
    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientHandle>> {
        self.inner.clients.lock().unwrap()
    }

    /// Register a client and emit the synthetic `connected` event as its
    /// first frame
    ///
    /// Must be called from within a tokio runtime (the keep-alive task is
    /// spawned when the first client arrives).
    pub fn subscribe(&self) -> Subscription {
        let client_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.inner.config.client_buffer.max(1));

        let connected = Event::global(
            EventType::Connected,
            json!({
                "client_id": client_id,
                "server_time": Utc::now().to_rfc3339(),
            }),
        );
        // The channel is fresh, so this send cannot fail
        let _ = sender.try_send(connected.frame());

        let start_keep_alive = {
            let mut clients = self.clients();
            let was_empty = clients.is_empty();
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    sender,
                    connected_at: Utc::now(),
                    last_activity: Utc::now(),
                    message_count: 1,
                },
            );
            was_empty
        };

        if start_keep_alive {
            self.start_keep_alive();
        }

        info!(client_id = %client_id, "Stream client connected");
        Subscription {
            client_id,
            receiver,
        }
    }

    /// Unicast one event
    ///
    /// Returns `false` when the client is unknown or was dropped because it
    /// could not take the frame.
    pub fn send_to_client(&self, client_id: &str, event: &Event) -> bool {
        let frame = event.frame();
        let delivered = {
            let mut clients = self.clients();
            match clients.get_mut(client_id) {
                Some(handle) => match handle.sender.try_send(frame) {
                    Ok(()) => {
                        handle.message_count = handle.message_count.saturating_add(1);
                        handle.last_activity = Utc::now();
                        true
                    }
                    Err(_) => {
                        clients.remove(client_id);
                        false
                    }
                },
                None => false,
            }
        };

        if !delivered {
            debug!(client_id, "Dropped stream client on failed send");
            self.stop_keep_alive_if_empty();
        }
        delivered
    }

    /// Multicast one event to all matching clients
    ///
    /// Returns the number of clients the frame was delivered to. Clients
    /// that cannot take the frame are removed; there is no retry.
    pub fn broadcast(&self, event: &Event, filter: &BroadcastFilter) -> usize {
        let frame = event.frame();

        // Snapshot recipients; do not hold the lock across sends
        let recipients: Vec<(String, mpsc::Sender<String>)> = {
            let clients = self.clients();
            clients
                .iter()
                .filter(|(id, _)| filter.accepts(id))
                .map(|(id, handle)| (id.clone(), handle.sender.clone()))
                .collect()
        };

        let mut delivered = Vec::new();
        let mut dropped = Vec::new();
        for (client_id, sender) in recipients {
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered.push(client_id),
                Err(_) => dropped.push(client_id),
            }
        }

        {
            let mut clients = self.clients();
            for client_id in &delivered {
                if let Some(handle) = clients.get_mut(client_id) {
                    handle.message_count = handle.message_count.saturating_add(1);
                    handle.last_activity = Utc::now();
                }
            }
            for client_id in &dropped {
                clients.remove(client_id);
            }
        }

        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropped stream clients on broadcast");
            self.stop_keep_alive_if_empty();
        }
        delivered.len()
    }

    /// Explicitly disconnect a client
    pub fn close(&self, client_id: &str) {
        let removed = self.clients().remove(client_id).is_some();
        if removed {
            info!(client_id, "Stream client closed");
            self.stop_keep_alive_if_empty();
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Messages delivered to a client so far
    pub fn client_message_count(&self, client_id: &str) -> Option<u64> {
        self.clients().get(client_id).map(|h| h.message_count)
    }

    /// How long a client has been connected
    pub fn client_connected_at(&self, client_id: &str) -> Option<DateTime<Utc>> {
        self.clients().get(client_id).map(|h| h.connected_at)
    }

    /// Stop timers and drop every client
    pub fn shutdown(&self) {
        self.clients().clear();
        self.stop_keep_alive_if_empty();
    }

    fn start_keep_alive(&self) {
        let bus = self.clone();
        let interval = Duration::from_millis(self.inner.config.keep_alive_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if bus.client_count() == 0 {
                    break;
                }
                let heartbeat = Event::global(
                    EventType::Heartbeat,
                    json!({ "server_time": Utc::now().to_rfc3339() }),
                );
                bus.broadcast(&heartbeat, &BroadcastFilter::default());
            }
        });

        #[allow(clippy::unwrap_used)]
        let mut slot = self.inner.keep_alive.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
        debug!("Keep-alive timer started");
    }

    fn stop_keep_alive_if_empty(&self) {
        if self.client_count() > 0 {
            return;
        }
        #[allow(clippy::unwrap_used)]
        let handle = self.inner.keep_alive.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Keep-alive timer stopped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_bus(buffer: usize) -> EventBus {
        EventBus::new(EventsConfig {
            keep_alive_interval_ms: 50,
            client_buffer: buffer,
        })
    }

    fn parse_frame(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_emits_connected_first() {
        let bus = test_bus(8);
        let mut sub = bus.subscribe();

        let frame = sub.receiver.recv().await.unwrap();
        let body = parse_frame(&frame);
        assert_eq!(body["event"], "connected");
        assert_eq!(body["data"]["client_id"], sub.client_id);
    }

    #[tokio::test]
    async fn test_broadcast_respects_filters() {
        let bus = test_bus(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        // Drain connected frames
        a.receiver.recv().await.unwrap();
        b.receiver.recv().await.unwrap();

        let event = Event::global(EventType::ProgressUpdate, json!({"n": 1}));
        let delivered = bus.broadcast(
            &event,
            &BroadcastFilter {
                exclude: vec![a.client_id.clone()],
                include_only: Vec::new(),
            },
        );
        assert_eq!(delivered, 1);

        let frame = b.receiver.recv().await.unwrap();
        assert_eq!(parse_frame(&frame)["event"], "progress_update");
        assert!(a.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped() {
        let bus = test_bus(1);
        let sub = bus.subscribe();
        // Buffer of 1 is already full with the connected frame
        let event = Event::global(EventType::ProgressUpdate, json!({}));
        assert!(!bus.send_to_client(&sub.client_id, &event));
        assert_eq!(bus.client_count(), 0);
    }

    #[tokio::test]
    async fn test_close_removes_client() {
        let bus = test_bus(8);
        let sub = bus.subscribe();
        assert_eq!(bus.client_count(), 1);
        bus.close(&sub.client_id);
        assert_eq!(bus.client_count(), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_broadcasts_while_connected() {
        let bus = test_bus(8);
        let mut sub = bus.subscribe();
        sub.receiver.recv().await.unwrap();

        // Keep-alive fires every 50ms in this test config
        let frame = tokio::time::timeout(Duration::from_millis(500), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_frame(&frame)["event"], "heartbeat");
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_is_false() {
        let bus = test_bus(8);
        let event = Event::global(EventType::ProgressUpdate, json!({}));
        assert!(!bus.send_to_client("nobody", &event));
    }
}
