//! Progress event stream service
//!
//! Multiplexes pipeline progress events to subscribed clients over
//! long-lived server-push connections. Delivery is best-effort,
//! at-most-once: a client that cannot take a frame is dropped, nothing is
//! persisted or replayed. While at least one client is connected a
//! heartbeat frame is broadcast on a fixed interval.

pub mod bus;
pub mod event;

pub use bus::{BroadcastFilter, EventBus, Subscription};
pub use event::{Event, EventType, STREAM_HEADERS};
