//! Cross-process event fanout.
//!
//! Room-scoped events are published on topic `room-broadcast:{room_id}`.
//! Every process subscribes once to the pattern `room-broadcast:*` and hands
//! each event to its local [`ConnectionRegistry`](crate::registry::ConnectionRegistry),
//! so a publisher never needs to know which process holds which connection.
//!
//! Delivery is best effort: there is no acknowledgement, persistence or
//! replay. A process that is not subscribed when an event is published
//! misses it.

pub mod listener;
pub mod local;
pub mod redis_bus;

pub use listener::run_fanout_listener;
pub use local::LocalFanoutBus;
pub use redis_bus::RedisFanoutBus;

use crate::errors::RoomError;

use async_trait::async_trait;
use common::types::RoomId;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Topic prefix for room events.
pub const TOPIC_PREFIX: &str = "room-broadcast:";

/// Subscription pattern covering every room.
pub const TOPIC_PATTERN: &str = "room-broadcast:*";

/// Topic for one room.
#[must_use]
pub fn topic_for(room: &RoomId) -> String {
    format!("{TOPIC_PREFIX}{room}")
}

/// Kind of room event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Counts changed; payload is the gauge view.
    Update,
    /// Room reached its majority; payload is the ending view.
    Triggered,
}

/// An event addressed to every connection in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Rendered view, opaque to the bus.
    #[serde(rename = "html")]
    pub payload: String,
}

impl BroadcastEvent {
    #[must_use]
    pub fn new(room_id: RoomId, kind: EventKind, payload: String) -> Self {
        Self {
            room_id,
            kind,
            payload,
        }
    }
}

/// Stream of events delivered to this process.
pub type EventStream = Pin<Box<dyn Stream<Item = BroadcastEvent> + Send>>;

/// Publish/subscribe seam between room logic and the transport.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish an event to every subscriber, including this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is unreachable. Callers log and move on.
    async fn publish(&self, event: &BroadcastEvent) -> Result<(), RoomError>;

    /// Subscribe to all room events.
    ///
    /// The stream ends if the underlying subscription is lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    async fn subscribe(&self) -> Result<EventStream, RoomError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_for_room() {
        assert_eq!(topic_for(&RoomId::from("R1")), "room-broadcast:R1");
        assert!(topic_for(&RoomId::from("R1")).starts_with(TOPIC_PATTERN.trim_end_matches('*')));
    }

    #[test]
    fn test_event_wire_format() {
        let event = BroadcastEvent::new(
            RoomId::from("R1"),
            EventKind::Triggered,
            "<div id=\"main-ui\"></div>".to_string(),
        );

        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["roomId"], "R1");
        assert_eq!(value["event"], "triggered");
        assert_eq!(value["html"], "<div id=\"main-ui\"></div>");
    }

    #[test]
    fn test_event_decodes_from_wire() {
        let json = r#"{"roomId":"R9","event":"update","html":"<p>1/3</p>"}"#;
        let event: BroadcastEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room_id, RoomId::from("R9"));
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.payload, "<p>1/3</p>");
    }

    #[test]
    fn test_unknown_event_kind_rejected() {
        let json = r#"{"roomId":"R9","event":"exploded","html":""}"#;
        assert!(serde_json::from_str::<BroadcastEvent>(json).is_err());
    }
}
