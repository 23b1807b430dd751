//! Redis pub/sub fanout bus.
//!
//! Publishes go through the shared `ConnectionManager`. Each subscription
//! opens its own dedicated pub/sub connection, since a connection in
//! subscriber mode cannot issue regular commands.

use super::{topic_for, BroadcastEvent, EventStream, FanoutBus, TOPIC_PATTERN, TOPIC_PREFIX};
use crate::errors::RoomError;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Msg};
use tracing::{debug, instrument, warn};

/// Shared [`FanoutBus`] on Redis pub/sub.
#[derive(Clone)]
pub struct RedisFanoutBus {
    client: Client,
    connection: ConnectionManager,
}

impl RedisFanoutBus {
    /// Create a bus from an opened client and its connection manager.
    #[must_use]
    pub fn new(client: Client, connection: ConnectionManager) -> Self {
        Self { client, connection }
    }
}

/// Decode one pub/sub message, skipping anything that is not a room event.
fn decode_message(msg: &Msg) -> Option<BroadcastEvent> {
    let channel = msg.get_channel_name();
    if !channel.starts_with(TOPIC_PREFIX) {
        debug!(target: "room.fanout.redis", channel = %channel, "Ignoring foreign channel");
        return None;
    }

    match serde_json::from_slice::<BroadcastEvent>(msg.get_payload_bytes()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                target: "room.fanout.redis",
                channel = %channel,
                error = %e,
                "Dropping undecodable room event"
            );
            None
        }
    }
}

#[async_trait]
impl FanoutBus for RedisFanoutBus {
    #[instrument(skip_all, fields(room_id = %event.room_id, kind = ?event.kind))]
    async fn publish(&self, event: &BroadcastEvent) -> Result<(), RoomError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| RoomError::Internal(format!("Failed to encode event: {e}")))?;

        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(topic_for(&event.room_id), payload)
            .await
            .map_err(|e| {
                warn!(target: "room.fanout.redis", error = %e, "Publish failed");
                RoomError::from(e)
            })?;

        debug!(target: "room.fanout.redis", receivers = receivers, "Event published");
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, RoomError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            warn!(target: "room.fanout.redis", error = %e, "Failed to open pub/sub connection");
            RoomError::from(e)
        })?;

        pubsub.psubscribe(TOPIC_PATTERN).await.map_err(|e| {
            warn!(target: "room.fanout.redis", error = %e, "PSUBSCRIBE failed");
            RoomError::from(e)
        })?;

        debug!(target: "room.fanout.redis", pattern = TOPIC_PATTERN, "Subscribed to room events");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| futures::future::ready(decode_message(&msg)));

        Ok(Box::pin(stream))
    }
}
