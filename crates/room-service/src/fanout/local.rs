//! In-process fanout bus used when no shared backend is configured.

use super::{BroadcastEvent, EventStream, FanoutBus};
use crate::errors::RoomError;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default loopback channel capacity.
pub const DEFAULT_LOCAL_BUS_CAPACITY: usize = 1024;

/// Loopback [`FanoutBus`] over a `tokio::sync::broadcast` channel.
#[derive(Debug, Clone)]
pub struct LocalFanoutBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl Default for LocalFanoutBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_BUS_CAPACITY)
    }
}

impl LocalFanoutBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl FanoutBus for LocalFanoutBus {
    async fn publish(&self, event: &BroadcastEvent) -> Result<(), RoomError> {
        // No subscriber means nobody to deliver to, same as an empty pub/sub channel
        if self.sender.send(event.clone()).is_err() {
            trace!(
                target: "room.fanout.local",
                room_id = %event.room_id,
                "No subscribers, event dropped"
            );
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, RoomError> {
        let receiver = self.sender.subscribe();

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "room.fanout.local",
                            skipped = skipped,
                            "Subscriber lagged, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fanout::EventKind;
    use common::types::RoomId;
    use futures::StreamExt;

    fn event(room: &str) -> BroadcastEvent {
        BroadcastEvent::new(RoomId::from(room), EventKind::Update, format!("<p>{room}</p>"))
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LocalFanoutBus::default();
        assert!(bus.publish(&event("R1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events_in_order() {
        let bus = LocalFanoutBus::default();
        let mut first = bus.subscribe().await.unwrap();
        let mut second = bus.subscribe().await.unwrap();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(&event("R1")).await.unwrap();
        bus.publish(&event("R2")).await.unwrap();

        for stream in [&mut first, &mut second] {
            assert_eq!(stream.next().await.unwrap().room_id, RoomId::from("R1"));
            assert_eq!(stream.next().await.unwrap().room_id, RoomId::from("R2"));
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let bus = LocalFanoutBus::new(2);
        let mut stream = bus.subscribe().await.unwrap();

        for room in ["R1", "R2", "R3", "R4"] {
            bus.publish(&event(room)).await.unwrap();
        }

        // Oldest events were overwritten; the stream resumes at the oldest retained
        assert_eq!(stream.next().await.unwrap().room_id, RoomId::from("R3"));
        assert_eq!(stream.next().await.unwrap().room_id, RoomId::from("R4"));
    }
}
