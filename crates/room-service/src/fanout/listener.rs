//! The per-process fanout listener task.

use super::FanoutBus;
use crate::registry::ConnectionRegistry;

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Wait between resubscription attempts.
pub const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Subscribe to the bus and hand every event to the local registry until
/// `cancel` fires.
///
/// Subscription failures and stream ends are retried after
/// [`RESUBSCRIBE_BACKOFF`]. Events published while resubscribing are lost.
pub async fn run_fanout_listener(
    bus: Arc<dyn FanoutBus>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) {
    info!(target: "room.fanout.listener", "Fanout listener started");

    loop {
        let subscription = tokio::select! {
            () = cancel.cancelled() => break,
            result = bus.subscribe() => result,
        };

        match subscription {
            Ok(mut events) => loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(target: "room.fanout.listener", "Fanout listener stopped");
                        return;
                    }
                    next = events.next() => match next {
                        Some(event) => {
                            let delivered = registry.deliver(&event).await;
                            trace!(
                                target: "room.fanout.listener",
                                room_id = %event.room_id,
                                delivered = delivered,
                                "Event delivered"
                            );
                        }
                        None => {
                            warn!(
                                target: "room.fanout.listener",
                                "Subscription ended, resubscribing"
                            );
                            break;
                        }
                    }
                }
            },
            Err(e) => {
                warn!(
                    target: "room.fanout.listener",
                    error = %e,
                    "Subscription failed, retrying"
                );
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {
                debug!(target: "room.fanout.listener", "Resubscribing");
            }
        }
    }

    info!(target: "room.fanout.listener", "Fanout listener stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fanout::{BroadcastEvent, EventKind, LocalFanoutBus};
    use crate::registry::ConnectionHandle;
    use common::types::{ParticipantId, RoomId};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_listener_forwards_to_registry() {
        let bus = Arc::new(LocalFanoutBus::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let cancel = CancellationToken::new();

        let (tx, mut rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(RoomId::from("R1"), ParticipantId::from("u1"), tx);
        registry.register(handle).await;

        let task = tokio::spawn(run_fanout_listener(
            Arc::clone(&bus) as Arc<dyn FanoutBus>,
            Arc::clone(&registry),
            cancel.clone(),
        ));

        // Wait for the listener to subscribe before publishing
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let event = BroadcastEvent::new(RoomId::from("R1"), EventKind::Update, "x".to_string());
        bus.publish(&event).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_exits_on_cancel_before_subscribe() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_fanout_listener(
            Arc::new(LocalFanoutBus::default()),
            Arc::new(ConnectionRegistry::new()),
            cancel,
        )
        .await;
    }
}
