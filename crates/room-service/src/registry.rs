//! Per-process index of live connections by room.
//!
//! Each connection owns a bounded mailbox; the registry only holds the
//! sending half. Delivery never blocks: a full or closed mailbox is logged
//! and skipped, and the connection's own task cleans up on exit.
//!
//! Iteration works on a snapshot taken under the read lock, so callbacks
//! may send, block or re-enter the registry without holding it.

use crate::fanout::BroadcastEvent;
use crate::observability::metrics::set_connections_active;

use common::types::{ParticipantId, RoomId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default mailbox capacity per connection.
pub const MAILBOX_CAPACITY: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub room: RoomId,
    pub participant: ParticipantId,
    sender: mpsc::Sender<BroadcastEvent>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh [`ConnectionId`].
    #[must_use]
    pub fn new(
        room: RoomId,
        participant: ParticipantId,
        sender: mpsc::Sender<BroadcastEvent>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            room,
            participant,
            sender,
        }
    }

    /// Queue an event for this connection without waiting.
    ///
    /// Returns `false` if the mailbox is full or the connection is gone.
    pub fn try_send(&self, event: BroadcastEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "room.registry",
                    connection_id = %self.id,
                    room_id = %self.room,
                    "Mailbox full, event dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "room.registry",
                    connection_id = %self.id,
                    "Connection closed, event dropped"
                );
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    by_room: HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
    room_of: HashMap<ConnectionId, RoomId>,
}

/// Local connection registry.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    index: RwLock<Index>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its room.
    pub async fn register(&self, handle: ConnectionHandle) {
        let count = {
            let mut index = self.index.write().await;
            index.room_of.insert(handle.id, handle.room.clone());
            index
                .by_room
                .entry(handle.room.clone())
                .or_default()
                .insert(handle.id, handle);
            index.room_of.len()
        };
        set_connections_active(count);
    }

    /// Remove a connection. Unknown IDs are a no-op.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let (removed, count) = {
            let mut index = self.index.write().await;
            let removed = match index.room_of.remove(&id) {
                Some(room) => {
                    let removed = index.by_room.get_mut(&room).and_then(|c| c.remove(&id));
                    if index.by_room.get(&room).is_some_and(HashMap::is_empty) {
                        index.by_room.remove(&room);
                    }
                    removed
                }
                None => None,
            };
            (removed, index.room_of.len())
        };
        set_connections_active(count);
        removed
    }

    /// Point-in-time copy of a room's connections.
    pub async fn snapshot(&self, room: &RoomId) -> Vec<ConnectionHandle> {
        self.index
            .read()
            .await
            .by_room
            .get(room)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Visit every connection in `room` as of the call. The lock is released
    /// before `f` runs.
    pub async fn for_each_in_room<F>(&self, room: &RoomId, mut f: F)
    where
        F: FnMut(&ConnectionHandle),
    {
        for handle in self.snapshot(room).await {
            f(&handle);
        }
    }

    /// Hand an event to every local connection in its room.
    ///
    /// Returns the number of mailboxes that accepted it.
    pub async fn deliver(&self, event: &BroadcastEvent) -> usize {
        let mut delivered = 0;
        self.for_each_in_room(&event.room_id, |handle| {
            if handle.try_send(event.clone()) {
                delivered += 1;
            }
        })
        .await;
        delivered
    }

    /// Total registered connections on this process.
    pub async fn connection_count(&self) -> usize {
        self.index.read().await.room_of.len()
    }

    /// Registered connections in one room.
    pub async fn room_connection_count(&self, room: &RoomId) -> usize {
        self.index
            .read()
            .await
            .by_room
            .get(room)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fanout::EventKind;
    use std::sync::Arc;

    fn handle(
        room: &str,
        pid: &str,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<BroadcastEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ConnectionHandle::new(RoomId::from(room), ParticipantId::from(pid), tx),
            rx,
        )
    }

    fn update(room: &str) -> BroadcastEvent {
        BroadcastEvent::new(RoomId::from(room), EventKind::Update, "gauge".to_string())
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle("R1", "u1", 4);
        let (h2, _rx2) = handle("R1", "u2", 4);
        let id1 = h1.id;

        registry.register(h1).await;
        registry.register(h2).await;
        assert_eq!(registry.connection_count().await, 2);
        assert_eq!(registry.room_connection_count(&RoomId::from("R1")).await, 2);

        assert!(registry.unregister(id1).await.is_some());
        assert!(registry.unregister(id1).await.is_none(), "second unregister is a no-op");
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_participant_twice_gets_two_entries() {
        let registry = ConnectionRegistry::new();
        let (tab1, mut rx1) = handle("R1", "u1", 4);
        let (tab2, mut rx2) = handle("R1", "u1", 4);
        registry.register(tab1).await;
        registry.register(tab2).await;

        assert_eq!(registry.deliver(&update("R1")).await, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_deliver_is_room_scoped() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = handle("A", "u1", 4);
        let (b, mut rx_b) = handle("B", "u2", 4);
        registry.register(a).await;
        registry.register(b).await;

        assert_eq!(registry.deliver(&update("A")).await, 1);
        assert_eq!(rx_a.recv().await.unwrap().room_id, RoomId::from("A"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_skips_full_and_closed_mailboxes() {
        let registry = ConnectionRegistry::new();
        let (full, _rx_full) = handle("R1", "full", 1);
        let (closed, rx_closed) = handle("R1", "closed", 4);
        let (ok, mut rx_ok) = handle("R1", "ok", 4);
        registry.register(full).await;
        registry.register(closed).await;
        registry.register(ok).await;
        drop(rx_closed);

        assert_eq!(registry.deliver(&update("R1")).await, 2);
        // Mailbox of capacity 1 is now full
        assert_eq!(registry.deliver(&update("R1")).await, 1);
        assert_eq!(registry.connection_count().await, 3, "nothing removed during delivery");

        assert!(rx_ok.recv().await.is_some());
        assert!(rx_ok.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_room() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.deliver(&update("nobody")).await, 0);
    }

    #[tokio::test]
    async fn test_for_each_can_reenter_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (h, _rx) = handle("R1", "u1", 4);
        let id = h.id;
        registry.register(h).await;

        let mut seen = Vec::new();
        registry
            .for_each_in_room(&RoomId::from("R1"), |handle| seen.push(handle.id))
            .await;
        assert_eq!(seen, vec![id]);

        // Snapshot is detached from the index
        let snapshot = registry.snapshot(&RoomId::from("R1")).await;
        registry.unregister(id).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.room_connection_count(&RoomId::from("R1")).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..50 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let h = ConnectionHandle::new(
                    RoomId::new(format!("R{}", i % 5)),
                    ParticipantId::new(format!("u{i}")),
                    tx,
                );
                let id = h.id;
                registry.register(h).await;
                registry.deliver(&update("R0")).await;
                registry.unregister(id).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count().await, 0);
    }
}
