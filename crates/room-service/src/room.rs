//! Room orchestration: what happens on join, vote and leave.
//!
//! Every store and bus call is time-bounded. Backend failures are logged and
//! treated as a no-op for that call; the next successful state change
//! republishes a full view, so nothing is retried here.
//!
//! The `triggered` event is published only by the caller whose
//! `get_counts` reported the transition, so each room announces it once.

use crate::credential::Credential;
use crate::fanout::{BroadcastEvent, EventKind, FanoutBus};
use crate::observability::metrics::{record_publish_failure, record_trigger, record_vote};
use crate::registry::ConnectionHandle;
use crate::render::Renderer;
use crate::store::{with_timeout, RoomCounts, RoomStore};

use common::types::RoomId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default bound on each store or bus call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(3);

/// What a join produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// An event was published to the room.
    Published(EventKind),
    /// The room had already triggered; the ending view went to the joiner only.
    SentDirect,
    /// Counts could not be read; nothing was sent.
    BackendUnavailable,
}

/// Result of a vote attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Whether the vote was recorded.
    pub counted: bool,
    /// Counts read after a counted vote.
    pub counts: Option<RoomCounts>,
}

/// Room logic shared by every connection on this process.
#[derive(Clone)]
pub struct RoomService {
    store: Arc<dyn RoomStore>,
    bus: Arc<dyn FanoutBus>,
    renderer: Arc<dyn Renderer>,
    backend_timeout: Duration,
}

impl RoomService {
    #[must_use]
    pub fn new(
        store: Arc<dyn RoomStore>,
        bus: Arc<dyn FanoutBus>,
        renderer: Arc<dyn Renderer>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            renderer,
            backend_timeout,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Add the participant and bring every connection in the room up to date.
    #[instrument(skip_all, fields(room_id = %credential.room_id, connection_id = %connection.id))]
    pub async fn join(
        &self,
        credential: &Credential,
        connection: &ConnectionHandle,
    ) -> JoinOutcome {
        let room = &credential.room_id;

        if let Err(e) = with_timeout(
            self.backend_timeout,
            "add_participant",
            self.store.add_participant(room, &credential.participant_id),
        )
        .await
        {
            warn!(target: "room.service", error = %e, "Failed to add participant");
        }

        let Some(counts) = self.counts(room).await else {
            return JoinOutcome::BackendUnavailable;
        };

        if counts.triggered && !counts.transitioned {
            let event = BroadcastEvent::new(
                room.clone(),
                EventKind::Triggered,
                self.renderer.render_triggered(),
            );
            connection.try_send(event);
            debug!(target: "room.service", "Joined a triggered room, ending view sent directly");
            return JoinOutcome::SentDirect;
        }

        match self.announce(room, &counts).await {
            Some(kind) => JoinOutcome::Published(kind),
            None => JoinOutcome::BackendUnavailable,
        }
    }

    /// Record a vote and publish the new state if it counted.
    #[instrument(skip_all, fields(room_id = %credential.room_id))]
    pub async fn vote(&self, credential: &Credential) -> VoteOutcome {
        let room = &credential.room_id;

        let counted = match with_timeout(
            self.backend_timeout,
            "cast_vote",
            self.store.cast_vote(room, &credential.participant_id),
        )
        .await
        {
            Ok(counted) => counted,
            Err(e) => {
                warn!(target: "room.service", error = %e, "Failed to cast vote");
                record_vote("failed");
                return VoteOutcome {
                    counted: false,
                    counts: None,
                };
            }
        };

        if !counted {
            record_vote("rejected");
            debug!(target: "room.service", "Vote not counted");
            return VoteOutcome {
                counted: false,
                counts: None,
            };
        }

        record_vote("counted");
        let counts = self.counts(room).await;
        if let Some(counts) = &counts {
            self.announce(room, counts).await;
        }

        VoteOutcome { counted, counts }
    }

    /// Remove the participant and publish the new state unless the room has
    /// already triggered.
    #[instrument(skip_all, fields(room_id = %credential.room_id))]
    pub async fn leave(&self, credential: &Credential) {
        let room = &credential.room_id;

        if let Err(e) = with_timeout(
            self.backend_timeout,
            "remove_participant",
            self.store.remove_participant(room, &credential.participant_id),
        )
        .await
        {
            warn!(target: "room.service", error = %e, "Failed to remove participant");
        }

        if let Some(counts) = self.counts(room).await {
            self.announce(room, &counts).await;
        }
    }

    async fn counts(&self, room: &RoomId) -> Option<RoomCounts> {
        match with_timeout(self.backend_timeout, "get_counts", self.store.get_counts(room)).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(target: "room.service", error = %e, "Failed to read room counts");
                None
            }
        }
    }

    /// Publish the event the counts call for: `triggered` on the transition,
    /// `update` while untriggered, nothing otherwise.
    async fn announce(&self, room: &RoomId, counts: &RoomCounts) -> Option<EventKind> {
        let event = if counts.transitioned {
            record_trigger();
            info!(
                target: "room.service",
                room_id = %room,
                total = counts.total,
                votes = counts.votes,
                "Room triggered"
            );
            BroadcastEvent::new(
                room.clone(),
                EventKind::Triggered,
                self.renderer.render_triggered(),
            )
        } else if !counts.triggered {
            BroadcastEvent::new(room.clone(), EventKind::Update, self.renderer.render(counts))
        } else {
            return None;
        };

        let kind = event.kind;
        let published =
            with_timeout(self.backend_timeout, "publish", self.bus.publish(&event)).await;
        if let Err(e) = published {
            record_publish_failure();
            warn!(
                target: "room.service",
                error = %e,
                kind = ?kind,
                "Failed to publish room event"
            );
        }
        Some(kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fanout::{EventStream, LocalFanoutBus};
    use crate::render::GaugeRenderer;
    use crate::store::MemoryRoomStore;
    use common::types::ParticipantId;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    async fn service() -> (RoomService, EventStream) {
        let bus = Arc::new(LocalFanoutBus::default());
        let events = bus.subscribe().await.unwrap();
        let service = RoomService::new(
            Arc::new(MemoryRoomStore::new()),
            bus,
            Arc::new(GaugeRenderer),
            DEFAULT_BACKEND_TIMEOUT,
        );
        (service, events)
    }

    fn participant(
        room: &str,
        pid: &str,
    ) -> (Credential, ConnectionHandle, mpsc::Receiver<BroadcastEvent>) {
        let credential = Credential {
            room_id: RoomId::from(room),
            participant_id: ParticipantId::from(pid),
        };
        let (tx, rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(
            credential.room_id.clone(),
            credential.participant_id.clone(),
            tx,
        );
        (credential, handle, rx)
    }

    #[tokio::test]
    async fn test_join_publishes_update() {
        let (service, mut events) = service().await;
        let (u1, conn, _rx) = participant("R1", "u1");

        assert_eq!(
            service.join(&u1, &conn).await,
            JoinOutcome::Published(EventKind::Update)
        );
        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert!(event.payload.contains("width: 0.0%"));
    }

    #[tokio::test]
    async fn test_majority_vote_publishes_triggered_once() {
        let (service, mut events) = service().await;
        let mut people = Vec::new();
        for pid in ["u1", "u2", "u3"] {
            let (cred, conn, rx) = participant("R1", pid);
            service.join(&cred, &conn).await;
            people.push((cred, conn, rx));
        }
        for _ in 0..3 {
            assert_eq!(events.next().await.unwrap().kind, EventKind::Update);
        }

        let first = service.vote(&people[0].0).await;
        assert!(first.counted);
        assert!(!first.counts.unwrap().triggered);
        assert_eq!(events.next().await.unwrap().kind, EventKind::Update);

        let second = service.vote(&people[1].0).await;
        assert!(second.counts.unwrap().transitioned);
        assert_eq!(events.next().await.unwrap().kind, EventKind::Triggered);

        let third = service.vote(&people[2].0).await;
        assert!(!third.counted);

        // Leaving a triggered room publishes nothing
        service.leave(&people[2].0).await;

        // Marker event proves nothing else was queued before it
        let (late, conn, _rx) = participant("R1", "late");
        service.join(&late, &conn).await;
        let (other, other_conn, _rx2) = participant("R2", "x");
        service.join(&other, &other_conn).await;
        let next = events.next().await.unwrap();
        assert_eq!(next.room_id, RoomId::from("R2"));
    }

    #[tokio::test]
    async fn test_join_after_trigger_sends_direct() {
        let (service, mut events) = service().await;
        let (u1, conn1, _rx1) = participant("R1", "u1");
        service.join(&u1, &conn1).await;
        service.vote(&u1).await;

        let (u2, conn2, mut rx2) = participant("R1", "u2");
        assert_eq!(service.join(&u2, &conn2).await, JoinOutcome::SentDirect);

        let direct = rx2.recv().await.unwrap();
        assert_eq!(direct.kind, EventKind::Triggered);

        // update (join), triggered (vote), nothing for the late join
        assert_eq!(events.next().await.unwrap().kind, EventKind::Update);
        assert_eq!(events.next().await.unwrap().kind, EventKind::Triggered);
    }

    #[tokio::test]
    async fn test_duplicate_vote_publishes_nothing() {
        let (service, mut events) = service().await;
        let (u1, c1, _r1) = participant("R1", "u1");
        let (u2, c2, _r2) = participant("R1", "u2");
        let (u3, c3, _r3) = participant("R1", "u3");
        service.join(&u1, &c1).await;
        service.join(&u2, &c2).await;
        service.join(&u3, &c3).await;

        assert!(service.vote(&u1).await.counted);
        let again = service.vote(&u1).await;
        assert_eq!(
            again,
            VoteOutcome {
                counted: false,
                counts: None
            }
        );

        // 3 joins + 1 counted vote
        for _ in 0..4 {
            assert_eq!(events.next().await.unwrap().kind, EventKind::Update);
        }
        service.leave(&u3).await;
        let after_leave = events.next().await.unwrap();
        assert_eq!(after_leave.kind, EventKind::Triggered, "1 of 2 reaches majority");
    }
}
