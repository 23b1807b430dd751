//! Single-process room store.
//!
//! Exact bookkeeping under one lock per room, no network latency.
//!
//! # Operational Risk
//!
//! Rooms are created lazily and never removed: there is no expiry in this
//! backend, so memory grows with the number of distinct rooms seen for the
//! lifetime of the process. Adopting it for long-running multi-tenant
//! deployments requires an external reaper.

use super::{RoomCounts, RoomStore, StoreBackend};
use crate::errors::RoomError;
use crate::trigger;

use async_trait::async_trait;
use common::types::{ParticipantId, RoomId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryRoom {
    participants: HashSet<ParticipantId>,
    voters: HashSet<ParticipantId>,
    triggered: bool,
}

/// In-memory [`RoomStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryRoomStore {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<Mutex<MemoryRoom>>>>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms ever referenced.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Fetch the room, creating it on first reference.
    async fn room(&self, id: &RoomId) -> Arc<Mutex<MemoryRoom>> {
        if let Some(room) = self.rooms.read().await.get(id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        Arc::clone(rooms.entry(id.clone()).or_default())
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn add_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        let entry = self.room(room).await;
        entry.lock().await.participants.insert(participant.clone());
        Ok(())
    }

    async fn remove_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        let entry = self.room(room).await;
        entry.lock().await.participants.remove(participant);
        Ok(())
    }

    async fn cast_vote(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<bool, RoomError> {
        let entry = self.room(room).await;
        let mut state = entry.lock().await;

        if state.triggered {
            return Ok(false);
        }
        Ok(state.voters.insert(participant.clone()))
    }

    async fn get_counts(&self, room: &RoomId) -> Result<RoomCounts, RoomError> {
        let entry = self.room(room).await;
        let mut state = entry.lock().await;

        let total = state.participants.len();
        let votes = state.voters.len();
        let was_triggered = state.triggered;

        state.triggered = trigger::evaluate(total, votes, was_triggered);
        let transitioned = state.triggered && !was_triggered;
        if transitioned {
            debug!(
                target: "room.store.memory",
                room_id = %room,
                total = total,
                votes = votes,
                "Room triggered"
            );
        }

        Ok(RoomCounts {
            total,
            votes,
            triggered: state.triggered,
            transitioned,
        })
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }
}
