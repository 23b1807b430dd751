//! Test rooms and participants.

use common::types::{ParticipantId, RoomId};
use room_service::credential::Credential;
use uuid::Uuid;

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room ID.
    pub id: RoomId,
}

impl TestRoom {
    /// Create a test room with the given ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: RoomId::new(id),
        }
    }

    /// Create a test room with a random ID.
    ///
    /// Shared-backend tests use this so parallel runs never collide.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    /// A participant of this room.
    #[must_use]
    pub fn participant(&self, name: &str) -> TestParticipant {
        TestParticipant {
            room_id: self.id.clone(),
            participant_id: ParticipantId::new(name),
        }
    }

    /// `count` distinct participants named `p0`, `p1`, ...
    #[must_use]
    pub fn participants(&self, count: usize) -> Vec<TestParticipant> {
        (0..count)
            .map(|i| self.participant(&format!("p{i}")))
            .collect()
    }
}

/// Test participant fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParticipant {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
}

impl TestParticipant {
    /// The identity this participant resolves to.
    #[must_use]
    pub fn credential(&self) -> Credential {
        Credential {
            room_id: self.room_id.clone(),
            participant_id: self.participant_id.clone(),
        }
    }
}
