//! Room membership store.
//!
//! Per room: a participant set, a voter set and a monotonic triggered flag.
//! Two interchangeable backends implement [`RoomStore`], chosen once at
//! startup:
//!
//! - [`MemoryRoomStore`] - single process, exact, no expiry
//! - [`RedisRoomStore`] - shared across processes, 24h sliding expiry
//!
//! Both delegate the trigger decision to [`crate::trigger::evaluate`].
//!
//! # Known Gap
//!
//! Leaving a room does not retract a prior vote, so the voter set is not
//! guaranteed to be a subset of the current participants. This is the
//! established behavior and is kept on purpose.

pub mod lua_scripts;
pub mod memory;
pub mod redis_store;

pub use memory::MemoryRoomStore;
pub use redis_store::RedisRoomStore;

use crate::errors::RoomError;
use crate::observability::metrics::{record_backend_error, record_backend_latency};

use async_trait::async_trait;
use common::types::{ParticipantId, RoomId};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Which backend a store is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local, lost on restart.
    Memory,
    /// Shared Redis instance.
    Redis,
}

impl StoreBackend {
    /// Label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis => "redis",
        }
    }
}

/// Snapshot of a room returned by [`RoomStore::get_counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomCounts {
    /// Current participant count.
    pub total: usize,
    /// Current voter count.
    pub votes: usize,
    /// Whether the room has triggered.
    pub triggered: bool,
    /// True only for the call that persisted the false -> true flip.
    pub transitioned: bool,
}

/// Room membership operations shared by both backends.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Idempotent insert into the participant set; refreshes expiry.
    async fn add_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError>;

    /// Idempotent delete from the participant set. Votes are not retracted.
    async fn remove_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError>;

    /// Record a vote.
    ///
    /// Returns `false` without mutation if the room already triggered or the
    /// participant already voted.
    async fn cast_vote(&self, room: &RoomId, participant: &ParticipantId)
        -> Result<bool, RoomError>;

    /// Read the current counts, persisting the triggered flag if the
    /// majority has just been reached.
    async fn get_counts(&self, room: &RoomId) -> Result<RoomCounts, RoomError>;

    /// Backend kind.
    fn backend(&self) -> StoreBackend;
}

/// Run a backend call with a time bound, recording latency and failures.
///
/// # Errors
///
/// Returns `RoomError::Timeout` if `limit` elapses, or the call's own error.
pub async fn with_timeout<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, RoomError>
where
    F: Future<Output = Result<T, RoomError>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RoomError::Timeout { operation }),
    };
    record_backend_latency(operation, start.elapsed());
    if result.is_err() {
        record_backend_error(operation);
    }
    result
}
