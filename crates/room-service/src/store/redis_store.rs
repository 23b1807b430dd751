//! Redis-backed room store.
//!
//! # Key Patterns
//!
//! - `room:{id}:participants` - participant IDs (SET)
//! - `room:{id}:votes` - voter IDs (SET)
//! - `room:{id}:triggered` - `"1"` once the room has triggered (STRING)
//!
//! Every write refreshes the TTL of all three keys in the same round trip,
//! so an active room never partially expires.
//!
//! # Connection Pattern
//!
//! `ConnectionManager` is cheap to clone and reconnects on its own. Each
//! operation clones it; no locking is needed.

use super::lua_scripts;
use super::{RoomCounts, RoomStore, StoreBackend};
use crate::errors::RoomError;
use crate::trigger;

use async_trait::async_trait;
use common::types::{ParticipantId, RoomId};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default sliding expiry for room keys (24 hours).
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(86_400);

const TRIGGERED_MARKER: &str = "1";

fn participants_key(room: &RoomId) -> String {
    format!("room:{room}:participants")
}

fn votes_key(room: &RoomId) -> String {
    format!("room:{room}:votes")
}

fn triggered_key(room: &RoomId) -> String {
    format!("room:{room}:triggered")
}

/// Open a Redis client and connection manager, bounded by `timeout`.
///
/// Performs a `PING` so an unreachable server is detected at startup rather
/// than on the first connection.
///
/// # Errors
///
/// Returns `RoomError::Redis` if the URL is invalid or the server is
/// unreachable, `RoomError::Timeout` if the check does not finish in time.
pub async fn connect(
    redis_url: &str,
    timeout: Duration,
) -> Result<(Client, ConnectionManager), RoomError> {
    let client = Client::open(redis_url).map_err(|e| {
        // Do NOT log redis_url, it may carry credentials
        error!(target: "room.store.redis", error = %e, "Failed to open Redis client");
        RoomError::Redis(format!("Failed to open Redis client: {e}"))
    })?;

    let check = async {
        let mut manager = ConnectionManager::new(client.clone()).await?;
        let _pong: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok::<_, redis::RedisError>(manager)
    };

    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(manager)) => Ok((client, manager)),
        Ok(Err(e)) => {
            warn!(target: "room.store.redis", error = %e, "Redis connectivity check failed");
            Err(RoomError::Redis(format!("Failed to connect to Redis: {e}")))
        }
        Err(_) => {
            warn!(
                target: "room.store.redis",
                timeout_ms = timeout.as_millis(),
                "Redis connectivity check timed out"
            );
            Err(RoomError::Timeout {
                operation: "connect",
            })
        }
    }
}

/// Shared [`RoomStore`] on Redis.
#[derive(Clone)]
pub struct RedisRoomStore {
    connection: ConnectionManager,
    ttl_seconds: i64,
    cast_vote_script: Script,
}

impl RedisRoomStore {
    /// Create a store over an established connection manager.
    #[must_use]
    pub fn new(connection: ConnectionManager, ttl: Duration) -> Self {
        Self {
            connection,
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1),
            cast_vote_script: Script::new(lua_scripts::CAST_VOTE),
        }
    }

    /// Pipeline a set mutation plus an expiry refresh on all room keys.
    async fn mutate_membership(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
        add: bool,
    ) -> Result<(), RoomError> {
        let mut conn = self.connection.clone();
        let participants = participants_key(room);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if add {
            pipe.sadd(&participants, participant.as_str()).ignore();
        } else {
            pipe.srem(&participants, participant.as_str()).ignore();
        }
        pipe.expire(&participants, self.ttl_seconds)
            .ignore()
            .expire(votes_key(room), self.ttl_seconds)
            .ignore()
            .expire(triggered_key(room), self.ttl_seconds)
            .ignore();

        let result: Result<(), redis::RedisError> = pipe.query_async(&mut conn).await;
        result.map_err(|e| {
            warn!(
                target: "room.store.redis",
                error = %e,
                room_id = %room,
                add = add,
                "Failed to update participant set"
            );
            RoomError::from(e)
        })
    }
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    #[instrument(skip_all, fields(room_id = %room))]
    async fn add_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        self.mutate_membership(room, participant, true).await
    }

    #[instrument(skip_all, fields(room_id = %room))]
    async fn remove_participant(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        self.mutate_membership(room, participant, false).await
    }

    #[instrument(skip_all, fields(room_id = %room))]
    async fn cast_vote(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<bool, RoomError> {
        let mut conn = self.connection.clone();

        let added: i64 = self
            .cast_vote_script
            .key(participants_key(room))
            .key(votes_key(room))
            .key(triggered_key(room))
            .arg(participant.as_str())
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "room.store.redis",
                    error = %e,
                    room_id = %room,
                    "Cast vote script failed"
                );
                RoomError::from(e)
            })?;

        Ok(added == 1)
    }

    #[instrument(skip_all, fields(room_id = %room))]
    async fn get_counts(&self, room: &RoomId) -> Result<RoomCounts, RoomError> {
        let mut conn = self.connection.clone();
        let triggered = triggered_key(room);

        let (total, votes, marker): (usize, usize, Option<String>) = redis::pipe()
            .atomic()
            .scard(participants_key(room))
            .scard(votes_key(room))
            .get(&triggered)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "room.store.redis",
                    error = %e,
                    room_id = %room,
                    "Failed to read room counts"
                );
                RoomError::from(e)
            })?;

        let was_triggered = marker.as_deref() == Some(TRIGGERED_MARKER);
        if !trigger::evaluate(total, votes, was_triggered) {
            return Ok(RoomCounts {
                total,
                votes,
                triggered: false,
                transitioned: false,
            });
        }
        if was_triggered {
            return Ok(RoomCounts {
                total,
                votes,
                triggered: true,
                transitioned: false,
            });
        }

        // Only the process whose SET NX lands reports the transition
        let set: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(&triggered)
            .arg(TRIGGERED_MARKER)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await;

        let transitioned = match set {
            Ok(reply) => reply.is_some(),
            Err(e) => {
                // Best effort: the majority was observed, report it anyway
                warn!(
                    target: "room.store.redis",
                    error = %e,
                    room_id = %room,
                    "Failed to persist triggered marker"
                );
                true
            }
        };

        if transitioned {
            debug!(
                target: "room.store.redis",
                room_id = %room,
                total = total,
                votes = votes,
                "Room triggered"
            );
        }

        Ok(RoomCounts {
            total,
            votes,
            triggered: true,
            transitioned,
        })
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }
}
