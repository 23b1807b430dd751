//! Store and bus doubles.
//!
//! - [`RecordingFanoutBus`] keeps every published event and also delivers
//!   it to subscribers, like a loopback bus with a log.
//! - [`FailingFanoutBus`] and [`FailingRoomStore`] fail every call, for
//!   exercising the "backend unavailable is a no-op" paths.
//! - [`StalledRoomStore`] never completes, for exercising time bounds.
//! - [`RecordingRenderer`] renders counts as plain text and remembers them.

use async_trait::async_trait;
use common::types::{ParticipantId, RoomId};
use futures::StreamExt;
use room_service::errors::RoomError;
use room_service::fanout::{BroadcastEvent, EventKind, EventStream, FanoutBus};
use room_service::render::Renderer;
use room_service::store::{RoomCounts, RoomStore, StoreBackend};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Bus that records what was published.
#[derive(Debug, Clone)]
pub struct RecordingFanoutBus {
    published: Arc<Mutex<Vec<BroadcastEvent>>>,
    sender: broadcast::Sender<BroadcastEvent>,
}

impl Default for RecordingFanoutBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingFanoutBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            sender,
        }
    }

    /// Every event published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BroadcastEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Kinds of the events published for `room`, in order.
    #[must_use]
    pub fn kinds_for(&self, room: &RoomId) -> Vec<EventKind> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.room_id == room)
            .map(|e| e.kind)
            .collect()
    }

    /// Number of `triggered` events published for `room`.
    #[must_use]
    pub fn triggered_count(&self, room: &RoomId) -> usize {
        self.kinds_for(room)
            .into_iter()
            .filter(|k| *k == EventKind::Triggered)
            .count()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl FanoutBus for RecordingFanoutBus {
    async fn publish(&self, event: &BroadcastEvent) -> Result<(), RoomError> {
        self.published.lock().unwrap().push(event.clone());
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, RoomError> {
        Ok(receiver_stream(self.sender.subscribe()))
    }
}

/// Bus whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingFanoutBus;

#[async_trait]
impl FanoutBus for FailingFanoutBus {
    async fn publish(&self, _event: &BroadcastEvent) -> Result<(), RoomError> {
        Err(RoomError::Redis("bus unavailable".to_string()))
    }

    async fn subscribe(&self) -> Result<EventStream, RoomError> {
        Err(RoomError::Redis("bus unavailable".to_string()))
    }
}

/// Store whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingRoomStore;

#[async_trait]
impl RoomStore for FailingRoomStore {
    async fn add_participant(&self, _: &RoomId, _: &ParticipantId) -> Result<(), RoomError> {
        Err(RoomError::Redis("store unavailable".to_string()))
    }

    async fn remove_participant(&self, _: &RoomId, _: &ParticipantId) -> Result<(), RoomError> {
        Err(RoomError::Redis("store unavailable".to_string()))
    }

    async fn cast_vote(&self, _: &RoomId, _: &ParticipantId) -> Result<bool, RoomError> {
        Err(RoomError::Redis("store unavailable".to_string()))
    }

    async fn get_counts(&self, _: &RoomId) -> Result<RoomCounts, RoomError> {
        Err(RoomError::Redis("store unavailable".to_string()))
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }
}

/// Store whose every call hangs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledRoomStore;

#[async_trait]
impl RoomStore for StalledRoomStore {
    async fn add_participant(&self, _: &RoomId, _: &ParticipantId) -> Result<(), RoomError> {
        std::future::pending().await
    }

    async fn remove_participant(&self, _: &RoomId, _: &ParticipantId) -> Result<(), RoomError> {
        std::future::pending().await
    }

    async fn cast_vote(&self, _: &RoomId, _: &ParticipantId) -> Result<bool, RoomError> {
        std::future::pending().await
    }

    async fn get_counts(&self, _: &RoomId) -> Result<RoomCounts, RoomError> {
        std::future::pending().await
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }
}

/// Renderer with predictable payloads.
///
/// Updates render as `votes/total`, the ending view as `triggered`.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    rendered: Arc<Mutex<Vec<RoomCounts>>>,
}

impl RecordingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts passed to `render`, in order.
    #[must_use]
    pub fn rendered(&self) -> Vec<RoomCounts> {
        self.rendered.lock().unwrap().clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, counts: &RoomCounts) -> String {
        self.rendered.lock().unwrap().push(*counts);
        format!("{}/{}", counts.votes, counts.total)
    }

    fn render_triggered(&self) -> String {
        "triggered".to_string()
    }
}

/// Adapt a broadcast receiver, skipping over lag.
fn receiver_stream(receiver: broadcast::Receiver<BroadcastEvent>) -> EventStream {
    futures::stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
