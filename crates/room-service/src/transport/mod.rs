//! Client-facing WebSocket boundary.
//!
//! One bidirectional text connection per participant at `GET /ws`. The
//! identity is resolved from the credential before the upgrade; a failed
//! resolution is answered with `401` and never reaches the room logic.

pub mod ws;

pub use ws::{parse_inbound, InboundEvent};

use crate::credential::CredentialResolver;
use crate::registry::ConnectionRegistry;
use crate::room::RoomService;

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomService,
    pub registry: Arc<ConnectionRegistry>,
    pub resolver: Arc<CredentialResolver>,
    /// Cancelled when open connections must close (end of the shutdown grace period).
    pub connections_cancel: CancellationToken,
    /// Tracks upgraded connection tasks so shutdown can wait for them.
    pub connections: TaskTracker,
}

impl AppState {
    #[must_use]
    pub fn new(
        rooms: RoomService,
        registry: Arc<ConnectionRegistry>,
        resolver: Arc<CredentialResolver>,
    ) -> Self {
        Self {
            rooms,
            registry,
            resolver,
            connections_cancel: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }
}

/// Build the client router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
