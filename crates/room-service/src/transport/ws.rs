//! WebSocket connection lifecycle.
//!
//! ```text
//! upgrade -> register -> join -> [receive loop] -> unregister -> leave
//!                                   |
//!             writer task <- mailbox (registry deliveries, direct sends)
//! ```
//!
//! Inbound frames follow the htmx `ws-send` convention: a JSON object whose
//! `HEADERS["HX-Request"]` is `"true"` casts a vote. Other objects are
//! ignored; anything that is not a JSON object closes the connection.

use super::AppState;
use crate::credential::{Credential, CREDENTIAL_HEADER, HOST_CREDENTIAL_HEADER};
use crate::errors::RoomError;
use crate::fanout::BroadcastEvent;
use crate::observability::metrics::record_credential_rejection;
use crate::registry::{ConnectionHandle, MAILBOX_CAPACITY};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Bound on flushing the close frame after the receive loop ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A recognised inbound signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    Vote,
    /// A well-formed object with no meaning to the room.
    Ignored,
}

/// Classify one inbound text frame.
///
/// # Errors
///
/// Returns `RoomError::MalformedEvent` if the frame is not a JSON object.
pub fn parse_inbound(text: &str) -> Result<InboundEvent, RoomError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| RoomError::MalformedEvent(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(RoomError::MalformedEvent(
            "expected a JSON object".to_string(),
        ));
    };

    let is_htmx_request = object
        .get("HEADERS")
        .and_then(|headers| headers.get("HX-Request"))
        .and_then(serde_json::Value::as_str)
        == Some("true");

    Ok(if is_htmx_request {
        InboundEvent::Vote
    } else {
        InboundEvent::Ignored
    })
}

/// `GET /ws`: resolve the identity, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let header = [CREDENTIAL_HEADER, HOST_CREDENTIAL_HEADER]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.trim().is_empty());

    let credential = match state.resolver.resolve(header, &query) {
        Ok(credential) => credential,
        Err(e) => {
            record_credential_rejection(e.reason());
            // Never log the token itself
            info!(target: "room.transport", reason = e.reason(), "Connection rejected");
            return RoomError::from(e).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let tracker = state.connections.clone();
    ws.on_upgrade(move |socket| tracker.track_future(handle_socket(socket, credential, state)))
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: mpsc::Receiver<BroadcastEvent>,
    mut close: oneshot::Receiver<CloseFrame<'static>>,
) {
    loop {
        tokio::select! {
            biased;

            frame = &mut close => {
                if let Ok(frame) = frame {
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                return;
            }
            event = mailbox.recv() => match event {
                Some(event) => {
                    if let Err(e) = sink.send(Message::Text(event.payload)).await {
                        debug!(target: "room.transport", error = %e, "Socket write failed");
                        return;
                    }
                }
                None => break,
            }
        }
    }

    // Every mailbox sender is gone; a close frame may still be on its way
    if let Ok(frame) = close.await {
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
}

async fn handle_socket(socket: WebSocket, credential: Credential, state: AppState) {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
    let handle = ConnectionHandle::new(
        credential.room_id.clone(),
        credential.participant_id.clone(),
        mailbox_tx,
    );
    let connection_id = handle.id;

    let (sink, mut stream) = socket.split();
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(sink, mailbox_rx, close_rx));

    state.registry.register(handle.clone()).await;
    debug!(
        target: "room.transport",
        connection_id = %connection_id,
        room_id = %credential.room_id,
        "Connection opened"
    );

    state.rooms.join(&credential, &handle).await;

    let mut close_frame = None;
    loop {
        tokio::select! {
            () = state.connections_cancel.cancelled() => {
                close_frame = Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                });
                break;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_inbound(&text) {
                    Ok(InboundEvent::Vote) => {
                        state.rooms.vote(&credential).await;
                    }
                    Ok(InboundEvent::Ignored) => {}
                    Err(e) => {
                        warn!(
                            target: "room.transport",
                            connection_id = %connection_id,
                            error = %e,
                            "Closing connection on malformed event"
                        );
                        close_frame = Some(CloseFrame {
                            code: close_code::UNSUPPORTED,
                            reason: "malformed event".into(),
                        });
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Binary frames carry nothing for us; pings are answered by axum
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "room.transport", error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    // Signal the writer while the mailbox is still open
    if let Some(frame) = close_frame {
        let _ = close_tx.send(frame);
    } else {
        drop(close_tx);
    }

    state.registry.unregister(connection_id).await;
    drop(handle);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!(
            target: "room.transport",
            connection_id = %connection_id,
            "Writer did not drain in time"
        );
        writer.abort();
    }

    state.rooms.leave(&credential).await;
    debug!(target: "room.transport", connection_id = %connection_id, "Connection closed");
}
