//! The WebSocket boundary, over a real listener and through `oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::secret::SecretString;
use futures::{SinkExt, StreamExt};
use room_service::credential::{
    CredentialDecoder, CredentialResolver, CREDENTIAL_HEADER, HOST_CREDENTIAL_HEADER,
};
use room_service::fanout::{run_fanout_listener, LocalFanoutBus};
use room_service::registry::ConnectionRegistry;
use room_service::render::GaugeRenderer;
use room_service::room::{RoomService, DEFAULT_BACKEND_TIMEOUT};
use room_service::store::{MemoryRoomStore, RoomStore};
use room_service::transport::{build_router, AppState};
use room_test_utils::{TestCredential, TestRoom, TEST_CLIENT_SECRET};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VOTE_FRAME: &str = r#"{"HEADERS":{"HX-Request":"true","HX-Trigger":"vote-btn"}}"#;

fn app_state() -> (AppState, Arc<LocalFanoutBus>) {
    let bus = Arc::new(LocalFanoutBus::default());
    let rooms = RoomService::new(
        Arc::new(MemoryRoomStore::new()),
        bus.clone(),
        Arc::new(GaugeRenderer),
        DEFAULT_BACKEND_TIMEOUT,
    );
    let decoder = CredentialDecoder::new(&SecretString::from(TEST_CLIENT_SECRET)).unwrap();
    let state = AppState::new(
        rooms,
        Arc::new(ConnectionRegistry::new()),
        Arc::new(CredentialResolver::new(decoder)),
    );
    (state, bus)
}

struct Server {
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn spawn_server() -> Server {
    let (state, bus) = app_state();
    let cancel = CancellationToken::new();

    tokio::spawn(run_fanout_listener(
        bus.clone(),
        Arc::clone(&state.registry),
        cancel.clone(),
    ));
    tokio::time::timeout(Duration::from_secs(1), async {
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("listener should subscribe");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
            .unwrap();
    });

    Server {
        addr,
        state,
        cancel,
    }
}

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(CREDENTIAL_HEADER, HeaderValue::from_str(token).unwrap());
    let (client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    client
}

/// Read text frames until one contains `needle`.
async fn text_containing(client: &mut Client, needle: &str) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) if text.contains(needle) => return text,
                Some(Ok(_)) => {}
                other => panic!("connection ended early: {other:?}"),
            }
        }
    })
    .await
    .expect("expected frame should arrive")
}

/// Read until the server's close frame.
async fn close_code(client: &mut Client) -> CloseCode {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return frame.code,
                Some(Ok(_)) => {}
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("close frame should arrive")
}

#[tokio::test]
async fn test_missing_credential_is_unauthorized() {
    let (state, _bus) = app_state();
    let response = build_router(state)
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_credential_is_unauthorized() {
    let (state, _bus) = app_state();
    let token = TestCredential::new("R1", "u1").with_secret("wrong").seal();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/ws?app_context={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_credential_without_upgrade_is_not_unauthorized() {
    let (state, _bus) = app_state();
    let token = TestCredential::new("R1", "u1").seal();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/ws")
                .header(CREDENTIAL_HEADER, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_host_header_is_accepted() {
    let (state, _bus) = app_state();
    let token = TestCredential::new("R1", "u1").seal();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/ws")
                .header(HOST_CREDENTIAL_HEADER, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_host_header_connection_joins_room() {
    let server = spawn_server().await;
    let room = TestRoom::random();
    let token = TestCredential::for_participant(&room.participant("alice")).seal();

    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(HOST_CREDENTIAL_HEADER, HeaderValue::from_str(&token).unwrap());
    let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    text_containing(&mut client, "gauge-container").await;
    assert_eq!(server.state.registry.room_connection_count(&room.id).await, 1);
}

#[tokio::test]
async fn test_rejected_upgrade_never_joins() {
    let server = spawn_server().await;
    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(CREDENTIAL_HEADER, HeaderValue::from_static("not-a-credential"));

    let result = tokio_tungstenite::connect_async(request).await;

    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(e) => panic!("expected HTTP 401, got {e}"),
        Ok(_) => panic!("expected HTTP 401, connection was accepted"),
    }
    assert_eq!(server.state.registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_vote_triggers_room_for_both_connections() {
    let server = spawn_server().await;
    let room = TestRoom::random();
    let alice = TestCredential::for_participant(&room.participant("alice")).seal();
    let bob = TestCredential::for_participant(&room.participant("bob")).seal();

    let mut alice_ws = connect(server.addr, &alice).await;
    text_containing(&mut alice_ws, "gauge-container").await;
    let mut bob_ws = connect(server.addr, &bob).await;
    text_containing(&mut bob_ws, "gauge-container").await;

    alice_ws.send(Message::Text(VOTE_FRAME.to_string())).await.unwrap();

    let alice_view = text_containing(&mut alice_ws, r#"id="main-ui""#).await;
    let bob_view = text_containing(&mut bob_ws, r#"id="main-ui""#).await;
    assert_eq!(alice_view, bob_view);

    // A late joiner gets the ending view straight away
    let carol = TestCredential::for_participant(&room.participant("carol")).seal();
    let mut carol_ws = connect(server.addr, &carol).await;
    text_containing(&mut carol_ws, r#"id="main-ui""#).await;
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let server = spawn_server().await;
    let room = TestRoom::random();
    let token = TestCredential::for_participant(&room.participant("alice")).seal();

    let mut client = connect(server.addr, &token).await;
    text_containing(&mut client, "gauge-container").await;

    client
        .send(Message::Text("vote please".to_string()))
        .await
        .unwrap();

    assert_eq!(close_code(&mut client).await, CloseCode::Unsupported);

    // The leave path runs after the socket ends
    tokio::time::timeout(Duration::from_secs(2), async {
        while server.state.registry.room_connection_count(&room.id).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection should unregister");
}

#[tokio::test]
async fn test_unrelated_frames_are_ignored() {
    let server = spawn_server().await;
    let room = TestRoom::random();
    let token = TestCredential::for_participant(&room.participant("alice")).seal();

    let mut client = connect(server.addr, &token).await;
    text_containing(&mut client, "gauge-container").await;

    client
        .send(Message::Text(r#"{"type":"hello"}"#.to_string()))
        .await
        .unwrap();
    client.send(Message::Text(VOTE_FRAME.to_string())).await.unwrap();

    // Still open, and the vote after the ignored frame counts
    text_containing(&mut client, r#"id="main-ui""#).await;
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let server = spawn_server().await;
    let room = TestRoom::random();
    let token = TestCredential::for_participant(&room.participant("alice")).seal();

    let mut client = connect(server.addr, &token).await;
    text_containing(&mut client, "gauge-container").await;

    server.state.connections.close();
    server.state.connections_cancel.cancel();

    assert_eq!(close_code(&mut client).await, CloseCode::Away);
    tokio::time::timeout(Duration::from_secs(2), server.state.connections.wait())
        .await
        .expect("connection tasks should finish");

    let counts = server
        .state
        .rooms
        .store()
        .get_counts(&room.id)
        .await
        .unwrap();
    assert_eq!(counts.total, 0, "leave ran for the closed connection");
}
