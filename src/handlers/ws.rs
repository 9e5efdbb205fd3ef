use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::models::ErrorResponse;
use crate::state::AppState;
use crate::ws::session::{Session, MAX_MESSAGE_SIZE};

/// WebSocket handler for `/ws/:room_id`
pub async fn ws_handler(
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    if room_id.is_empty() {
        let status = StatusCode::BAD_REQUEST;
        return (status, Json(ErrorResponse::new(status, "Room ID cannot be empty")))
            .into_response();
    }

    info!("New WebSocket connection attempt for room {}", room_id);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

/// Load the room's current content and hand the socket to a session
async fn handle_socket(socket: WebSocket, room_id: String, state: Arc<AppState>) {
    let initial = match state.gateway.read(&room_id).await {
        Ok(content) => Some(content),
        Err(e) => {
            error!("Could not fetch initial data for room {}: {}", room_id, e);
            None
        }
    };

    Session::new(room_id, state.registry.clone(), state.relay.clone())
        .run(socket, state.session_queue_capacity, initial)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCache;
    use crate::config::Config;
    use crate::db::{ContentStore, MemoryClipStore};
    use crate::routes::create_router;
    use crate::state::Backends;
    use crate::ws::relay::LocalBus;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server() -> (SocketAddr, Arc<AppState>, Arc<MemoryClipStore>) {
        start_server_with(Config::default()).await
    }

    async fn start_server_with(
        config: Config,
    ) -> (SocketAddr, Arc<AppState>, Arc<MemoryClipStore>) {
        let store = Arc::new(MemoryClipStore::new());
        let backends = Backends {
            store: store.clone(),
            cache: Arc::new(MokaCache::new(config.cache_ttl())),
            bus: Arc::new(LocalBus::new(64)),
        };
        let state = AppState::start(backends, &config);
        let app = create_router(state.clone(), &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state, store)
    }

    async fn connect(addr: SocketAddr, room_id: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws/{}", addr, room_id))
            .await
            .unwrap();
        client
    }

    async fn next_text(client: &mut Client) -> String {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            if let WsMessage::Text(text) = message {
                return text.to_string();
            }
        }
    }

    /// Read until the server ends the connection
    async fn wait_for_close(client: &mut Client) {
        let closed = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match client.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "server never closed the connection");
    }

    async fn wait_for_sessions(state: &AppState, expected: usize) {
        for _ in 0..100 {
            if state.registry.stats().await.map(|s| s.sessions) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {} sessions", expected);
    }

    async fn wait_for_record(state: &AppState, store: &MemoryClipStore, expected: Option<&str>) {
        for _ in 0..100 {
            state.persistence.flush_now().await;
            if store.fetch("abc").await.unwrap().as_deref() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("durable record never became {:?}", expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn room_lifecycle_end_to_end() {
        let (addr, state, store) = start_server().await;

        // Fresh room: the initial push is empty
        let mut alice = connect(addr, "abc").await;
        assert_eq!(next_text(&mut alice).await, "");
        let mut bob = connect(addr, "abc").await;
        assert_eq!(next_text(&mut bob).await, "");
        wait_for_sessions(&state, 2).await;

        // Raw text is broadcast verbatim and queued for the next flush
        alice.send(WsMessage::Text("hello".into())).await.unwrap();
        assert_eq!(next_text(&mut bob).await, "hello");
        wait_for_record(&state, &store, Some("hello")).await;

        // A late joiner starts from the stored content
        let mut carol = connect(addr, "abc").await;
        assert_eq!(next_text(&mut carol).await, "hello");
        wait_for_sessions(&state, 3).await;

        // CLEAR deletes right away and a following flush does not bring it back
        alice
            .send(WsMessage::Text(
                r#"{"room_id":"abc","content":"","action":"CLEAR"}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(next_text(&mut bob).await, "");
        assert_eq!(next_text(&mut carol).await, "");
        wait_for_record(&state, &store, None).await;
        assert_eq!(state.persistence.flush_now().await, Some(0));
        assert_eq!(store.fetch("abc").await.unwrap(), None);

        // Leaving is reflected in the registry
        alice.close(None).await.unwrap();
        wait_for_sessions(&state, 2).await;
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let (addr, state, _store) = start_server().await;

        let mut one = connect(addr, "one").await;
        assert_eq!(next_text(&mut one).await, "");
        let mut two = connect(addr, "two").await;
        assert_eq!(next_text(&mut two).await, "");
        let mut one_peer = connect(addr, "one").await;
        assert_eq!(next_text(&mut one_peer).await, "");
        wait_for_sessions(&state, 3).await;

        one.send(WsMessage::Text("for room one".into())).await.unwrap();
        assert_eq!(next_text(&mut one_peer).await, "for room one");

        let stray = tokio::time::timeout(Duration::from_millis(200), two.next()).await;
        assert!(stray.is_err(), "room two should not see room one's traffic");
    }

    #[tokio::test]
    async fn oversized_frame_drops_the_session() {
        let (addr, state, store) = start_server().await;
        let mut client = connect(addr, "abc").await;
        assert_eq!(next_text(&mut client).await, "");
        wait_for_sessions(&state, 1).await;

        let frame = "x".repeat(MAX_MESSAGE_SIZE + 1);
        // The server may already be gone by the time the send completes
        let _ = client.send(WsMessage::Text(frame.into())).await;

        wait_for_close(&mut client).await;
        wait_for_sessions(&state, 0).await;
        assert_eq!(state.persistence.flush_now().await, Some(0));
        assert_eq!(store.fetch("abc").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_reader_is_disconnected() {
        let config = Config {
            session_queue_capacity: 1,
            ..Config::default()
        };
        let (addr, state, _store) = start_server_with(config).await;

        // Joins and then stops reading
        let mut slow = connect(addr, "abc").await;
        assert_eq!(next_text(&mut slow).await, "");
        let mut writer = connect(addr, "abc").await;
        assert_eq!(next_text(&mut writer).await, "");
        wait_for_sessions(&state, 2).await;

        // Large edits fill the socket buffers, then the slow session's queue
        let chunk = "y".repeat(40 * 1024);
        let mut dropped = false;
        for sent in 1..=4000 {
            writer.send(WsMessage::Text(chunk.clone().into())).await.unwrap();
            if sent % 10 == 0 && state.registry.stats().await.map(|s| s.sessions) == Some(1) {
                dropped = true;
                break;
            }
        }
        assert!(dropped, "slow session was never removed from the room");

        // Draining what was buffered ends in the server closing the socket
        wait_for_close(&mut slow).await;
        wait_for_sessions(&state, 1).await;
    }
}
