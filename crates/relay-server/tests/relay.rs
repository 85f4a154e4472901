//! End-to-end tests: real WebSocket clients against the relay router with
//! in-memory upstream services.

use async_trait::async_trait;
use dirc_relay::{build_router, AppState, Config};
use dirc_relay_core::{Authenticator, ChatDirectory, ChatInfo, ServiceError};
use dirc_relay_protocol::{ClientEvent, RelayEvent};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accepts a token only if it is `{username}-token`.
struct TokenAuth;

#[async_trait]
impl Authenticator for TokenAuth {
    async fn authorize(&self, username: &str, token: &str) -> Result<(), ServiceError> {
        if token == format!("{username}-token") {
            Ok(())
        } else {
            Err(ServiceError::Rejected(401))
        }
    }
}

/// alice belongs to `c1`; every side effect is recorded.
#[derive(Default)]
struct Chats {
    calls: Mutex<Vec<String>>,
}

impl Chats {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for Chats {
    async fn my_chats(&self, token: &str) -> Result<Vec<ChatInfo>, ServiceError> {
        if token == "alice-token" {
            Ok(vec![ChatInfo::new("c1", "General")])
        } else {
            Ok(Vec::new())
        }
    }

    async fn send_message(
        &self,
        token: &str,
        chat: &str,
        content: &str,
    ) -> Result<(), ServiceError> {
        self.record(format!("send {token} {chat} {content}"))
    }

    async fn record_join(&self, token: &str, chat: &str) -> Result<(), ServiceError> {
        self.record(format!("join {token} {chat}"))
    }

    async fn record_leave(&self, token: &str, chat: &str) -> Result<(), ServiceError> {
        self.record(format!("leave {token} {chat}"))
    }
}

struct TestRelay {
    addr: SocketAddr,
    state: Arc<AppState>,
    chats: Arc<Chats>,
}

impl TestRelay {
    async fn start() -> Self {
        Self::start_with(Config::default()).await
    }

    async fn start_with(config: Config) -> Self {
        let chats = Arc::new(Chats::default());
        let state = Arc::new(AppState::with_services(
            config,
            Arc::new(TokenAuth),
            chats.clone(),
        ));

        let app = build_router(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, chats }
    }

    async fn connect_raw(&self, query: &str) -> Client {
        let url = format!("ws://{}/connect?{}", self.addr, query);
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Failed to connect");
        ws
    }

    /// Connect and wait until the relay has admitted the user.
    async fn connect(&self, username: &str) -> Client {
        let before = self
            .state
            .hub
            .registry()
            .lookup(username)
            .map(|handle| handle.id());

        let ws = self
            .connect_raw(&format!("username={username}&access_token={username}-token"))
            .await;

        let hub = Arc::clone(&self.state.hub);
        let username = username.to_string();
        wait_until(move || {
            hub.registry()
                .lookup(&username)
                .is_some_and(|handle| Some(handle.id()) != before)
        })
        .await;
        ws
    }

    async fn get_json(&self, path: &str) -> serde_json::Value {
        let response = reqwest::get(format!("http://{}{}", self.addr, path))
            .await
            .expect("Request failed");
        assert!(response.status().is_success());
        response.json().await.expect("Invalid JSON body")
    }

    async fn wait_for_calls(&self, expected: usize) -> Vec<String> {
        let chats = self.chats.clone();
        wait_until(move || chats.calls().len() >= expected).await;
        self.chats.calls()
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

async fn send(ws: &mut Client, event: &ClientEvent) {
    let text = serde_json::to_string(event).unwrap();
    ws.send(Message::Text(text)).await.unwrap();
}

/// Wait for the next relay event, skipping control frames.
async fn next_event(ws: &mut Client) -> RelayEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {other:?}"),
        }
    }
}

/// Assert that nothing arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("Expected no frame, got {other:?}"),
    }
}

/// Wait for the close frame and return its code and reason.
async fn next_close(ws: &mut Client) -> (u16, String) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Close(frame) = msg {
            let frame = frame.expect("Close frame without code");
            return (u16::from(frame.code), frame.reason.to_string());
        }
    }
}

#[tokio::test]
async fn test_join_message_and_disconnect() {
    let relay = TestRelay::start().await;

    let mut alice = relay.connect("alice").await;
    let mut bob = relay.connect("bob").await;
    assert_eq!(relay.state.hub.members("c1"), vec!["alice".to_string()]);

    // bob joins c1: both members see it
    send(&mut bob, &ClientEvent::join("c1")).await;
    for ws in [&mut alice, &mut bob] {
        let event = next_event(ws).await;
        assert!(matches!(
            &event,
            RelayEvent::Join { chat, sender, .. } if chat == "c1" && sender == "bob"
        ));
    }

    // bob posts: both members receive it with bob as sender
    send(&mut bob, &ClientEvent::message("c1", "hi")).await;
    for ws in [&mut alice, &mut bob] {
        let event = next_event(ws).await;
        match event {
            RelayEvent::Message {
                chat,
                content,
                sender,
                timestamp,
            } => {
                assert_eq!(chat, "c1");
                assert_eq!(content, "hi");
                assert_eq!(sender, "bob");
                assert!(timestamp > 0.0);
            }
            other => panic!("Expected message, got {other:?}"),
        }
    }

    let calls = relay.wait_for_calls(2).await;
    assert!(calls.contains(&"join bob-token c1".to_string()));
    assert!(calls.contains(&"send bob-token c1 hi".to_string()));

    // alice drops: her state is torn down and only bob hears the next message
    alice.close(None).await.unwrap();
    let hub = Arc::clone(&relay.state.hub);
    wait_until(move || hub.registry().lookup("alice").is_none()).await;
    assert_eq!(relay.state.hub.members("c1"), vec!["bob".to_string()]);

    send(&mut bob, &ClientEvent::message("c1", "still here?")).await;
    let event = next_event(&mut bob).await;
    assert!(matches!(event, RelayEvent::Message { content, .. } if content == "still here?"));

    // No LEAVE is synthesized for an involuntary disconnect
    let calls = relay.wait_for_calls(3).await;
    assert!(!calls.iter().any(|c| c.starts_with("leave")));
}

#[tokio::test]
async fn test_leave_is_seen_by_leaver() {
    let relay = TestRelay::start().await;

    let mut alice = relay.connect("alice").await;
    send(&mut alice, &ClientEvent::leave("c1")).await;

    let event = next_event(&mut alice).await;
    assert!(matches!(
        event,
        RelayEvent::Leave { chat, sender, .. } if chat == "c1" && sender == "alice"
    ));
    assert!(!relay.state.hub.memberships().exists("c1"));

    let calls = relay.wait_for_calls(1).await;
    assert_eq!(calls, vec!["leave alice-token c1".to_string()]);
}

#[tokio::test]
async fn test_missing_token_is_refused() {
    let relay = TestRelay::start().await;

    let mut ws = relay.connect_raw("username=mallory").await;
    let (code, reason) = next_close(&mut ws).await;

    assert_eq!(code, 1008);
    assert_eq!(reason, "access_token parameter is required");
    assert!(relay.state.hub.registry().is_empty());
    assert!(relay.chats.calls().is_empty());
}

#[tokio::test]
async fn test_missing_username_is_refused() {
    let relay = TestRelay::start().await;

    let mut ws = relay.connect_raw("access_token=whatever").await;
    let (code, reason) = next_close(&mut ws).await;

    assert_eq!(code, 1008);
    assert_eq!(reason, "username parameter is required");
}

#[tokio::test]
async fn test_bad_token_is_refused() {
    let relay = TestRelay::start().await;

    let mut ws = relay
        .connect_raw("username=alice&access_token=bob-token")
        .await;
    let (code, reason) = next_close(&mut ws).await;

    assert_eq!(code, 1008);
    assert_eq!(reason, "failed to authenticate");
    assert!(relay.state.hub.registry().is_empty());
    assert!(!relay.state.hub.memberships().exists("c1"));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let relay = TestRelay::start().await;

    let mut alice = relay.connect("alice").await;
    alice
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    alice
        .send(Message::Text(r#"{"action":"SHOUT","payload":{}}"#.to_string()))
        .await
        .unwrap();
    assert_silent(&mut alice).await;

    send(&mut alice, &ClientEvent::message("c1", "ok")).await;
    let event = next_event(&mut alice).await;
    assert!(matches!(event, RelayEvent::Message { content, .. } if content == "ok"));
}

#[tokio::test]
async fn test_reconnect_supersedes_old_connection() {
    let relay = TestRelay::start().await;

    let mut first = relay.connect("alice").await;
    let mut second = relay.connect("alice").await;

    let (code, _) = next_close(&mut first).await;
    assert_eq!(code, 1008);

    // The old connection's teardown must not touch the new one
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.state.hub.registry().len(), 1);
    assert_eq!(relay.state.hub.members("c1"), vec!["alice".to_string()]);

    send(&mut second, &ClientEvent::message("c1", "again")).await;
    let event = next_event(&mut second).await;
    assert!(matches!(event, RelayEvent::Message { content, .. } if content == "again"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let relay = TestRelay::start().await;

    let body = relay.get_json("/health").await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let relay = TestRelay::start().await;

    let body = relay.get_json("/stats").await;
    assert_eq!(body["connections"], 0);
    assert_eq!(body["side_effects"]["dispatched"], 0);

    let mut alice = relay.connect("alice").await;
    send(&mut alice, &ClientEvent::message("c1", "hi")).await;
    next_event(&mut alice).await;
    relay.wait_for_calls(1).await;

    let body = relay.get_json("/stats").await;
    assert_eq!(body["connections"], 1);
    assert_eq!(body["chats"], 1);
    assert_eq!(body["memberships"], 1);
    assert_eq!(body["side_effects"]["dispatched"], 1);
    assert_eq!(body["side_effects"]["failed"], 0);
}

#[tokio::test]
async fn test_capacity_refuses_new_users_but_not_reconnects() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let relay = TestRelay::start_with(config).await;

    let mut alice = relay.connect("alice").await;

    let mut bob = relay
        .connect_raw("username=bob&access_token=bob-token")
        .await;
    let (code, reason) = next_close(&mut bob).await;
    assert_eq!(code, 1013);
    assert_eq!(reason, "server is at capacity");
    assert!(relay.state.hub.registry().lookup("bob").is_none());

    // Replacing alice's connection does not need a free slot.
    let mut again = relay.connect("alice").await;
    let (code, _) = next_close(&mut alice).await;
    assert_eq!(code, 1008);
    assert_eq!(relay.state.hub.registry().len(), 1);

    send(&mut again, &ClientEvent::message("c1", "back")).await;
    let event = next_event(&mut again).await;
    assert!(matches!(event, RelayEvent::Message { content, .. } if content == "back"));
}
