//! Integration tests for WebSocket identity, presence transitions, and
//! message delivery over the live connection.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Helper: start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = pulse_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = pulse_server::state::AppState::new(db);
    let app = pulse_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr)
}

/// Provision a user through the REST seam and return its id.
async fn create_user(base_url: &str, display_name: &str) -> i64 {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/users", base_url))
        .json(&json!({ "display_name": display_name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "User creation failed for {}", display_name);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn connect_ws(addr: SocketAddr, user_id: i64) -> WsStream {
    let url = format!("ws://{}/ws?user_id={}", addr, user_id);
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    stream
}

async fn send_event(ws: &mut WsStream, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(frame.into())).await.expect("WS send failed");
}

/// Read frames until one carries the named event; panic on timeout.
async fn next_event(ws: &mut WsStream, event: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "timed out waiting for {} event", event);
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                if frame["event"] == event {
                    return frame["data"].clone();
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => panic!("connection ended while waiting for {} event", event),
        }
    }
}

/// Assert the named event does not arrive within 500ms.
async fn assert_no_event(ws: &mut WsStream, event: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(frame["event"], event, "unexpected {} event: {}", event, frame);
            }
            Ok(Some(Ok(_))) => continue,
            _ => return,
        }
    }
}

/// Expect the next frame to be a Close with the given code.
async fn expect_close_code(ws: &mut WsStream, code: u16) {
    match timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Close(Some(frame))))) => {
            assert_eq!(u16::from(frame.code), code);
        }
        other => panic!("expected close frame with code {}, got {:?}", code, other),
    }
}

#[tokio::test]
async fn connection_with_known_identity_receives_online_snapshot() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;

    let mut ws = connect_ws(addr, alice).await;
    let online = next_event(&mut ws, "onlineUsers").await;
    assert!(online.as_array().unwrap().contains(&json!(alice)));
}

#[tokio::test]
async fn missing_identity_is_closed_with_4001() {
    let (_base_url, addr) = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    expect_close_code(&mut ws, 4001).await;
}

#[tokio::test]
async fn malformed_identity_is_closed_with_4002() {
    let (_base_url, addr) = start_test_server().await;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws?user_id=not-a-number", addr))
            .await
            .unwrap();
    expect_close_code(&mut ws, 4002).await;
}

#[tokio::test]
async fn unknown_user_is_closed_with_4004() {
    let (_base_url, addr) = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?user_id=9999", addr))
        .await
        .unwrap();
    expect_close_code(&mut ws, 4004).await;
}

#[tokio::test]
async fn presence_transitions_are_broadcast_with_last_seen() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    next_event(&mut alice_ws, "onlineUsers").await;

    let bob_ws = connect_ws(addr, bob).await;
    let status = next_event(&mut alice_ws, "userStatusChanged").await;
    assert_eq!(status["userId"], json!(bob));
    assert_eq!(status["isOnline"], json!(true));

    // While online, last-seen is null
    let client = reqwest::Client::new();
    let resp: Value = client
        .get(format!("{}/api/presence/last-seen/{}", base_url, bob))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["is_online"], json!(true));
    assert!(resp["last_seen"].is_null());

    drop(bob_ws);

    let status = next_event(&mut alice_ws, "userStatusChanged").await;
    assert_eq!(status["userId"], json!(bob));
    assert_eq!(status["isOnline"], json!(false));
    assert!(status["lastSeen"].is_string());

    let resp: Value = client
        .get(format!("{}/api/presence/last-seen/{}", base_url, bob))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["is_online"], json!(false));
    assert!(resp["last_seen"].is_string());
}

#[tokio::test]
async fn second_device_does_not_flap_presence() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    next_event(&mut alice_ws, "onlineUsers").await;

    let first_device = connect_ws(addr, bob).await;
    next_event(&mut alice_ws, "userStatusChanged").await;

    // A second connection for the same user is not a new online transition
    let second_device = connect_ws(addr, bob).await;
    assert_no_event(&mut alice_ws, "userStatusChanged").await;

    // Dropping one of two devices is not an offline transition either
    drop(first_device);
    assert_no_event(&mut alice_ws, "userStatusChanged").await;

    drop(second_device);
    let status = next_event(&mut alice_ws, "userStatusChanged").await;
    assert_eq!(status["isOnline"], json!(false));
}

#[tokio::test]
async fn send_message_reaches_both_parties_and_acks_the_sender() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    next_event(&mut bob_ws, "onlineUsers").await;

    send_event(
        &mut alice_ws,
        "sendMessage",
        json!({ "senderId": alice, "receiverId": bob, "content": "hi" }),
    )
    .await;

    let received = next_event(&mut bob_ws, "newMessage").await;
    assert_eq!(received["senderId"], json!(alice));
    assert_eq!(received["content"], json!("hi"));

    // The sender's own connections stay in sync, then the invoking one is acked
    let echoed = next_event(&mut alice_ws, "newMessage").await;
    assert_eq!(echoed["id"], received["id"]);

    let ack = next_event(&mut alice_ws, "messageSent").await;
    assert_eq!(ack["content"], json!("hi"));
    assert_eq!(ack["isRead"], json!(false));
}

#[tokio::test]
async fn send_message_with_foreign_sender_identity_is_rejected() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;

    send_event(
        &mut alice_ws,
        "sendMessage",
        json!({ "senderId": bob, "receiverId": alice, "content": "spoofed" }),
    )
    .await;

    let err = next_event(&mut alice_ws, "error").await;
    assert_eq!(err["code"], json!(400));
}

#[tokio::test]
async fn mark_as_read_must_come_from_the_reader() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;

    // alice cannot assert bob's reads
    send_event(
        &mut alice_ws,
        "markAsRead",
        json!({ "fromUserId": alice, "toUserId": bob }),
    )
    .await;
    let err = next_event(&mut alice_ws, "error").await;
    assert_eq!(err["code"], json!(400));
}
