//! Integration tests for the call lifecycle (start / accept / end, busy and
//! offline branches, implicit termination on disconnect) and the WebRTC
//! negotiation relay.

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

/// Terminal summaries are persisted off the hot path, so poll history until
/// the `call` message shows up.
async fn wait_for_call_message(base_url: &str, user: i64, other: i64) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let page: Value = reqwest::Client::new()
            .get(format!(
                "{}/api/messages?user_id={}&other_id={}",
                base_url, user, other
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(msg) = page
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["messageType"] == json!("call"))
        {
            return msg.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "call summary message never appeared"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn full_call_lifecycle_ends_with_role_tagged_events_and_a_summary() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    next_event(&mut bob_ws, "onlineUsers").await;

    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "audio" }),
    )
    .await;

    let ringing = next_event(&mut bob_ws, "incoming-call").await;
    let call_id = ringing["callId"].as_i64().unwrap();
    assert_eq!(ringing["callerId"], json!(alice));
    assert_eq!(ringing["callType"], json!("audio"));
    let started = next_event(&mut alice_ws, "call-started").await;
    assert_eq!(started["callId"], json!(call_id));

    send_event(&mut bob_ws, "accept-call", json!({ "callId": call_id })).await;
    let accepted = next_event(&mut alice_ws, "receiver-accepted").await;
    assert_eq!(accepted["callType"], json!("audio"));
    next_event(&mut bob_ws, "call-started").await;

    send_event(
        &mut alice_ws,
        "end-call",
        json!({ "callId": call_id, "status": "ended" }),
    )
    .await;

    let for_caller = next_event(&mut alice_ws, "call-ended").await;
    assert_eq!(for_caller["status"], json!("ended"));
    assert_eq!(for_caller["role"], json!("caller"));
    let for_receiver = next_event(&mut bob_ws, "call-ended").await;
    assert_eq!(for_receiver["role"], json!("receiver"));
    assert!(for_receiver["summary"]
        .as_str()
        .unwrap()
        .starts_with("Audio call ended. Duration:"));

    // The second leg's end signal after the call is gone is a quiet no-op
    send_event(
        &mut bob_ws,
        "end-call",
        json!({ "callId": call_id, "status": "ended" }),
    )
    .await;
    assert_no_event(&mut bob_ws, "error").await;
    assert_no_event(&mut bob_ws, "call-ended").await;

    let summary = wait_for_call_message(&base_url, alice, bob).await;
    assert!(summary["content"]
        .as_str()
        .unwrap()
        .contains("Duration:"));
}

#[tokio::test]
async fn calling_a_busy_receiver_ends_immediately_without_ringing() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;
    let carol = create_user(&base_url, "carol").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    let mut carol_ws = connect_ws(addr, carol).await;
    next_event(&mut carol_ws, "onlineUsers").await;

    // alice and bob get on a call
    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "video" }),
    )
    .await;
    let ringing = next_event(&mut bob_ws, "incoming-call").await;
    let call_id = ringing["callId"].as_i64().unwrap();
    send_event(&mut bob_ws, "accept-call", json!({ "callId": call_id })).await;
    next_event(&mut alice_ws, "receiver-accepted").await;

    // A ring toward the busy receiver terminates at the caller
    send_event(
        &mut carol_ws,
        "start-call",
        json!({ "callerId": carol, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    let busy = next_event(&mut carol_ws, "call-ended").await;
    assert_eq!(busy["status"], json!("busy"));
    assert_eq!(busy["role"], json!("caller"));
    assert_no_event(&mut bob_ws, "incoming-call").await;

    // The rejected attempt still leaves a summary in carol's thread with bob
    let summary = wait_for_call_message(&base_url, carol, bob).await;
    assert_eq!(summary["senderId"], json!(carol));
}

#[tokio::test]
async fn ringing_receiver_is_not_busy() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;
    let carol = create_user(&base_url, "carol").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    let mut carol_ws = connect_ws(addr, carol).await;
    next_event(&mut carol_ws, "onlineUsers").await;

    // alice rings bob but bob has not accepted
    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    next_event(&mut bob_ws, "incoming-call").await;

    // carol's ring still reaches bob
    send_event(
        &mut carol_ws,
        "start-call",
        json!({ "callerId": carol, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    let second = next_event(&mut bob_ws, "incoming-call").await;
    assert_eq!(second["callerId"], json!(carol));
}

#[tokio::test]
async fn calling_an_offline_receiver_reports_user_not_online() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    next_event(&mut alice_ws, "onlineUsers").await;

    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    let missed = next_event(&mut alice_ws, "user-not-online").await;
    let call_id = missed["callId"].as_i64().unwrap();
    assert_eq!(missed["receiverId"], json!(bob));

    // No session was kept, so accepting the dead call is an unknown call
    send_event(&mut alice_ws, "accept-call", json!({ "callId": call_id })).await;
    let err = next_event(&mut alice_ws, "error").await;
    assert_eq!(err["code"], json!(404));
}

#[tokio::test]
async fn self_calls_and_spoofed_callers_are_rejected() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    let mut alice_ws = connect_ws(addr, alice).await;

    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": alice, "callType": "audio" }),
    )
    .await;
    let err = next_event(&mut alice_ws, "error").await;
    assert_eq!(err["code"], json!(400));

    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": bob, "receiverId": alice, "callType": "audio" }),
    )
    .await;
    let err = next_event(&mut alice_ws, "error").await;
    assert_eq!(err["code"], json!(400));
}

#[tokio::test]
async fn disconnect_terminates_calls_by_acceptance_state() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;

    // Accepted call: the survivor sees `ended`
    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    next_event(&mut bob_ws, "onlineUsers").await;

    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    let ringing = next_event(&mut bob_ws, "incoming-call").await;
    let call_id = ringing["callId"].as_i64().unwrap();
    send_event(&mut bob_ws, "accept-call", json!({ "callId": call_id })).await;
    next_event(&mut alice_ws, "receiver-accepted").await;

    drop(bob_ws);
    let ended = next_event(&mut alice_ws, "call-ended").await;
    assert_eq!(ended["status"], json!("ended"));

    // Ringing call: the caller sees `cancelled` when the receiver drops
    let mut bob_ws = connect_ws(addr, bob).await;
    next_event(&mut alice_ws, "userStatusChanged").await;
    send_event(
        &mut alice_ws,
        "start-call",
        json!({ "callerId": alice, "receiverId": bob, "callType": "audio" }),
    )
    .await;
    next_event(&mut bob_ws, "incoming-call").await;

    drop(bob_ws);
    let cancelled = next_event(&mut alice_ws, "call-ended").await;
    assert_eq!(cancelled["status"], json!("cancelled"));
}

#[tokio::test]
async fn negotiation_events_are_relayed_with_sender_identity() {
    let (base_url, addr) = start_test_server().await;
    let alice = create_user(&base_url, "alice").await;
    let bob = create_user(&base_url, "bob").await;
    let carol = create_user(&base_url, "carol").await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    next_event(&mut bob_ws, "onlineUsers").await;

    send_event(
        &mut alice_ws,
        "offer",
        json!({ "targetUserId": bob, "offer": { "sdp": "v=0", "type": "offer" }, "callId": 7 }),
    )
    .await;
    let offer = next_event(&mut bob_ws, "offer").await;
    assert_eq!(offer["from"], json!(alice));
    assert_eq!(offer["offer"]["sdp"], json!("v=0"));
    assert_eq!(offer["callId"], json!(7));

    send_event(
        &mut bob_ws,
        "answer",
        json!({ "targetUserId": alice, "answer": { "sdp": "v=0", "type": "answer" } }),
    )
    .await;
    let answer = next_event(&mut alice_ws, "answer").await;
    assert_eq!(answer["from"], json!(bob));

    send_event(
        &mut alice_ws,
        "ice-candidate",
        json!({ "targetUserId": bob, "candidate": { "candidate": "cand", "sdpMid": "0" } }),
    )
    .await;
    let candidate = next_event(&mut bob_ws, "ice-candidate").await;
    assert_eq!(candidate["from"], json!(alice));

    // Relay toward an offline user is dropped silently
    send_event(
        &mut alice_ws,
        "offer",
        json!({ "targetUserId": carol, "offer": { "sdp": "v=0", "type": "offer" } }),
    )
    .await;
    assert_no_event(&mut alice_ws, "error").await;
}
