//! Integration tests for the live WebSocket channel: auth close codes,
//! keepalive, presence events, and message fanout.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as TtMessage;

use harbor_server::chat::store::ConversationStore;
use harbor_server::groups::registry::GroupRegistry;
use harbor_server::presence::PresenceTracker;
use harbor_server::state::AppState;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = harbor_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = harbor_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let groups = Arc::new(GroupRegistry::new(db.clone()));
    let store = Arc::new(ConversationStore::new(db.clone()));
    let presence = Arc::new(PresenceTracker::new());
    let fanout = harbor_server::fanout::spawn_dispatcher(groups.clone(), presence.clone());

    let state = AppState {
        db,
        jwt_secret,
        groups,
        store,
        presence,
        fanout,
    };

    let app = harbor_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr)
}

/// Register a user and return (access_token, user_id).
async fn register_user(base_url: &str, username: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "username": username,
            "display_name": username,
            "password": "hunter2-hunter2",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201, "Registration failed for {}", username);
    let body: serde_json::Value = resp.json().await.unwrap();
    let token = body["access_token"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_str().unwrap().to_string();
    (token, user_id)
}

async fn connect_ws(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (stream, _resp) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket connect failed");
    stream
}

/// Read the next JSON event within the deadline, skipping control frames.
async fn next_event(ws: &mut WsStream, wait_ms: u64) -> Option<serde_json::Value> {
    let deadline = std::time::Instant::now() + Duration::from_millis(wait_ms);
    loop {
        let now = std::time::Instant::now();
        if now >= deadline {
            return None;
        }
        match timeout(deadline - now, ws.next()).await {
            Ok(Some(Ok(TtMessage::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Skip events until one with the given name arrives, or the deadline passes.
async fn wait_for_event(ws: &mut WsStream, name: &str, wait_ms: u64) -> Option<serde_json::Value> {
    let deadline = std::time::Instant::now() + Duration::from_millis(wait_ms);
    loop {
        let now = std::time::Instant::now();
        if now >= deadline {
            return None;
        }
        let remaining = (deadline - now).as_millis() as u64;
        match next_event(ws, remaining).await {
            Some(event) if event["event"] == name => return Some(event),
            Some(_) => continue,
            None => return None,
        }
    }
}

/// Assert no event with the given name arrives within the window.
async fn assert_no_event(ws: &mut WsStream, name: &str, wait_ms: u64) {
    if let Some(event) = wait_for_event(ws, name, wait_ms).await {
        panic!("Unexpected {} event: {}", name, event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let (_base_url, addr) = start_test_server().await;

    let mut ws = connect_ws(addr, "not-a-jwt").await;
    match timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(TtMessage::Close(Some(frame))))) => {
            assert_eq!(u16::from(frame.code), 4002);
        }
        other => panic!("Expected close frame with 4002, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (base_url, addr) = start_test_server().await;
    let (token, _id) = register_user(&base_url, "alice").await;

    let mut ws = connect_ws(addr, &token).await;
    ws.send(TtMessage::Ping(vec![9, 9])).await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        assert!(std::time::Instant::now() < deadline, "No pong received");
        match timeout(Duration::from_millis(500), ws.next()).await {
            Ok(Some(Ok(TtMessage::Pong(payload)))) => {
                assert_eq!(payload, vec![9u8, 9]);
                break;
            }
            Ok(Some(Ok(_))) => continue,
            other => panic!("Unexpected frame while waiting for pong: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_online_snapshot_and_presence_transitions() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, id_a) = register_user(&base_url, "alice").await;
    let (token_b, id_b) = register_user(&base_url, "bob").await;

    let mut ws_a = connect_ws(addr, &token_a).await;

    // Connect-time snapshot contains the connecting user themselves
    let snapshot = wait_for_event(&mut ws_a, "onlineUsers", 2000)
        .await
        .expect("No onlineUsers snapshot");
    let ids: Vec<&str> = snapshot["data"]["user_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(ids.contains(&id_a.as_str()));

    // B comes online: A is told, and B's own snapshot shows both users
    let mut ws_b = connect_ws(addr, &token_b).await;

    let event = wait_for_event(&mut ws_a, "presenceChanged", 2000)
        .await
        .expect("No presenceChanged for B coming online");
    assert_eq!(event["data"]["user_id"].as_str().unwrap(), id_b);
    assert!(event["data"]["online"].as_bool().unwrap());

    let snapshot = wait_for_event(&mut ws_b, "onlineUsers", 2000)
        .await
        .expect("No onlineUsers snapshot for B");
    let ids: Vec<&str> = snapshot["data"]["user_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(ids.contains(&id_a.as_str()));
    assert!(ids.contains(&id_b.as_str()));

    // B disconnects: A gets the offline transition
    ws_b.close(None).await.unwrap();

    let event = wait_for_event(&mut ws_a, "presenceChanged", 2000)
        .await
        .expect("No presenceChanged for B going offline");
    assert_eq!(event["data"]["user_id"].as_str().unwrap(), id_b);
    assert!(!event["data"]["online"].as_bool().unwrap());
}

#[tokio::test]
async fn test_second_device_does_not_retransition_presence() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "alice").await;
    let (token_b, id_b) = register_user(&base_url, "bob").await;

    let mut ws_a = connect_ws(addr, &token_a).await;
    let mut ws_b1 = connect_ws(addr, &token_b).await;
    wait_for_event(&mut ws_a, "presenceChanged", 2000)
        .await
        .expect("No presenceChanged for B's first device");

    // Second device: no new online transition
    let mut ws_b2 = connect_ws(addr, &token_b).await;
    let _ = wait_for_event(&mut ws_b2, "onlineUsers", 2000).await;
    assert_no_event(&mut ws_a, "presenceChanged", 500).await;

    // Dropping one device keeps B online
    ws_b2.close(None).await.unwrap();
    assert_no_event(&mut ws_a, "presenceChanged", 500).await;

    // Last device going away is the offline transition
    ws_b1.close(None).await.unwrap();
    let event = wait_for_event(&mut ws_a, "presenceChanged", 2000)
        .await
        .expect("No presenceChanged for B's last device");
    assert_eq!(event["data"]["user_id"].as_str().unwrap(), id_b);
    assert!(!event["data"]["online"].as_bool().unwrap());
}

#[tokio::test]
async fn test_direct_message_pushed_to_recipient_not_sender() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, id_a) = register_user(&base_url, "alice").await;
    let (token_b, id_b) = register_user(&base_url, "bob").await;

    let mut ws_a = connect_ws(addr, &token_a).await;
    let mut ws_b = connect_ws(addr, &token_b).await;
    let _ = wait_for_event(&mut ws_a, "onlineUsers", 2000).await;
    let _ = wait_for_event(&mut ws_b, "onlineUsers", 2000).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages/{}", base_url, id_b))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "text": "hello over the wire" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let event = wait_for_event(&mut ws_b, "newMessage", 2000)
        .await
        .expect("Recipient did not get the push");
    assert_eq!(event["data"]["sender_id"].as_str().unwrap(), id_a);
    assert_eq!(event["data"]["recipient_id"].as_str().unwrap(), id_b);
    assert_eq!(event["data"]["text"].as_str().unwrap(), "hello over the wire");

    // The sender's own live connection gets no echo
    assert_no_event(&mut ws_a, "newMessage", 500).await;
}

#[tokio::test]
async fn test_group_fanout_reaches_members_except_sender() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "alice").await;
    let (token_b, id_b) = register_user(&base_url, "bob").await;
    let (token_c, id_c) = register_user(&base_url, "carol").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/groups", base_url))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "name": "crew", "member_ids": [id_b, id_c] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let group: serde_json::Value = resp.json().await.unwrap();
    let group_id = group["id"].as_str().unwrap();

    let mut ws_a = connect_ws(addr, &token_a).await;
    let mut ws_b = connect_ws(addr, &token_b).await;
    let mut ws_c = connect_ws(addr, &token_c).await;
    let _ = wait_for_event(&mut ws_a, "onlineUsers", 2000).await;
    let _ = wait_for_event(&mut ws_b, "onlineUsers", 2000).await;
    let _ = wait_for_event(&mut ws_c, "onlineUsers", 2000).await;

    let resp = client
        .post(format!("{}/api/groups/{}/messages", base_url, group_id))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "text": "standup in five" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Exactly one push per online member other than the sender
    for ws in [&mut ws_b, &mut ws_c] {
        let event = wait_for_event(ws, "newGroupMessage", 2000)
            .await
            .expect("Member did not get the group push");
        assert_eq!(event["data"]["group_id"].as_str().unwrap(), group_id);
        assert_eq!(event["data"]["text"].as_str().unwrap(), "standup in five");
        assert!(event["data"]["is_group"].as_bool().unwrap());

        assert_no_event(ws, "newGroupMessage", 300).await;
    }

    // The sender hears nothing
    assert_no_event(&mut ws_a, "newGroupMessage", 500).await;
}

#[tokio::test]
async fn test_removed_member_gets_no_further_pushes() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "alice").await;
    let (token_b, id_b) = register_user(&base_url, "bob").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/groups", base_url))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "name": "crew", "member_ids": [id_b] }))
        .send()
        .await
        .unwrap();
    let group: serde_json::Value = resp.json().await.unwrap();
    let group_id = group["id"].as_str().unwrap();

    let mut ws_b = connect_ws(addr, &token_b).await;
    let _ = wait_for_event(&mut ws_b, "onlineUsers", 2000).await;

    // Sanity: B receives pushes while a member
    let resp = client
        .post(format!("{}/api/groups/{}/messages", base_url, group_id))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "text": "before" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    wait_for_event(&mut ws_b, "newGroupMessage", 2000)
        .await
        .expect("Member did not get the group push");

    // Membership is read at dispatch time, so removal takes effect immediately
    let resp = client
        .delete(format!(
            "{}/api/groups/{}/members/{}",
            base_url, group_id, id_b
        ))
        .header("Authorization", format!("Bearer {}", token_a))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/groups/{}/messages", base_url, group_id))
        .header("Authorization", format!("Bearer {}", token_a))
        .json(&json!({ "text": "after" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    assert_no_event(&mut ws_b, "newGroupMessage", 500).await;
}
