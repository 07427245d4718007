use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parlor_chat::Hub;
use parlor_db::Database;
use parlor_server::{AppState, build_router};
use parlor_types::api::Claims;
use parlor_types::models::Role;

const SECRET: &str = "integration-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let app = build_router(AppState {
        db: db.clone(),
        hub: Hub::new(),
        jwt_secret: SECRET.into(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, db)
}

fn token(sub: i64, username: &str, role: Role) -> String {
    let claims = Claims {
        sub,
        username: username.to_string(),
        role,
        display_name: username.to_uppercase(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> Client {
    let url = match token {
        Some(t) => format!("ws://{addr}/gateway?token={t}"),
        None => format!("ws://{addr}/gateway"),
    };
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Skip frames until one of the given type arrives. Broadcast and reply
/// frames interleave on a live connection, so tests select what they need.
async fn frame_of_type(client: &mut Client, ty: &str) -> Value {
    loop {
        let frame = next_frame(client).await;
        if frame["type"] == ty {
            return frame;
        }
    }
}

/// Read frames until every listed type has been seen once. The reply to an
/// operation and the broadcast it triggered reach the originating
/// connection in either order, so callers collect both at once.
async fn frames_of_types(client: &mut Client, types: &[&str]) -> HashMap<String, Value> {
    let mut seen: HashMap<String, Value> = HashMap::new();
    while seen.len() < types.len() {
        let frame = next_frame(client).await;
        let ty = frame["type"].as_str().unwrap_or_default().to_string();
        if types.contains(&ty.as_str()) && !seen.contains_key(&ty) {
            seen.insert(ty, frame);
        }
    }
    seen
}

#[tokio::test]
async fn ready_greets_with_identity_and_announcement() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    let ready = frame_of_type(&mut alice, "ready").await;

    assert_eq!(ready["data"]["userId"], 1);
    assert_eq!(ready["data"]["username"], "alice");
    assert_eq!(ready["data"]["role"], "user");
    assert_eq!(ready["data"]["displayName"], "ALICE");
    assert_eq!(ready["data"]["announcement"], "Welcome to the community!");
}

#[tokio::test]
async fn send_reaches_every_connection_including_observers() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;
    let mut bob = connect(addr, Some(&token(2, "bob", Role::User))).await;
    frame_of_type(&mut bob, "ready").await;
    let mut anon = connect(addr, None).await;

    send_json(&mut alice, json!({"type": "send", "data": {"text": "  hello  "}})).await;

    let frames = frames_of_types(&mut alice, &["send", "message-created"]).await;
    let ack = &frames["send"];
    assert_eq!(ack["data"]["ok"], true);
    let message = &ack["data"]["message"];
    assert_eq!(message["text"], "hello");
    assert_eq!(message["username"], "alice");
    assert_eq!(message["deleted"], false);
    let id = message["id"].as_i64().unwrap();
    assert!(id > 0);

    // Everyone sees the broadcast: sender, peer, and the anonymous observer.
    assert_eq!(frames["message-created"]["data"]["id"], id);
    for client in [&mut bob, &mut anon] {
        let created = frame_of_type(client, "message-created").await;
        assert_eq!(created["data"]["id"], id);
        assert_eq!(created["data"]["text"], "hello");
        assert_eq!(created["data"]["displayName"], "ALICE");
    }
}

#[tokio::test]
async fn blank_send_gets_empty_error() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;

    send_json(&mut alice, json!({"type": "send", "data": {"text": "   "}})).await;
    let ack = frame_of_type(&mut alice, "send").await;
    assert_eq!(ack["data"], json!({"ok": false, "error": "empty"}));
}

#[tokio::test]
async fn anonymous_operations_are_rejected_with_auth() {
    let (addr, _db) = spawn_server().await;
    let mut anon = connect(addr, None).await;

    for (request, reply_type) in [
        (json!({"type": "history"}), "history"),
        (json!({"type": "unread"}), "unread"),
        (json!({"type": "send", "data": {"text": "hi"}}), "send"),
        (json!({"type": "delete", "data": {"id": 1}}), "delete"),
        (json!({"type": "purge"}), "purge"),
    ] {
        send_json(&mut anon, request).await;
        let reply = frame_of_type(&mut anon, reply_type).await;
        assert_eq!(reply["data"], json!({"ok": false, "error": "auth"}));
    }
}

#[tokio::test]
async fn delete_authorization_over_the_wire() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;
    let mut bob = connect(addr, Some(&token(2, "bob", Role::User))).await;
    frame_of_type(&mut bob, "ready").await;
    let mut mara = connect(addr, Some(&token(3, "mara", Role::Moderator))).await;
    frame_of_type(&mut mara, "ready").await;

    send_json(&mut alice, json!({"type": "send", "data": {"text": "target"}})).await;
    let ack = frame_of_type(&mut alice, "send").await;
    let id = ack["data"]["message"]["id"].as_i64().unwrap();

    // Garbage and unknown ids.
    send_json(&mut bob, json!({"type": "delete", "data": {"id": "zzz"}})).await;
    let reply = frame_of_type(&mut bob, "delete").await;
    assert_eq!(reply["data"], json!({"ok": false, "error": "bad_id"}));

    send_json(&mut bob, json!({"type": "delete", "data": {"id": 999}})).await;
    let reply = frame_of_type(&mut bob, "delete").await;
    assert_eq!(reply["data"], json!({"ok": false, "error": "not_found"}));

    // Plain user cannot delete someone else's message.
    send_json(&mut bob, json!({"type": "delete", "data": {"id": id}})).await;
    let reply = frame_of_type(&mut bob, "delete").await;
    assert_eq!(reply["data"], json!({"ok": false, "error": "forbidden"}));

    // Moderator can; everyone observes exactly one deletion notice.
    send_json(&mut mara, json!({"type": "delete", "data": {"id": id}})).await;
    let frames = frames_of_types(&mut mara, &["delete", "message-deleted"]).await;
    assert_eq!(frames["delete"]["data"], json!({"ok": true}));
    assert_eq!(frames["message-deleted"]["data"]["id"], id);

    for client in [&mut alice, &mut bob] {
        let deleted = frame_of_type(client, "message-deleted").await;
        assert_eq!(deleted["data"]["id"], id);
    }
}

#[tokio::test]
async fn purge_then_history_shows_redacted_messages() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;
    let mut root = connect(addr, Some(&token(4, "root", Role::Admin))).await;
    frame_of_type(&mut root, "ready").await;

    for text in ["one", "two"] {
        send_json(&mut alice, json!({"type": "send", "data": {"text": text}})).await;
        frame_of_type(&mut alice, "send").await;
    }

    // Plain user cannot purge.
    send_json(&mut alice, json!({"type": "purge"})).await;
    let reply = frame_of_type(&mut alice, "purge").await;
    assert_eq!(reply["data"], json!({"ok": false, "error": "forbidden"}));

    send_json(&mut root, json!({"type": "purge"})).await;
    let reply = frame_of_type(&mut root, "purge").await;
    assert_eq!(reply["data"], json!({"ok": true}));

    let purged = frame_of_type(&mut alice, "chat-purged").await;
    assert_eq!(purged["data"]["by"], "root");
    assert_eq!(purged["data"]["role"], "admin");

    send_json(&mut alice, json!({"type": "history"})).await;
    let history = frame_of_type(&mut alice, "history").await;
    assert_eq!(history["data"]["ok"], true);
    let messages = history["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    for message in messages {
        assert_eq!(message["deleted"], true);
        assert_eq!(message["text"], "[deleted]");
    }
}

#[tokio::test]
async fn unread_follows_the_read_cursor() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;
    let mut bob = connect(addr, Some(&token(2, "bob", Role::User))).await;
    frame_of_type(&mut bob, "ready").await;

    for text in ["first", "second"] {
        send_json(&mut alice, json!({"type": "send", "data": {"text": text}})).await;
        frame_of_type(&mut alice, "send").await;
    }

    send_json(&mut bob, json!({"type": "unread"})).await;
    let unread = frame_of_type(&mut bob, "unread").await;
    assert_eq!(unread["data"]["ok"], true);
    assert_eq!(unread["data"]["unread"], 2);
    assert_eq!(unread["data"]["lastReadId"], 0);
    let max_id = unread["data"]["maxId"].as_i64().unwrap();

    // markRead is fire-and-forget; the next unread reflects it because
    // frames on one connection are handled in order.
    send_json(&mut bob, json!({"type": "markRead", "data": {"lastReadId": max_id}})).await;
    send_json(&mut bob, json!({"type": "unread"})).await;
    let unread = frame_of_type(&mut bob, "unread").await;
    assert_eq!(unread["data"]["unread"], 0);
    assert_eq!(unread["data"]["lastReadId"], max_id);

    send_json(&mut alice, json!({"type": "send", "data": {"text": "third"}})).await;
    frame_of_type(&mut alice, "send").await;

    send_json(&mut bob, json!({"type": "unread"})).await;
    let unread = frame_of_type(&mut bob, "unread").await;
    assert_eq!(unread["data"]["unread"], 1);
}

#[tokio::test]
async fn malformed_frames_are_ignored_not_fatal() {
    let (addr, _db) = spawn_server().await;

    let mut alice = connect(addr, Some(&token(1, "alice", Role::User))).await;
    frame_of_type(&mut alice, "ready").await;

    // Not JSON, unknown type, wrong shape: all logged and dropped.
    alice
        .send(Message::Text("not json at all".into()))
        .await
        .unwrap();
    send_json(&mut alice, json!({"type": "dance"})).await;
    send_json(&mut alice, json!({"type": "send", "data": {"wrong": 1}})).await;

    // The connection still works afterwards.
    send_json(&mut alice, json!({"type": "send", "data": {"text": "still here"}})).await;
    let ack = frame_of_type(&mut alice, "send").await;
    assert_eq!(ack["data"]["ok"], true);
}
