//! End-to-end tests over a real WebSocket connection to an in-process
//! server.
//!
//! Verifies:
//! 1. Sent messages reach the server as marker-free JSON and are echoed
//!    into the local log first.
//! 2. Selecting a chat announces it to the server with the marker
//!    convention.
//! 3. Server pushes route by frame class: chat frames to the message log
//!    (current chat only), roster pushes to the presence map.
//! 4. Malformed frames are dropped without killing the connection.
//! 5. The remaining send preconditions surface their exact user-facing
//!    strings.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use chatsync::auth::{AuthGate, TokenStore};
use chatsync::backend::{AuthApi, BackendError, ChatBackend, ChatRecord};
use chatsync::session::Session;
use chatsync::store::{ChatStore, StoreEvent, StoreSnapshot};
use chatsync_proto::frame::{ChatFrame, Member};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Backend serving one chat with empty history and members.
struct FakeBackend;

impl ChatBackend for FakeBackend {
    async fn load_all_chats(
        &self,
        _user_id: &str,
        _token: &str,
    ) -> Result<Vec<ChatRecord>, BackendError> {
        Ok(vec![ChatRecord {
            id: "room-1".to_string(),
            name: "Room".to_string(),
            members: Vec::new(),
        }])
    }

    async fn load_chat_history(
        &self,
        _chat_id: &str,
        _token: &str,
    ) -> Result<Vec<ChatFrame>, BackendError> {
        Ok(Vec::new())
    }

    async fn load_chat_members(
        &self,
        _chat_id: &str,
        _token: &str,
    ) -> Result<Vec<Member>, BackendError> {
        Ok(Vec::new())
    }

    async fn save_chat(
        &self,
        name: &str,
        members: &[Member],
        _token: &str,
    ) -> Result<ChatRecord, BackendError> {
        Ok(ChatRecord {
            id: "unused".to_string(),
            name: name.to_string(),
            members: members.to_vec(),
        })
    }
}

impl AuthApi for FakeBackend {
    async fn refresh_session(&self, _refresh_token: &str) -> Result<String, BackendError> {
        Ok("fresh-token".to_string())
    }

    async fn verify_token(&self, _token: &str, _user_id: &str) -> Result<bool, BackendError> {
        Ok(true)
    }
}

struct NoTokens;

impl TokenStore for NoTokens {
    fn refresh_token(&self) -> Option<String> {
        None
    }
}

type TestStore = ChatStore<FakeBackend, FakeBackend, NoTokens>;

/// Starts a WebSocket server that accepts one connection.
///
/// Returns the server URL, a receiver of text frames the server got, and
/// a sender for pushing text frames to the client. Dropping the push
/// sender makes the server close the connection.
async fn start_test_server() -> (
    String,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}/api/v1/ws");

    let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut reader) = ws_stream.split();

        loop {
            tokio::select! {
                inbound = reader.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let _ = received_tx.send(text.to_string());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                push = push_rx.recv() => match push {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    });

    (url, received_rx, push_tx)
}

fn make_store(session: Session) -> (Arc<TestStore>, mpsc::Receiver<StoreEvent>) {
    let backend = Arc::new(FakeBackend);
    let session = Arc::new(session);
    let gate = AuthGate::new(Arc::clone(&backend), NoTokens, Arc::clone(&session));
    ChatStore::new(backend, gate, session, 64)
}

/// Store connected to a fresh test server, with "room-1" loaded and
/// selected.
async fn connected_store() -> (
    Arc<TestStore>,
    mpsc::Receiver<StoreEvent>,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let (url, received_rx, push_tx) = start_test_server().await;
    let (store, events) = make_store(Session::new("42", "Ada", "tok"));

    store.load_chats().await;
    store.connect(&url).await.unwrap();
    store.select_chat("room-1").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;

    (store, events, received_rx, push_tx)
}

/// Polls the snapshot until `predicate` holds, panicking after 2 seconds.
async fn wait_until(store: &Arc<TestStore>, predicate: impl Fn(&StoreSnapshot) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = store.snapshot().await;
        if predicate(&snapshot) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receives server-side frames until one matches `predicate`.
async fn recv_until(
    rx: &mut mpsc::UnboundedReceiver<String>,
    predicate: impl Fn(&str) -> bool,
) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("server received no matching frame within 2s")
            .expect("server channel closed");
        if predicate(&frame) {
            return frame;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sent_message_reaches_server_and_local_log() {
    let (store, _events, mut received, _push) = connected_store().await;

    store.send_message("hi there").await.unwrap();

    let raw = recv_until(&mut received, |frame| frame.starts_with('{')).await;
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["messageText"], "hi there");
    assert_eq!(value["chatId"], "room-1");
    assert_eq!(value["senderId"], "42");
    assert_eq!(value["sender"], "Ada");
    assert_eq!(value["receiver"], "ALL");

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1, "optimistic local echo");
    assert_eq!(snapshot.messages[0].message_text, "hi there");
}

#[tokio::test]
async fn selection_announces_active_chat_with_marker() {
    let (_store, _events, mut received, _push) = connected_store().await;

    let announcement = recv_until(&mut received, |frame| frame.starts_with('`')).await;
    assert_eq!(announcement, "`room-1");
}

#[tokio::test]
async fn server_push_for_current_chat_lands_in_log() {
    let (store, _events, _received, push) = connected_store().await;

    let frame = ChatFrame {
        chat_id: "room-1".to_string(),
        message_text: "from the wire".to_string(),
        timestamp: "1704110400000".to_string(),
        sender_id: "9".to_string(),
        sender: "Bea".to_string(),
        receiver: "ALL".to_string(),
    };
    push.send(serde_json::to_string(&frame).unwrap()).unwrap();

    wait_until(&store, |s| {
        s.messages.iter().any(|m| m.message_text == "from the wire")
    })
    .await;

    let snapshot = store.snapshot().await;
    let landed = snapshot
        .messages
        .iter()
        .find(|m| m.message_text == "from the wire")
        .unwrap();
    assert_eq!(
        landed.timestamp, "Mon, 01 Jan 2024 12:00:00 GMT",
        "wire timestamp normalized on decode"
    );
}

#[tokio::test]
async fn server_push_for_other_chat_is_dropped() {
    let (store, _events, _received, push) = connected_store().await;

    let other = ChatFrame {
        chat_id: "other-room".to_string(),
        message_text: "stray".to_string(),
        timestamp: "1704110400000".to_string(),
        sender_id: "9".to_string(),
        sender: "Bea".to_string(),
        receiver: "ALL".to_string(),
    };
    push.send(serde_json::to_string(&other).unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = store.snapshot().await;
    assert!(snapshot.messages.is_empty(), "inactive-chat message dropped");
}

#[tokio::test]
async fn roster_push_replaces_presence_wholesale() {
    let (store, _events, _received, push) = connected_store().await;

    push.send("`[{\"id\":1,\"displayName\":\"A\"}]".to_string())
        .unwrap();
    wait_until(&store, |s| s.active_members.contains_key("1")).await;

    push.send("`[{\"id\":2,\"displayName\":\"B\"},{\"id\":3,\"displayName\":\"C\"}]".to_string())
        .unwrap();
    wait_until(&store, |s| s.active_members.contains_key("2")).await;

    let members = store.active_members();
    assert_eq!(members.len(), 2, "previous roster replaced, not merged");
    assert!(!members.contains_key("1"));
    assert!(members.contains_key("3"));
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_connection_survives() {
    let (store, _events, _received, push) = connected_store().await;

    push.send("{definitely not json".to_string()).unwrap();

    let frame = ChatFrame {
        chat_id: "room-1".to_string(),
        message_text: "still alive".to_string(),
        timestamp: "1704110400000".to_string(),
        sender_id: "9".to_string(),
        sender: "Bea".to_string(),
        receiver: "ALL".to_string(),
    };
    push.send(serde_json::to_string(&frame).unwrap()).unwrap();

    wait_until(&store, |s| {
        s.messages.iter().any(|m| m.message_text == "still alive")
    })
    .await;
}

#[tokio::test]
async fn empty_text_rejected_when_connected() {
    let (store, _events, _received, _push) = connected_store().await;

    let rejection = store.send_message("").await.unwrap_err();
    assert_eq!(rejection.message(), "You must enter a message to send.");

    let snapshot = store.snapshot().await;
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn missing_session_id_rejected_when_connected() {
    let (url, _received, _push) = start_test_server().await;
    let (store, _events) = make_store(Session::new("", "", "tok"));
    store.connect(&url).await.unwrap();

    let rejection = store.send_message("hi").await.unwrap_err();
    assert_eq!(rejection.message(), "You must be signed in to send messages.");
}

#[tokio::test]
async fn closed_connection_rejects_with_not_open() {
    let (store, _events, _received, push) = connected_store().await;

    // Server closes the connection.
    drop(push);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match store.send_message("hi").await {
            Err(rejection) => {
                assert_eq!(
                    rejection.message(),
                    "You are not connected to the chat room server."
                );
                break;
            }
            Ok(()) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "close never observed"
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

#[tokio::test]
async fn disconnect_detaches_and_rejects_sends() {
    let (store, _events, _received, _push) = connected_store().await;

    store.disconnect().await;

    let rejection = store.send_message("hi").await.unwrap_err();
    assert_eq!(
        rejection.message(),
        "Could not connect to the chat room server."
    );
}
