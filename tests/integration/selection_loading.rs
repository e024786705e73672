//! Integration tests for selection-driven lazy loading.
//!
//! Verifies:
//! 1. Selecting the same chat twice triggers exactly one history fetch
//!    and one member fetch.
//! 2. A stale in-flight fetch whose chat is no longer selected applies
//!    nothing.
//! 3. Member-fetch completion merges members without clobbering a name
//!    that changed while the fetch was in flight.
//! 4. Unavailable history settles as an empty log.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatsync::auth::{AuthGate, TokenStore};
use chatsync::backend::{AuthApi, BackendError, ChatBackend, ChatRecord};
use chatsync::session::Session;
use chatsync::store::{ChatStore, StoreEvent, StoreSnapshot};
use chatsync_proto::frame::{ChatFrame, Member};
use tokio::sync::{Notify, mpsc};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Backend with per-chat canned data, per-chat fetch counters, and
/// optional gates that stall a fetch until the test releases it.
///
/// Guards on the `std::sync::Mutex` fields are never held across awaits.
struct FakeBackend {
    chats: std::sync::Mutex<Vec<ChatRecord>>,
    history: HashMap<String, Vec<ChatFrame>>,
    members: HashMap<String, Vec<Member>>,
    history_counts: std::sync::Mutex<HashMap<String, usize>>,
    member_counts: std::sync::Mutex<HashMap<String, usize>>,
    history_gates: std::sync::Mutex<HashMap<String, Arc<Notify>>>,
    member_gates: std::sync::Mutex<HashMap<String, Arc<Notify>>>,
    fail_history: AtomicBool,
}

fn message(chat_id: &str, text: &str) -> ChatFrame {
    ChatFrame {
        chat_id: chat_id.to_string(),
        message_text: text.to_string(),
        timestamp: "Mon, 01 Jan 2024 12:00:00 GMT".to_string(),
        sender_id: "9".to_string(),
        sender: "Bea".to_string(),
        receiver: "ALL".to_string(),
    }
}

impl FakeBackend {
    fn new() -> Self {
        let mut history = HashMap::new();
        history.insert("a".to_string(), vec![message("a", "from-a")]);
        history.insert("b".to_string(), vec![message("b", "from-b")]);

        let mut members = HashMap::new();
        members.insert("a".to_string(), vec![Member::new("1", "One")]);
        members.insert("b".to_string(), vec![Member::new("2", "Two")]);

        Self {
            chats: std::sync::Mutex::new(vec![
                ChatRecord {
                    id: "a".to_string(),
                    name: "Alpha".to_string(),
                    members: Vec::new(),
                },
                ChatRecord {
                    id: "b".to_string(),
                    name: "Beta".to_string(),
                    members: Vec::new(),
                },
            ]),
            history,
            members,
            history_counts: std::sync::Mutex::new(HashMap::new()),
            member_counts: std::sync::Mutex::new(HashMap::new()),
            history_gates: std::sync::Mutex::new(HashMap::new()),
            member_gates: std::sync::Mutex::new(HashMap::new()),
            fail_history: AtomicBool::new(false),
        }
    }

    fn history_count(&self, chat_id: &str) -> usize {
        *self.history_counts.lock().unwrap().get(chat_id).unwrap_or(&0)
    }

    fn member_count(&self, chat_id: &str) -> usize {
        *self.member_counts.lock().unwrap().get(chat_id).unwrap_or(&0)
    }

    /// Makes the next history fetch for `chat_id` wait until the returned
    /// notify is signalled.
    fn gate_history(&self, chat_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.history_gates
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), Arc::clone(&gate));
        gate
    }

    /// Same as [`gate_history`](Self::gate_history), for member fetches.
    fn gate_members(&self, chat_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.member_gates
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), Arc::clone(&gate));
        gate
    }

    fn rename_chat(&self, chat_id: &str, name: &str) {
        let mut chats = self.chats.lock().unwrap();
        if let Some(record) = chats.iter_mut().find(|record| record.id == chat_id) {
            record.name = name.to_string();
        }
    }
}

impl ChatBackend for FakeBackend {
    async fn load_all_chats(
        &self,
        _user_id: &str,
        _token: &str,
    ) -> Result<Vec<ChatRecord>, BackendError> {
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn load_chat_history(
        &self,
        chat_id: &str,
        _token: &str,
    ) -> Result<Vec<ChatFrame>, BackendError> {
        *self
            .history_counts
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_insert(0) += 1;

        let gate = self.history_gates.lock().unwrap().get(chat_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(BackendError::Status(500));
        }
        Ok(self.history.get(chat_id).cloned().unwrap_or_default())
    }

    async fn load_chat_members(
        &self,
        chat_id: &str,
        _token: &str,
    ) -> Result<Vec<Member>, BackendError> {
        *self
            .member_counts
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_insert(0) += 1;

        let gate = self.member_gates.lock().unwrap().get(chat_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.members.get(chat_id).cloned().unwrap_or_default())
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

async fn setup() -> (Arc<FakeBackend>, Arc<TestStore>, mpsc::Receiver<StoreEvent>) {
    let backend = Arc::new(FakeBackend::new());
    let session = Arc::new(Session::new("42", "Ada", "tok"));
    let gate = AuthGate::new(Arc::clone(&backend), NoTokens, Arc::clone(&session));
    let (store, events) = ChatStore::new(Arc::clone(&backend), gate, session, 64);
    store.load_chats().await;
    (backend, store, events)
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_select_triggers_exactly_one_fetch_pair() {
    let (backend, store, _events) = setup().await;

    store.select_chat("a").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;

    store.select_chat("a").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(backend.history_count("a"), 1);
    assert_eq!(backend.member_count("a"), 1);
}

#[tokio::test]
async fn reselecting_after_another_chat_fetches_again() {
    let (backend, store, _events) = setup().await;

    store.select_chat("a").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;
    store.select_chat("b").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;
    store.select_chat("a").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;

    assert_eq!(backend.history_count("a"), 2, "each selection loads once");
    assert_eq!(backend.history_count("b"), 1);
}

#[tokio::test]
async fn selection_loads_history_into_the_log() {
    let (_backend, store, _events) = setup().await;

    store.select_chat("a").await;
    wait_until(&store, |s| s.history_loaded).await;

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].message_text, "from-a");
}

#[tokio::test]
async fn stale_history_completion_is_dropped() {
    let (backend, store, _events) = setup().await;

    let gate = backend.gate_history("a");
    store.select_chat("a").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Deselect "a" while its history fetch is still in flight.
    store.select_chat("b").await;
    wait_until(&store, |s| s.history_loaded && s.members_loaded).await;

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = store.snapshot().await;
    assert_eq!(
        snapshot.current_chat.map(|c| c.id),
        Some("b".to_string())
    );
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(
        snapshot.messages[0].message_text, "from-b",
        "the stale fetch for \"a\" must not overwrite \"b\"'s log"
    );
}

#[tokio::test]
async fn member_completion_keeps_concurrent_rename() {
    let (backend, store, _events) = setup().await;

    let gate = backend.gate_members("a");
    store.select_chat("a").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A rename lands while the member fetch is still in flight.
    backend.rename_chat("a", "Alpha Renamed");
    store.load_chats().await;

    gate.notify_one();
    wait_until(&store, |s| s.members_loaded).await;

    let snapshot = store.snapshot().await;
    let chat = snapshot.chats.get("a").cloned().unwrap();
    assert_eq!(chat.name, "Alpha Renamed", "rename survives the merge");
    assert_eq!(chat.members, vec![Member::new("1", "One")]);
}

#[tokio::test]
async fn unavailable_history_settles_as_empty_log() {
    let (backend, store, _events) = setup().await;
    backend.fail_history.store(true, Ordering::SeqCst);

    store.select_chat("a").await;
    wait_until(&store, |s| s.history_loaded).await;

    let snapshot = store.snapshot().await;
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn selecting_unknown_chat_is_ignored() {
    let (backend, store, _events) = setup().await;

    store.select_chat("ghost").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(backend.history_count("ghost"), 0);
    let snapshot = store.snapshot().await;
    assert!(snapshot.current_chat.is_none());
}
