//! The chat state engine: chats, current chat, message log, and the
//! intents a presentation layer can issue against them.
//!
//! All mutable state lives behind one async mutex, so intent handlers and
//! inbound-frame dispatch serialize naturally. Reads go through
//! [`ChatStore::snapshot`], which hands out cheap `Arc`-backed clones:
//! every mutation builds a fresh map or log and swaps it in whole, so a
//! snapshot taken before a mutation never changes underneath its holder.
//!
//! Lazy loading is selection-driven: selecting a chat issues its history
//! fetch, member fetch, and presence announcement concurrently, exactly
//! once per selection. In-flight fetches are never cancelled; instead each
//! completion handler re-checks that its target chat is still the current
//! selection before applying anything, so a stale fetch for a deselected
//! chat is dropped on the floor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use chatsync_proto::frame::{ChatFrame, Member};

use crate::auth::{AuthError, AuthGate, TokenStore};
use crate::backend::{AuthApi, ChatBackend, ChatRecord};
use crate::connection::{Connection, ConnectionError, ConnectionState, FrameListeners};
use crate::presence::{PresenceStatus, PresenceTracker};
use crate::session::Session;

/// Rejection string when no connection has been established.
pub const REJECT_NO_CONNECTION: &str = "Could not connect to the chat room server.";
/// Rejection string for an empty message.
pub const REJECT_EMPTY_MESSAGE: &str = "You must enter a message to send.";
/// Rejection string when the session carries no user id.
pub const REJECT_NO_SESSION: &str = "You must be signed in to send messages.";
/// Rejection string when the connection exists but is not open.
pub const REJECT_NOT_OPEN: &str = "You are not connected to the chat room server.";

/// A chat as known to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Server-assigned id, or a locally generated pending id before the
    /// chat is persisted.
    pub id: String,
    /// Display name; empty until committed.
    pub name: String,
    /// Member descriptors.
    pub members: Vec<Member>,
    /// Whether the server has confirmed this chat. A `false` here marks
    /// the (at most one) pending chat.
    pub created: bool,
}

impl From<ChatRecord> for Chat {
    fn from(record: ChatRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            members: record.members,
            created: true,
        }
    }
}

/// Insertion-ordered chat map.
///
/// Lookup is by id; iteration follows insertion order, which is the
/// rendering order the presentation layer sees. The store never mutates a
/// shared map in place: it clones, edits the clone, and swaps the `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ChatMap {
    order: Vec<String>,
    by_id: HashMap<String, Chat>,
}

impl ChatMap {
    /// Looks up a chat by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Chat> {
        self.by_id.get(id)
    }

    /// Whether a chat with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Number of chats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates chats in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Chat> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Inserts a chat, replacing any entry with the same id in place.
    fn insert(&mut self, chat: Chat) {
        if !self.by_id.contains_key(&chat.id) {
            self.order.push(chat.id.clone());
        }
        self.by_id.insert(chat.id.clone(), chat);
    }

    /// Removes a chat by id.
    fn remove(&mut self, id: &str) {
        if self.by_id.remove(id).is_some() {
            self.order.retain(|entry| entry != id);
        }
    }

    /// Replaces the entry under `old_id` with `chat` under its new id,
    /// keeping the original position in the ordering. Inserts at the end
    /// if `old_id` is absent.
    fn rekey(&mut self, old_id: &str, chat: Chat) {
        if self.by_id.remove(old_id).is_some() {
            if let Some(slot) = self.order.iter_mut().find(|entry| *entry == old_id) {
                *slot = chat.id.clone();
            }
            self.by_id.insert(chat.id.clone(), chat);
        } else {
            self.insert(chat);
        }
    }

    /// Applies `edit` to the chat with the given id. Returns whether the
    /// chat existed.
    fn update(&mut self, id: &str, edit: impl FnOnce(&mut Chat)) -> bool {
        match self.by_id.get_mut(id) {
            Some(chat) => {
                edit(chat);
                true
            }
            None => false,
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// All known chats in rendering order.
    pub chats: Arc<ChatMap>,
    /// The currently selected chat, if any.
    pub current_chat: Option<Chat>,
    /// Message log of the current chat, arrival order.
    pub messages: Arc<Vec<ChatFrame>>,
    /// Roster of the active chat, keyed by member id.
    pub active_members: HashMap<String, PresenceStatus>,
    /// Whether the current selection's history fetch has settled.
    pub history_loaded: bool,
    /// Whether the current selection's member fetch has settled.
    pub members_loaded: bool,
    /// A freshly created chat is awaiting its name.
    pub naming_in_progress: bool,
    /// A freshly created chat is accepting member changes.
    pub adding_members_in_progress: bool,
}

/// Re-render hints for the presentation layer.
///
/// Delivered best-effort: a saturated channel drops the hint rather than
/// blocking a mutation. Consumers re-read [`ChatStore::snapshot`] on any
/// event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The chat map or current selection changed.
    ChatsChanged,
    /// The message log changed.
    MessagesChanged,
    /// The active-chat roster changed.
    RosterChanged,
    /// The connection reported a transport error.
    ConnectionError(String),
}

/// User-facing rejection for a send attempt that failed a precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRejection(&'static str);

impl SendRejection {
    /// The message to show the user.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for SendRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Errors from chat lifecycle intents.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No uncommitted chat exists to operate on.
    #[error("no chat is pending commit")]
    NoPendingChat,

    /// The store is not currently accepting member changes.
    #[error("chat is not accepting member changes")]
    NotAddingMembers,

    /// The referenced chat is not in the store.
    #[error("no chat with id {0}")]
    UnknownChat(String),

    /// A freshly generated pending id collided with an existing chat.
    /// Practically unreachable with UUID ids; kept as an explicit
    /// invariant check.
    #[error("pending id collided with an existing chat")]
    PendingIdCollision,

    /// Persisting the chat failed, including after the single
    /// reauthorization retry. State is left unchanged.
    #[error("chat could not be saved")]
    SaveFailed(#[source] AuthError),
}

/// Mutable engine state. One lock guards all of it.
#[derive(Debug)]
struct StoreState {
    chats: Arc<ChatMap>,
    current: Option<String>,
    messages: Arc<Vec<ChatFrame>>,
    history_loaded: bool,
    members_loaded: bool,
    naming_in_progress: bool,
    adding_members_in_progress: bool,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            chats: Arc::new(ChatMap::default()),
            current: None,
            messages: Arc::new(Vec::new()),
            history_loaded: false,
            members_loaded: false,
            naming_in_progress: false,
            adding_members_in_progress: false,
        }
    }
}

/// Inbound socket events, queued so store mutations stay serialized.
#[derive(Debug)]
enum Inbound {
    Message(ChatFrame),
    Roster(Vec<Member>),
    Error(String),
}

/// The connection-side listener set: enqueues into the dispatch channel.
struct ChannelListeners {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl FrameListeners for ChannelListeners {
    fn on_message(&self, frame: ChatFrame) {
        let _ = self.tx.send(Inbound::Message(frame));
    }

    fn on_roster(&self, members: Vec<Member>) {
        let _ = self.tx.send(Inbound::Roster(members));
    }

    fn on_error(&self, reason: String) {
        let _ = self.tx.send(Inbound::Error(reason));
    }
}

/// The chat state engine.
///
/// Owns the chat map, current selection, message log, and presence
/// roster; talks to the persistence collaborator through the auth gate
/// and to the chat room server through a [`Connection`].
pub struct ChatStore<B, A, T>
where
    B: ChatBackend + 'static,
    A: AuthApi + 'static,
    T: TokenStore + 'static,
{
    backend: Arc<B>,
    gate: AuthGate<A, T>,
    session: Arc<Session>,
    presence: PresenceTracker,
    state: Mutex<StoreState>,
    conn: parking_lot::Mutex<Option<Arc<Connection>>>,
    events: mpsc::Sender<StoreEvent>,
}

impl<B, A, T> ChatStore<B, A, T>
where
    B: ChatBackend + 'static,
    A: AuthApi + 'static,
    T: TokenStore + 'static,
{
    /// Creates the store and the event receiver the presentation layer
    /// drains.
    pub fn new(
        backend: Arc<B>,
        gate: AuthGate<A, T>,
        session: Arc<Session>,
        event_buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<StoreEvent>) {
        let (tx, rx) = mpsc::channel(event_buffer);
        let store = Arc::new(Self {
            backend,
            gate,
            session,
            presence: PresenceTracker::new(),
            state: Mutex::new(StoreState::default()),
            conn: parking_lot::Mutex::new(None),
            events: tx,
        });
        (store, rx)
    }

    /// Read-only snapshot for rendering.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            chats: Arc::clone(&state.chats),
            current_chat: state
                .current
                .as_ref()
                .and_then(|id| state.chats.get(id))
                .cloned(),
            messages: Arc::clone(&state.messages),
            active_members: self.presence.active_members(),
            history_loaded: state.history_loaded,
            members_loaded: state.members_loaded,
            naming_in_progress: state.naming_in_progress,
            adding_members_in_progress: state.adding_members_in_progress,
        }
    }

    /// Opens the connection to the chat room server and wires the
    /// inbound dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the connection cannot be
    /// established.
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<(), ConnectionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners: Arc<dyn FrameListeners> = Arc::new(ChannelListeners { tx });

        let connection =
            Connection::open(url, self.session.id(), &self.session.token(), listeners).await?;
        *self.conn.lock() = Some(Arc::new(connection));

        let store = Arc::clone(self);
        tokio::spawn(async move {
            dispatch_loop(store, rx).await;
        });
        Ok(())
    }

    /// Closes the connection, detaching its listener set. No
    /// reconnection.
    pub async fn disconnect(&self) {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }

    /// Loads every chat the user belongs to into the map.
    ///
    /// Auth failure leaves the map as-is; the chat list is simply
    /// unavailable.
    pub async fn load_chats(&self) {
        let backend = Arc::clone(&self.backend);
        let user_id = self.session.id().to_string();
        let loaded = self
            .gate
            .call(move |token| {
                let backend = Arc::clone(&backend);
                let user_id = user_id.clone();
                async move { backend.load_all_chats(&user_id, &token).await }
            })
            .await;

        match loaded {
            Ok(records) => {
                let mut state = self.state.lock().await;
                let mut chats = (*state.chats).clone();
                for record in records {
                    chats.insert(Chat::from(record));
                }
                state.chats = Arc::new(chats);
                drop(state);
                self.notify(StoreEvent::ChatsChanged);
            }
            Err(e) => tracing::warn!(err = %e, "chat list unavailable"),
        }
    }

    /// Creates a pending chat seeded with the session user and selects
    /// it.
    ///
    /// At most one uncommitted chat exists at a time: a previous pending
    /// chat is discarded before the new one is seeded. The pending id is
    /// a UUID, a different id space from server-assigned ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PendingIdCollision`] if the generated id
    /// already exists in the map.
    pub async fn create_chat(&self) -> Result<Chat, StoreError> {
        let pending_id = Uuid::now_v7().to_string();
        let me = Member::new(self.session.id(), self.session.display_name());
        let chat = Chat {
            id: pending_id.clone(),
            name: String::new(),
            members: vec![me],
            created: false,
        };

        let mut state = self.state.lock().await;
        if state.chats.contains(&pending_id) {
            return Err(StoreError::PendingIdCollision);
        }

        let mut chats = (*state.chats).clone();
        let stale = chats.iter().find(|c| !c.created).map(|c| c.id.clone());
        if let Some(stale) = stale {
            chats.remove(&stale);
        }
        chats.insert(chat.clone());
        state.chats = Arc::new(chats);
        state.current = Some(pending_id);
        state.messages = Arc::new(Vec::new());
        state.history_loaded = true;
        state.members_loaded = true;
        state.naming_in_progress = true;
        state.adding_members_in_progress = true;
        drop(state);

        self.notify(StoreEvent::ChatsChanged);
        self.notify(StoreEvent::MessagesChanged);
        Ok(chat)
    }

    /// Names and persists the pending chat.
    ///
    /// On success the pending entry is replaced by the server-returned
    /// chat under its real id in one atomic swap; the current selection
    /// follows. On any failure, including one surviving the silent
    /// reauthorization retry, state is left exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoPendingChat`] if nothing is awaiting a name.
    /// - [`StoreError::SaveFailed`] if persistence failed.
    pub async fn commit_chat_name(&self, name: &str) -> Result<Chat, StoreError> {
        let (pending_id, members) = {
            let state = self.state.lock().await;
            let pending = state
                .chats
                .iter()
                .find(|c| !c.created)
                .ok_or(StoreError::NoPendingChat)?;
            (pending.id.clone(), pending.members.clone())
        };

        let backend = Arc::clone(&self.backend);
        let save_name = name.to_string();
        let save_members = members.clone();
        let saved = self
            .gate
            .call(move |token| {
                let backend = Arc::clone(&backend);
                let name = save_name.clone();
                let members = save_members.clone();
                async move { backend.save_chat(&name, &members, &token).await }
            })
            .await
            .map_err(StoreError::SaveFailed)?;

        let committed = Chat {
            id: saved.id,
            name: saved.name,
            members: if saved.members.is_empty() {
                members
            } else {
                saved.members
            },
            created: true,
        };

        let mut state = self.state.lock().await;
        let mut chats = (*state.chats).clone();
        chats.rekey(&pending_id, committed.clone());
        state.chats = Arc::new(chats);
        if state.current.as_deref() == Some(pending_id.as_str()) {
            state.current = Some(committed.id.clone());
        }
        state.naming_in_progress = false;
        state.adding_members_in_progress = false;
        drop(state);

        tracing::info!(chat = %committed.id, "pending chat committed");
        self.notify(StoreEvent::ChatsChanged);
        Ok(committed)
    }

    /// Replaces the current chat's members from a comma-separated input.
    ///
    /// Entries are trimmed, deduplicated, and merged with the session
    /// user; the chat's name is untouched. Only valid between
    /// [`create_chat`](Self::create_chat) and
    /// [`commit_chat_name`](Self::commit_chat_name); this call ends the
    /// member-adding window.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotAddingMembers`] outside the window.
    /// - [`StoreError::NoPendingChat`] if nothing is selected.
    /// - [`StoreError::UnknownChat`] if the selection vanished.
    pub async fn add_members(&self, raw: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.adding_members_in_progress {
            return Err(StoreError::NotAddingMembers);
        }
        let Some(current_id) = state.current.clone() else {
            return Err(StoreError::NoPendingChat);
        };

        let mut members = vec![Member::new(self.session.id(), self.session.display_name())];
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() || members.iter().any(|m| m.id == entry) {
                continue;
            }
            members.push(Member::new(entry, entry));
        }

        let mut chats = (*state.chats).clone();
        if !chats.update(&current_id, |chat| chat.members = members) {
            return Err(StoreError::UnknownChat(current_id));
        }
        state.chats = Arc::new(chats);
        state.adding_members_in_progress = false;
        drop(state);

        self.notify(StoreEvent::ChatsChanged);
        Ok(())
    }

    /// Selects a chat, lazily loading its history and members.
    ///
    /// Selecting the already-current, fully loaded chat is a no-op, so
    /// repeated selections trigger exactly one history fetch and one
    /// member fetch. A fresh selection clears the message log, issues
    /// both fetches and the active-chat announcement concurrently, and
    /// lets each completion apply only if the chat is still selected.
    pub async fn select_chat(self: &Arc<Self>, id: &str) {
        let target = id.to_string();
        {
            let mut state = self.state.lock().await;
            let Some(chat) = state.chats.get(&target) else {
                tracing::warn!(chat = %target, "select ignored: unknown chat");
                return;
            };
            if state.current.as_deref() == Some(id)
                && state.history_loaded
                && state.members_loaded
            {
                return;
            }
            let created = chat.created;
            state.current = Some(target.clone());
            state.messages = Arc::new(Vec::new());
            // A pending chat has no server-side history or members yet.
            state.history_loaded = !created;
            state.members_loaded = !created;
            if !created {
                drop(state);
                self.notify(StoreEvent::MessagesChanged);
                return;
            }
        }
        self.notify(StoreEvent::MessagesChanged);

        // Fetches and the announcement go out together; completion order
        // is not guaranteed.
        let store = Arc::clone(self);
        let chat_id = target.clone();
        tokio::spawn(async move {
            store.fetch_history(chat_id).await;
        });

        let store = Arc::clone(self);
        let chat_id = target.clone();
        tokio::spawn(async move {
            store.fetch_members(chat_id).await;
        });

        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.announce_active_chat(&target).await;
        });
    }

    /// Validates and sends a message, echoing it locally first.
    ///
    /// Preconditions are checked in order -- connection exists, text
    /// non-empty, session id present, connection open -- and the first
    /// failure is returned as a user-facing [`SendRejection`] with no
    /// state change. On success the frame is appended to the log before
    /// it is handed to the connection; a transport failure after that
    /// point surfaces on the error listener, not here.
    ///
    /// # Errors
    ///
    /// Returns the first failed precondition as a [`SendRejection`].
    pub async fn send_message(&self, text: &str) -> Result<(), SendRejection> {
        let Some(conn) = self.conn.lock().clone() else {
            return Err(SendRejection(REJECT_NO_CONNECTION));
        };
        if text.is_empty() {
            return Err(SendRejection(REJECT_EMPTY_MESSAGE));
        }
        if self.session.id().is_empty() {
            return Err(SendRejection(REJECT_NO_SESSION));
        }
        if conn.state() != ConnectionState::Open {
            return Err(SendRejection(REJECT_NOT_OPEN));
        }

        let mut state = self.state.lock().await;
        let chat_id = state.current.clone().unwrap_or_default();
        let frame = ChatFrame::outgoing(
            &chat_id,
            text,
            self.session.id(),
            self.session.display_name(),
        );

        let mut messages = (*state.messages).clone();
        messages.push(frame.clone());
        state.messages = Arc::new(messages);
        drop(state);
        self.notify(StoreEvent::MessagesChanged);

        if let Err(e) = conn.send(&frame).await {
            // The optimistic echo stands; the server will not confirm it.
            tracing::warn!(err = %e, "message handed to a failing connection");
        }
        Ok(())
    }

    /// Applies an inbound chat frame.
    ///
    /// Only messages for the current chat are appended. Messages for any
    /// other chat are dropped -- not buffered, not counted. Known
    /// limitation carried over from the source behavior.
    pub async fn apply_incoming_message(&self, frame: ChatFrame) {
        let mut state = self.state.lock().await;
        if state.current.as_deref() != Some(frame.chat_id.as_str()) {
            tracing::debug!(chat = %frame.chat_id, "message for inactive chat dropped");
            return;
        }
        let mut messages = (*state.messages).clone();
        messages.push(frame);
        state.messages = Arc::new(messages);
        drop(state);
        self.notify(StoreEvent::MessagesChanged);
    }

    /// Applies an inbound roster push for the active chat.
    pub fn apply_roster(&self, members: &[Member]) {
        self.presence.apply_roster(members);
        self.notify(StoreEvent::RosterChanged);
    }

    /// Roster of the active chat.
    #[must_use]
    pub fn active_members(&self) -> HashMap<String, PresenceStatus> {
        self.presence.active_members()
    }

    async fn fetch_history(&self, chat_id: String) {
        let backend = Arc::clone(&self.backend);
        let id = chat_id.clone();
        let result = self
            .gate
            .call(move |token| {
                let backend = Arc::clone(&backend);
                let id = id.clone();
                async move { backend.load_chat_history(&id, &token).await }
            })
            .await;

        let mut state = self.state.lock().await;
        if state.current.as_deref() != Some(chat_id.as_str()) {
            tracing::debug!(chat = %chat_id, "history for a stale selection dropped");
            return;
        }
        match result {
            Ok(history) => {
                state.messages = Arc::new(history);
                state.history_loaded = true;
                drop(state);
                self.notify(StoreEvent::MessagesChanged);
            }
            Err(e) => {
                // Unavailable history renders as an empty log.
                state.history_loaded = true;
                drop(state);
                tracing::warn!(chat = %chat_id, err = %e, "chat history unavailable");
            }
        }
    }

    async fn fetch_members(&self, chat_id: String) {
        let backend = Arc::clone(&self.backend);
        let id = chat_id.clone();
        let result = self
            .gate
            .call(move |token| {
                let backend = Arc::clone(&backend);
                let id = id.clone();
                async move { backend.load_chat_members(&id, &token).await }
            })
            .await;

        let mut state = self.state.lock().await;
        if state.current.as_deref() != Some(chat_id.as_str()) {
            tracing::debug!(chat = %chat_id, "members for a stale selection dropped");
            return;
        }
        match result {
            Ok(members) => {
                // Merge into the entry as it exists now: a rename that
                // landed while this fetch was in flight keeps its name.
                let mut chats = (*state.chats).clone();
                if chats.update(&chat_id, |chat| chat.members = members) {
                    state.chats = Arc::new(chats);
                }
                state.members_loaded = true;
                drop(state);
                self.notify(StoreEvent::ChatsChanged);
            }
            Err(e) => {
                state.members_loaded = true;
                drop(state);
                tracing::warn!(chat = %chat_id, err = %e, "chat members unavailable");
            }
        }
    }

    async fn announce_active_chat(&self, chat_id: &str) {
        let conn = self.conn.lock().clone();
        if let Some(conn) = conn
            && let Err(e) = conn.announce_active_chat(chat_id).await
        {
            tracing::debug!(err = %e, "active-chat announcement not delivered");
        }
    }

    fn notify(&self, event: StoreEvent) {
        let _ = self.events.try_send(event);
    }
}

/// Drains inbound socket events and applies them to the store serially.
///
/// Ends when the connection's listener set is detached (channel closed).
async fn dispatch_loop<B, A, T>(
    store: Arc<ChatStore<B, A, T>>,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
) where
    B: ChatBackend + 'static,
    A: AuthApi + 'static,
    T: TokenStore + 'static,
{
    while let Some(event) = rx.recv().await {
        match event {
            Inbound::Message(frame) => store.apply_incoming_message(frame).await,
            Inbound::Roster(members) => store.apply_roster(&members),
            Inbound::Error(reason) => {
                tracing::warn!(%reason, "connection error reported");
                store.notify(StoreEvent::ConnectionError(reason));
            }
        }
    }
    tracing::debug!("inbound dispatch ending: listener set detached");
}
