//! Ownership of the duplex WebSocket connection to the chat room server.
//!
//! A [`Connection`] is created once per session via [`Connection::open`],
//! which registers exactly one [`FrameListeners`] set and spawns a
//! background reader task. The raw socket is never exposed; consumers
//! interact only through [`send`](Connection::send),
//! [`announce_active_chat`](Connection::announce_active_chat), and
//! [`close`](Connection::close).
//!
//! The handle stores the listener set registered at open, so teardown
//! always detaches exactly those references. A stale listener reference
//! captured before the connection existed cannot survive here: there is
//! nothing to deregister except what the live handle owns.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use chatsync_proto::codec;
use chatsync_proto::frame::{ChatFrame, Frame, Member};

/// Type alias for the write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has been made.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected; frames may be sent.
    Open,
    /// Closed locally or by the server.
    Closed,
    /// The underlying stream died.
    Errored,
}

/// Errors that can occur on the connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// A send was attempted while the connection was not open.
    #[error("connection is not open")]
    NotOpen,

    /// Establishing the connection timed out.
    #[error("connect timed out")]
    Timeout,

    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// The WebSocket handshake failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// An outbound frame could not be serialized.
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// The listener set registered with a connection at open time.
///
/// Implementations must be cheap and non-blocking: the reader task calls
/// them inline between socket reads. The engine's implementation enqueues
/// into an ordered channel so store mutations stay serialized.
pub trait FrameListeners: Send + Sync {
    /// An inbound chat message was decoded.
    fn on_message(&self, frame: ChatFrame);
    /// An inbound roster push was decoded.
    fn on_roster(&self, members: Vec<Member>);
    /// A transport-level error occurred. Non-fatal: the connection is
    /// left as-is.
    fn on_error(&self, reason: String);
}

/// Handle to the duplex connection.
///
/// Created by [`open`](Self::open); closed by [`close`](Self::close).
/// There is no reconnection: once closed or errored, the handle is done.
pub struct Connection {
    /// Current lifecycle state.
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    /// Write half of the socket (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// The listener set registered at open; used for send-side error
    /// reporting and detached when the handle closes.
    listeners: Arc<dyn FrameListeners>,
    /// Background reader task; aborting it detaches the listener set.
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Connection {
    /// Opens the connection and registers the listener set.
    ///
    /// The endpoint URL is extended with `sessionId` and `token` query
    /// parameters. Until the handshake completes, [`send`](Self::send)
    /// fails with [`ConnectionError::NotOpen`].
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidUrl`] if the URL cannot be parsed.
    /// - [`ConnectionError::Timeout`] if the handshake takes too long.
    /// - [`ConnectionError::Handshake`] if the server rejects the upgrade.
    pub async fn open(
        url: &str,
        session_id: &str,
        token: &str,
        listeners: Arc<dyn FrameListeners>,
    ) -> Result<Self, ConnectionError> {
        let mut endpoint =
            url::Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        endpoint
            .query_pairs_mut()
            .append_pair("sessionId", session_id)
            .append_pair("token", token);

        let state = Arc::new(parking_lot::Mutex::new(ConnectionState::Connecting));

        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(endpoint.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "websocket connect timed out");
                    ConnectionError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url, err = %e, "websocket connect failed");
                    ConnectionError::Handshake(e.to_string())
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        *state.lock() = ConnectionState::Open;

        let reader_state = Arc::clone(&state);
        let reader_listeners = Arc::clone(&listeners);
        let reader_handle = tokio::spawn(reader_loop(ws_reader, reader_listeners, reader_state));

        tracing::info!(url, session_id, "chat connection open");

        Ok(Self {
            state,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            listeners,
            reader_handle: parking_lot::Mutex::new(Some(reader_handle)),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Sends a chat frame.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotOpen`] if the state is not [`ConnectionState::Open`].
    /// - [`ConnectionError::Encode`] if the frame cannot be serialized.
    /// - [`ConnectionError::Closed`] if the socket write fails.
    pub async fn send(&self, frame: &ChatFrame) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionError::NotOpen);
        }
        let payload = codec::encode(frame).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        self.transmit(payload).await
    }

    /// Announces the newly selected chat so the server starts pushing its
    /// roster.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send`](Self::send), minus encoding.
    pub async fn announce_active_chat(&self, chat_id: &str) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionError::NotOpen);
        }
        self.transmit(codec::encode_active_chat(chat_id)).await
    }

    /// Closes the connection and detaches the listener set registered at
    /// open. Idempotent; no reconnection afterwards.
    pub async fn close(&self) {
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }

        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.send(Message::Close(None)).await {
            tracing::debug!(err = %e, "close frame not delivered");
        }
        drop(sender);

        *self.state.lock() = ConnectionState::Closed;
        tracing::info!("chat connection closed");
    }

    /// Writes one text payload to the socket.
    async fn transmit(&self, payload: String) -> Result<(), ConnectionError> {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.send(Message::Text(payload.into())).await {
            drop(sender);
            tracing::warn!(err = %e, "websocket send failed");
            *self.state.lock() = ConnectionState::Errored;
            self.listeners.on_error(format!("send failed: {e}"));
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Background task that reads, decodes, and dispatches inbound frames.
///
/// Text frames go through the codec: chat frames to `on_message`, roster
/// pushes to `on_roster`. Undecodable frames are logged and dropped
/// without touching the connection. Read errors are reported via
/// `on_error` and reading continues until the stream ends.
async fn reader_loop(
    mut ws_reader: WsReader,
    listeners: Arc<dyn FrameListeners>,
    state: Arc<parking_lot::Mutex<ConnectionState>>,
) {
    while let Some(message) = ws_reader.next().await {
        match message {
            Ok(Message::Text(raw)) => match codec::decode(raw.as_str()) {
                Ok(Frame::Chat(frame)) => listeners.on_message(frame),
                Ok(Frame::Roster(members)) => listeners.on_roster(members),
                Err(e) => {
                    // Frames are not re-deliverable; drop and move on.
                    tracing::warn!(err = %e, "undecodable frame dropped");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("server closed the connection");
                *state.lock() = ConnectionState::Closed;
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "websocket read error");
                listeners.on_error(format!("read error: {e}"));
            }
        }
    }

    {
        let mut st = state.lock();
        if *st == ConnectionState::Open {
            *st = ConnectionState::Errored;
        }
    }
    tracing::debug!("connection reader exiting");
}
