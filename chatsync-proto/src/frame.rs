//! Wire format types for the `ChatSync` protocol.
//!
//! All types in this module represent the on-the-wire format for frames
//! exchanged with a chat room server. Chat frames travel as plain JSON
//! objects with camelCase keys; roster pushes arrive as a JSON array of
//! member descriptors behind a reserved marker character (see
//! [`crate::codec`]).

use serde::{Deserialize, Serialize};

/// Maximum allowed message text size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// The broadcast receiver used for room-wide messages.
pub const RECEIVER_ALL: &str = "ALL";

/// A single chat message as transmitted over the duplex connection.
///
/// The `timestamp` is a display string: outgoing frames stamp the current
/// UTC time at send time, and inbound frames are normalized by
/// [`crate::codec::decode`] before they reach the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    /// The chat this message belongs to.
    pub chat_id: String,
    /// The message body.
    pub message_text: String,
    /// Creation time, normalized to the fixed UTC display format.
    #[serde(deserialize_with = "deserialize_id")]
    pub timestamp: String,
    /// Stable identifier of the sender.
    #[serde(deserialize_with = "deserialize_id")]
    pub sender_id: String,
    /// Display name of the sender.
    pub sender: String,
    /// Intended receiver; [`RECEIVER_ALL`] for room-wide broadcast.
    pub receiver: String,
}

impl ChatFrame {
    /// Builds an outgoing broadcast frame, stamping the current UTC time.
    #[must_use]
    pub fn outgoing(chat_id: &str, message_text: &str, sender_id: &str, sender: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_text: message_text.to_string(),
            timestamp: crate::codec::current_timestamp(),
            sender_id: sender_id.to_string(),
            sender: sender.to_string(),
            receiver: RECEIVER_ALL.to_string(),
        }
    }

    /// Validates this frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the message text is empty, or
    /// [`ValidationError::TooLarge`] if it exceeds [`MAX_MESSAGE_SIZE`].
    pub const fn validate(&self) -> Result<(), ValidationError> {
        if self.message_text.is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.message_text.len();
        if size > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

/// Error returned when a frame fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message text is empty.
    #[error("message text is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// A chat member descriptor as carried by roster pushes.
///
/// Some deployments emit numeric member ids; they are normalized to
/// strings on deserialization so the rest of the engine deals with one id
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Stable identifier of the member.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Human-readable display name.
    pub display_name: String,
}

impl Member {
    /// Creates a member descriptor.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// A decoded inbound frame, classified by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chat message.
    Chat(ChatFrame),
    /// A roster push for the active chat.
    Roster(Vec<Member>),
}

/// Deserializes a JSON string or number into a `String` identifier.
///
/// # Errors
///
/// Returns a deserialization error for any other JSON shape.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}
