//! Classification and serialization for the `ChatSync` wire protocol.
//!
//! The protocol multiplexes two frame classes over one text stream,
//! disambiguated by a reserved leading marker character: a frame starting
//! with [`ROSTER_MARKER`] carries a JSON array of member descriptors, and
//! everything else is a JSON chat message object. Outbound chat frames are
//! never marker-prefixed.

use chrono::{DateTime, TimeZone, Utc};

use crate::frame::{ChatFrame, Frame, Member};

/// Reserved marker character on inbound roster frames.
pub const ROSTER_MARKER: char = '`';

/// Fixed UTC display format for message timestamps
/// (e.g. `Mon, 01 Jan 2024 12:00:00 GMT`).
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Error type for codec decode/encode operations.
///
/// A decode failure means the frame is dropped by the caller; frames are
/// not re-deliverable, so there is no retry path.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload could not be parsed into the expected JSON shape.
    #[error("malformed frame: {0}")]
    Parse(String),
}

/// Decodes a raw inbound payload into a classified [`Frame`].
///
/// If the payload starts with [`ROSTER_MARKER`], the remainder is parsed
/// as a JSON array of member descriptors; otherwise the whole payload is
/// parsed as a JSON chat message object. Chat frame timestamps are
/// normalized to [`TIMESTAMP_FORMAT`] before the frame is returned.
///
/// # Errors
///
/// Returns [`CodecError::Parse`] if the JSON in either branch is
/// malformed.
pub fn decode(raw: &str) -> Result<Frame, CodecError> {
    if let Some(rest) = raw.strip_prefix(ROSTER_MARKER) {
        let members: Vec<Member> =
            serde_json::from_str(rest).map_err(|e| CodecError::Parse(e.to_string()))?;
        return Ok(Frame::Roster(members));
    }

    let mut frame: ChatFrame =
        serde_json::from_str(raw).map_err(|e| CodecError::Parse(e.to_string()))?;
    frame.timestamp = normalize_timestamp(&frame.timestamp);
    Ok(Frame::Chat(frame))
}

/// Encodes an outbound chat frame as a plain JSON object.
///
/// No marker prefix: the marker is reserved for roster pushes and the
/// active-chat announcement.
///
/// # Errors
///
/// Returns [`CodecError::Parse`] if the frame cannot be serialized.
pub fn encode(frame: &ChatFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Parse(e.to_string()))
}

/// Encodes the active-chat announcement sent when a chat is selected.
///
/// The announcement mirrors the inbound roster convention: the marker
/// character followed by the chat id. The server answers with roster
/// pushes for that chat.
#[must_use]
pub fn encode_active_chat(chat_id: &str) -> String {
    format!("{ROSTER_MARKER}{chat_id}")
}

/// Returns the current UTC time in [`TIMESTAMP_FORMAT`].
///
/// Outgoing frames stamp this at send time, not at display time.
#[must_use]
pub fn current_timestamp() -> String {
    format_utc(Utc::now())
}

/// Normalizes a wire timestamp to the fixed UTC display format.
///
/// Accepts milliseconds since the epoch, RFC 3339, or RFC 2822 input.
/// Anything else is passed through unchanged, so already-normalized
/// strings are stable under repeated normalization.
#[must_use]
pub fn normalize_timestamp(raw: &str) -> String {
    if let Ok(millis) = raw.parse::<i64>()
        && let Some(dt) = Utc.timestamp_millis_opt(millis).single()
    {
        return format_utc(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return format_utc(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return format_utc(dt.with_timezone(&Utc));
    }
    raw.to_string()
}

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}
