//! Codec for encoding and decoding relay events.
//!
//! Events travel as JSON text frames. Decoding validates the frame size and
//! the chat identifier before handing the event to the relay.

use thiserror::Error;

use crate::events::{ClientEvent, RelayEvent};

/// Default maximum inbound event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Maximum chat identifier length.
pub const MAX_CHAT_ID_LENGTH: usize = 256;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds the size limit.
    #[error("Event size {size} exceeds maximum {limit}")]
    TooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Limit in force.
        limit: usize,
    },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error (malformed JSON, unknown action, missing field).
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Well-formed but unusable event.
    #[error("Invalid event: {0}")]
    Invalid(&'static str),
}

/// Validate a chat identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is empty, too long, or
/// contains control characters.
pub fn validate_chat_id(chat: &str) -> Result<(), &'static str> {
    if chat.is_empty() {
        return Err("Chat identifier cannot be empty");
    }
    if chat.len() > MAX_CHAT_ID_LENGTH {
        return Err("Chat identifier too long");
    }
    if chat.chars().any(char::is_control) {
        return Err("Chat identifier contains control characters");
    }
    Ok(())
}

/// Decode a client event using the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a valid event, or
/// names an invalid chat.
pub fn decode(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    decode_with_limit(data, MAX_EVENT_SIZE)
}

/// Decode a client event from a text frame.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_str(text: &str) -> Result<ClientEvent, ProtocolError> {
    decode(text.as_bytes())
}

/// Decode a client event, rejecting frames larger than `limit` bytes.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with_limit(data: &[u8], limit: usize) -> Result<ClientEvent, ProtocolError> {
    if data.len() > limit {
        return Err(ProtocolError::TooLarge {
            size: data.len(),
            limit,
        });
    }

    let event: ClientEvent = serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
    validate_chat_id(event.chat()).map_err(ProtocolError::Invalid)?;

    Ok(event)
}

/// Encode a relay event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &RelayEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}
