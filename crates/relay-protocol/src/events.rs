//! Event types for the relay protocol.
//!
//! Events are adjacently tagged: the `action` field names the variant and the
//! `payload` object holds its fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A chat room identifier, as issued by the chat-management service.
pub type ChatId = String;

/// Current time as fractional seconds since the Unix epoch.
#[must_use]
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64 / 1000.0)
        .unwrap_or_default()
}

/// Action tag shared by inbound and outbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Message,
    Join,
    Leave,
}

impl Action {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::Message => "MESSAGE",
            Action::Join => "JOIN",
            Action::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event sent by a client over its connection.
///
/// Sender and timestamp are implied by the connection; any such fields a
/// client puts in the payload are ignored on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "UPPERCASE")]
pub enum ClientEvent {
    /// Post a message to a chat.
    Message {
        /// Target chat.
        chat: ChatId,
        /// Message body.
        content: String,
    },

    /// Start receiving broadcasts for a chat.
    Join {
        /// Chat to join.
        chat: ChatId,
    },

    /// Stop receiving broadcasts for a chat.
    Leave {
        /// Chat to leave.
        chat: ChatId,
    },
}

impl ClientEvent {
    /// Build a MESSAGE event.
    #[must_use]
    pub fn message(chat: impl Into<ChatId>, content: impl Into<String>) -> Self {
        ClientEvent::Message {
            chat: chat.into(),
            content: content.into(),
        }
    }

    /// Build a JOIN event.
    #[must_use]
    pub fn join(chat: impl Into<ChatId>) -> Self {
        ClientEvent::Join { chat: chat.into() }
    }

    /// Build a LEAVE event.
    #[must_use]
    pub fn leave(chat: impl Into<ChatId>) -> Self {
        ClientEvent::Leave { chat: chat.into() }
    }

    /// The event's action tag.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            ClientEvent::Message { .. } => Action::Message,
            ClientEvent::Join { .. } => Action::Join,
            ClientEvent::Leave { .. } => Action::Leave,
        }
    }

    /// The chat this event targets.
    #[must_use]
    pub fn chat(&self) -> &str {
        match self {
            ClientEvent::Message { chat, .. }
            | ClientEvent::Join { chat }
            | ClientEvent::Leave { chat } => chat,
        }
    }
}

/// An event as broadcast by the relay to chat members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "UPPERCASE")]
pub enum RelayEvent {
    /// A chat message.
    Message {
        chat: ChatId,
        content: String,
        /// Username of the author, injected by the relay.
        sender: String,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },

    /// A member joined the chat.
    Join {
        chat: ChatId,
        sender: String,
        timestamp: f64,
    },

    /// A member left the chat.
    Leave {
        chat: ChatId,
        sender: String,
        timestamp: f64,
    },
}

impl RelayEvent {
    /// Stamp a client event with its sender and a timestamp.
    #[must_use]
    pub fn from_client(event: ClientEvent, sender: impl Into<String>, timestamp: f64) -> Self {
        let sender = sender.into();
        match event {
            ClientEvent::Message { chat, content } => RelayEvent::Message {
                chat,
                content,
                sender,
                timestamp,
            },
            ClientEvent::Join { chat } => RelayEvent::Join {
                chat,
                sender,
                timestamp,
            },
            ClientEvent::Leave { chat } => RelayEvent::Leave {
                chat,
                sender,
                timestamp,
            },
        }
    }

    /// The event's action tag.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            RelayEvent::Message { .. } => Action::Message,
            RelayEvent::Join { .. } => Action::Join,
            RelayEvent::Leave { .. } => Action::Leave,
        }
    }

    /// The chat this event belongs to.
    #[must_use]
    pub fn chat(&self) -> &str {
        match self {
            RelayEvent::Message { chat, .. }
            | RelayEvent::Join { chat, .. }
            | RelayEvent::Leave { chat, .. } => chat,
        }
    }

    /// Username of the member that caused the event.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            RelayEvent::Message { sender, .. }
            | RelayEvent::Join { sender, .. }
            | RelayEvent::Leave { sender, .. } => sender,
        }
    }
}
