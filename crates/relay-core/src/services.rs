//! External services the relay depends on.
//!
//! The relay never stores credentials or chats itself. It asks an
//! authentication service whether a `(username, token)` pair is valid and asks
//! the chat-management service to persist messages and membership changes.
//! Both are consumed through the traits below so the transport (HTTP in the
//! server binary, in-memory fakes in tests) stays swappable.

use async_trait::async_trait;
use dirc_relay_protocol::ChatId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by external services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered with a non-success status.
    #[error("Upstream rejected request with status {0}")]
    Rejected(u16),

    /// The service could not be reached.
    #[error("Upstream unreachable: {0}")]
    Transport(String),

    /// The service answered with a body the relay could not understand.
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// A chat as listed by the chat-management service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Chat identifier.
    pub id: ChatId,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl ChatInfo {
    /// Create a chat entry.
    #[must_use]
    pub fn new(id: impl Into<ChatId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Validates connection credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Succeeds only if `token` authorizes `username`.
    async fn authorize(&self, username: &str, token: &str) -> Result<(), ServiceError>;
}

/// Chat-management operations performed on a user's behalf.
///
/// Every call carries the user's bearer token unmodified.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// List the chats the token's user belongs to.
    async fn my_chats(&self, token: &str) -> Result<Vec<ChatInfo>, ServiceError>;

    /// Persist a message to a chat.
    async fn send_message(&self, token: &str, chat: &str, content: &str)
        -> Result<(), ServiceError>;

    /// Record that the user joined a chat.
    async fn record_join(&self, token: &str, chat: &str) -> Result<(), ServiceError>;

    /// Record that the user left a chat.
    async fn record_leave(&self, token: &str, chat: &str) -> Result<(), ServiceError>;
}
