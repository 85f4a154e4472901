//! Connection handshake: authentication gate and membership bootstrap.
//!
//! A connection attempt carries `username` and `access_token` query
//! parameters. The gate checks both are present and asks the authentication
//! service to vouch for the pair. Once accepted, the bootstrapper fetches the
//! user's chats so the connection receives broadcasts for them from the start.

use crate::registry::close_code;
use crate::services::{Authenticator, ChatDirectory, ServiceError};
use dirc_relay_protocol::ChatId;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Query parameters of a connection request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeParams {
    /// Username the client claims.
    pub username: Option<String>,
    /// Bearer credential for that username.
    pub access_token: Option<String>,
}

/// Credentials of an accepted connection.
///
/// The token is kept for the connection's lifetime and forwarded as the
/// bearer credential on every chat-management call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    token: String,
}

impl Credentials {
    /// Create credentials from already-validated parts.
    #[must_use]
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// The authenticated username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Reasons a connection attempt is refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No `username` parameter.
    #[error("username parameter is required")]
    MissingUsername,

    /// No `access_token` parameter.
    #[error("access_token parameter is required")]
    MissingToken,

    /// The authentication service did not accept the credentials.
    #[error("failed to authenticate")]
    Unauthorized(#[source] ServiceError),

    /// The initial chat list could not be fetched and policy is to reject.
    #[error("failed to load chats")]
    BootstrapFailed(#[source] ServiceError),

    /// The relay is not accepting more connections.
    #[error("server is at capacity")]
    CapacityReached,
}

impl HandshakeError {
    /// WebSocket close code to send.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::MissingUsername
            | HandshakeError::MissingToken
            | HandshakeError::Unauthorized(_) => close_code::POLICY,
            HandshakeError::BootstrapFailed(_) => close_code::ERROR,
            HandshakeError::CapacityReached => close_code::AGAIN,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeError::MissingUsername => "missing_username",
            HandshakeError::MissingToken => "missing_token",
            HandshakeError::Unauthorized(_) => "unauthorized",
            HandshakeError::BootstrapFailed(_) => "bootstrap_failed",
            HandshakeError::CapacityReached => "capacity",
        }
    }
}

/// What to do when the initial chat list cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Admit the connection with no memberships.
    #[default]
    Admit,
    /// Refuse the connection.
    Reject,
}

/// Validate a connection attempt.
///
/// Empty parameters are treated as absent.
///
/// # Errors
///
/// Returns an error if a parameter is missing or the authentication service
/// rejects the pair.
pub async fn authenticate(
    params: HandshakeParams,
    auth: &dyn Authenticator,
) -> Result<Credentials, HandshakeError> {
    let username = params
        .username
        .filter(|u| !u.is_empty())
        .ok_or(HandshakeError::MissingUsername)?;
    let token = params
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeError::MissingToken)?;

    if let Err(e) = auth.authorize(&username, &token).await {
        warn!(user = %username, error = %e, "Failed to authenticate user");
        return Err(HandshakeError::Unauthorized(e));
    }

    debug!(user = %username, "Authenticated");
    Ok(Credentials::new(username, token))
}

/// Fetch the chats an accepted user already belongs to.
///
/// Duplicate identifiers in the upstream response are collapsed.
///
/// # Errors
///
/// Returns [`HandshakeError::BootstrapFailed`] if the fetch fails and
/// `policy` is [`BootstrapPolicy::Reject`].
pub async fn bootstrap(
    credentials: &Credentials,
    chats: &dyn ChatDirectory,
    policy: BootstrapPolicy,
) -> Result<Vec<ChatId>, HandshakeError> {
    match chats.my_chats(credentials.token()).await {
        Ok(list) => {
            let mut seen = HashSet::new();
            let ids: Vec<ChatId> = list
                .into_iter()
                .map(|chat| chat.id)
                .filter(|id| !id.is_empty() && seen.insert(id.clone()))
                .collect();
            debug!(user = %credentials.username(), chats = ids.len(), "Bootstrapped chats");
            Ok(ids)
        }
        Err(e) => match policy {
            BootstrapPolicy::Admit => {
                warn!(
                    user = %credentials.username(),
                    error = %e,
                    "Failed to load chats, admitting with no memberships"
                );
                Ok(Vec::new())
            }
            BootstrapPolicy::Reject => {
                warn!(user = %credentials.username(), error = %e, "Failed to load chats");
                Err(HandshakeError::BootstrapFailed(e))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ChatInfo;
    use async_trait::async_trait;

    struct StaticAuth;

    #[async_trait]
    impl Authenticator for StaticAuth {
        async fn authorize(&self, username: &str, token: &str) -> Result<(), ServiceError> {
            if token == format!("{username}-token") {
                Ok(())
            } else {
                Err(ServiceError::Rejected(401))
            }
        }
    }

    struct StaticChats(Option<Vec<ChatInfo>>);

    #[async_trait]
    impl ChatDirectory for StaticChats {
        async fn my_chats(&self, _token: &str) -> Result<Vec<ChatInfo>, ServiceError> {
            self.0
                .clone()
                .ok_or_else(|| ServiceError::Transport("connection refused".into()))
        }

        async fn send_message(&self, _: &str, _: &str, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn record_join(&self, _: &str, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn record_leave(&self, _: &str, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn params(username: Option<&str>, token: Option<&str>) -> HandshakeParams {
        HandshakeParams {
            username: username.map(String::from),
            access_token: token.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_authenticate_accepts_valid_pair() {
        let creds = authenticate(params(Some("alice"), Some("alice-token")), &StaticAuth)
            .await
            .unwrap();
        assert_eq!(creds.username(), "alice");
        assert_eq!(creds.token(), "alice-token");
    }

    #[tokio::test]
    async fn test_authenticate_missing_params() {
        let err = authenticate(params(None, Some("t")), &StaticAuth)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MissingUsername));
        assert_eq!(err.close_code(), close_code::POLICY);

        let err = authenticate(params(Some("alice"), None), &StaticAuth)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MissingToken));
        assert_eq!(err.to_string(), "access_token parameter is required");

        let err = authenticate(params(Some(""), Some("t")), &StaticAuth)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MissingUsername));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let err = authenticate(params(Some("alice"), Some("bob-token")), &StaticAuth)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Unauthorized(_)));
        assert_eq!(err.close_code(), close_code::POLICY);
        assert_eq!(err.kind(), "unauthorized");
    }

    #[tokio::test]
    async fn test_bootstrap_collects_ids() {
        let chats = StaticChats(Some(vec![
            ChatInfo::new("c1", "one"),
            ChatInfo::new("c2", "two"),
            ChatInfo::new("c1", "one again"),
        ]));
        let creds = Credentials::new("alice", "alice-token");

        let ids = bootstrap(&creds, &chats, BootstrapPolicy::Admit)
            .await
            .unwrap();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_policy() {
        let chats = StaticChats(None);
        let creds = Credentials::new("alice", "alice-token");

        let ids = bootstrap(&creds, &chats, BootstrapPolicy::Admit)
            .await
            .unwrap();
        assert!(ids.is_empty());

        let err = bootstrap(&creds, &chats, BootstrapPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::BootstrapFailed(_)));
        assert_eq!(err.close_code(), close_code::ERROR);
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = Credentials::new("alice", "secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }
}
