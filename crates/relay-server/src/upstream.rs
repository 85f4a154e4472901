//! HTTP clients for the authentication and chat-management services.

use async_trait::async_trait;
use dirc_relay_core::{Authenticator, ChatDirectory, ChatInfo, ServiceError};
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use std::time::Duration;
use tracing::trace;

/// Build the shared HTTP client used for all upstream calls.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

fn parse_base(base_url: &str) -> Result<Url, ServiceError> {
    Url::parse(base_url).map_err(|e| ServiceError::Transport(format!("{base_url}: {e}")))
}

/// Append path segments to a base URL, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ServiceError::Transport(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Authentication service client.
///
/// `POST {base}/authorize` with the token as bearer and `{"username"}` as body;
/// only `200 OK` counts as success.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: Client,
    base: Url,
}

impl HttpAuthenticator {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn new(client: Client, base_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            client,
            base: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authorize(&self, username: &str, token: &str) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &["authorize"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "username": username }))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ServiceError::Rejected(status.as_u16())),
        }
    }
}

/// Chat-management service client.
#[derive(Debug, Clone)]
pub struct HttpChatDirectory {
    client: Client,
    base: Url,
}

impl HttpChatDirectory {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn new(client: Client, base_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            client,
            base: parse_base(base_url)?,
        })
    }

    async fn expect_success(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        trace!(url = %response.url(), status = status.as_u16(), "Upstream response");

        if status.is_success() {
            Ok(response)
        } else {
            Err(ServiceError::Rejected(status.as_u16()))
        }
    }
}

#[async_trait]
impl ChatDirectory for HttpChatDirectory {
    async fn my_chats(&self, token: &str) -> Result<Vec<ChatInfo>, ServiceError> {
        let url = endpoint(&self.base, &["mychats"])?;
        let response = self
            .expect_success(self.client.get(url).bearer_auth(token))
            .await?;

        response
            .json::<Vec<ChatInfo>>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }

    async fn send_message(
        &self,
        token: &str,
        chat: &str,
        content: &str,
    ) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &[chat, "send"])?;
        self.expect_success(
            self.client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "content": content })),
        )
        .await?;
        Ok(())
    }

    async fn record_join(&self, token: &str, chat: &str) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &[chat, "join"])?;
        self.expect_success(self.client.put(url).bearer_auth(token))
            .await?;
        Ok(())
    }

    async fn record_leave(&self, token: &str, chat: &str) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &[chat, "leave"])?;
        self.expect_success(self.client.put(url).bearer_auth(token))
            .await?;
        Ok(())
    }
}
