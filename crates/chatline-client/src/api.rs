//! Request/response calls to the chatline server.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::{Message, UserId, UserProfile};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Everyone except the caller, for the sidebar.
    async fn list_users(&self) -> Result<Vec<UserProfile>>;

    /// Conversation with `peer`, oldest first.
    async fn get_messages(&self, peer: &UserId) -> Result<Vec<Message>>;

    /// Persist a message. The returned message is the only confirmation.
    async fn send_message(&self, receiver: &UserId, content: SendMessageRequest) -> Result<Message>;
}

#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    config: ClientConfig,
    token: String,
}

impl HttpApi {
    pub fn new(config: ClientConfig, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            token: token.into(),
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthenticationFailed);
        }
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body["error"].as_str().map(String::from))
            .unwrap_or_else(|| status.to_string());
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let response = self
            .client
            .get(self.config.http_url("/api/messages/users"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_messages(&self, peer: &UserId) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(self.config.http_url(&format!("/api/messages/{peer}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send_message(&self, receiver: &UserId, content: SendMessageRequest) -> Result<Message> {
        debug!(to = %receiver, "Sending message");
        let response = self
            .client
            .post(self.config.http_url(&format!("/api/messages/send/{receiver}")))
            .bearer_auth(&self.token)
            .json(&content)
            .send()
            .await?;
        Self::decode(response).await
    }
}
