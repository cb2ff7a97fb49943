//! Backend webhook client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::BackendError;

const DISABLE_SYSTEM_PROXY_ENV: &str = "WABRIDGE_DISABLE_SYSTEM_PROXY";

/// Error bodies are truncated so a misbehaving backend can't flood the logs.
const MAX_ERROR_BODY: usize = 512;

/// One extracted message on its way to the backend. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardRequest {
    /// Conversation the message came from
    #[serde(rename = "sender")]
    pub conversation_id: String,
    /// Extracted text
    #[serde(rename = "message")]
    pub text: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl ForwardRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        message_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            message_id: message_id.into(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Webhook response body. Fields other than `success` and `reply_text` are
/// informational.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendReply {
    pub success: bool,
    #[serde(default)]
    pub reply_text: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BackendReply {
    pub fn ok(reply_text: impl Into<String>) -> Self {
        Self {
            success: true,
            reply_text: Some(reply_text.into()),
            ..Self::default()
        }
    }
}

/// A single backend call. Retrying is the relay's job.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn call(&self, request: &ForwardRequest) -> Result<BackendReply, BackendError>;
}

/// HTTP webhook backend.
pub struct HttpBackend {
    client: Client,
    webhook_url: String,
    health_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_http_client()?,
            webhook_url: config.webhook_url(),
            health_url: config.health_url(),
            timeout: config.backend_timeout(),
        })
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Query the backend health endpoint.
    pub async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    fn map_error(&self, error: reqwest::Error) -> BackendError {
        if error.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if error.is_decode() {
            BackendError::Decode(error.to_string())
        } else {
            BackendError::Http(error)
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn call(&self, request: &ForwardRequest) -> Result<BackendReply, BackendError> {
        debug!(
            message_id = %request.message_id,
            url = %self.webhook_url,
            "Calling backend webhook"
        );

        let response = self
            .client
            .post(&self.webhook_url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<BackendReply>()
            .await
            .map_err(|e| self.map_error(e))
    }
}

async fn status_error(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &body[..end])
    } else {
        body
    };
    BackendError::Status { status, body }
}

fn build_http_client() -> Result<Client, BackendError> {
    let builder = Client::builder();
    let builder = if should_disable_system_proxy() {
        builder.no_proxy()
    } else {
        builder
    };
    Ok(builder.build()?)
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
