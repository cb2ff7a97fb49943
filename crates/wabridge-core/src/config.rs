//! Bridge configuration
//!
//! Every option has a default so an empty (or missing) config file yields a
//! working bridge pointed at a local backend and gateway.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::paths;

/// Reply sent to the user when the backend is unreachable or reports failure.
pub const DEFAULT_FALLBACK_REPLY: &str = "Sorry, I am having trouble processing your request right now. Please try again in a moment.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend base URL
    pub backend_url: String,
    /// Path of the message webhook, appended to `backend_url`
    pub webhook_path: String,
    /// Path of the backend health endpoint
    pub health_path: String,
    /// Per-attempt backend timeout in seconds
    pub backend_timeout_secs: u64,
    /// Total backend attempts per message (first call included)
    pub max_forward_attempts: u32,
    /// Base delay between backend attempts; attempt `n` waits `n * base`
    pub forward_retry_base_delay_ms: u64,
    /// Fixed delay before each reconnect
    pub reconnect_interval_secs: u64,
    /// Reconnects allowed before the bridge gives up
    pub max_reconnect_attempts: u32,
    /// WebSocket URL of the transport gateway
    pub gateway_url: String,
    /// Gateway connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Credential file; defaults to ~/.wabridge/auth/creds.json
    pub credentials_path: Option<PathBuf>,
    pub fallback_reply: String,
    /// Send composing/paused presence around each reply
    pub presence_signals: bool,
    /// Source tag forwarded with every message
    pub source: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            webhook_path: "/api/v1/whatsapp/webhook".to_string(),
            health_path: "/api/v1/whatsapp/health".to_string(),
            backend_timeout_secs: 30,
            max_forward_attempts: 3,
            forward_retry_base_delay_ms: 2_000,
            reconnect_interval_secs: 5,
            max_reconnect_attempts: 10,
            gateway_url: "ws://127.0.0.1:3001/socket".to_string(),
            connect_timeout_secs: 20,
            credentials_path: None,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            presence_signals: true,
            source: "whatsapp".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn forward_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.forward_retry_base_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn webhook_url(&self) -> String {
        join_url(&self.backend_url, &self.webhook_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.backend_url, &self.health_path)
    }

    /// Configured credential file, or the default under the bridge directory.
    pub fn resolved_credentials_path(&self) -> anyhow::Result<PathBuf> {
        match &self.credentials_path {
            Some(path) => Ok(path.clone()),
            None => paths::credentials_path(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.backend_url).map_err(|e| ConfigError::Invalid {
            field: "backend_url",
            reason: e.to_string(),
        })?;

        let gateway = Url::parse(&self.gateway_url).map_err(|e| ConfigError::Invalid {
            field: "gateway_url",
            reason: e.to_string(),
        })?;
        if !matches!(gateway.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid {
                field: "gateway_url",
                reason: format!("expected ws:// or wss://, got {}://", gateway.scheme()),
            });
        }

        if self.max_forward_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_forward_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "backend_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fallback_reply.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "fallback_reply",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
