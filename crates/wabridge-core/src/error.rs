//! Error types for the bridge core

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport session is not open")]
    NotConnected,

    #[error("Timed out connecting to transport after {0:?}")]
    ConnectTimeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// A single failed backend call.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid backend response: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Terminal failure of the relay after its attempt budget is spent.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Backend unreachable after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: BackendError,
    },
}

/// Reply delivery failures. Neither is retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Failed to send reply: {0}")]
    SendFailed(#[source] TransportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
