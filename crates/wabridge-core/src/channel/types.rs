//! Transport Types
//!
//! Payload shapes exchanged with the messaging transport. Field names follow
//! the transport's camelCase wire format so events deserialize as-is.

use serde::{Deserialize, Deserializer, Serialize};

/// Identifies a single message within a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Conversation identifier (user, group or broadcast address)
    #[serde(default)]
    pub remote_jid: Option<String>,
    /// Message ID
    #[serde(default)]
    pub id: String,
    /// Whether this account sent the message
    #[serde(default)]
    pub from_me: bool,
    /// Group participant that sent the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsResponseMessage {
    #[serde(default)]
    pub selected_button_id: Option<String>,
    #[serde(default)]
    pub selected_display_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponseMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Message content union. Several shapes may be present at once; an event
/// carrying none of them is unrecognized content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default)]
    pub buttons_response_message: Option<ButtonsResponseMessage>,
    #[serde(default)]
    pub list_response_message: Option<ListResponseMessage>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn extended_text(text: impl Into<String>) -> Self {
        Self {
            extended_text_message: Some(ExtendedTextMessage {
                text: Some(text.into()),
            }),
            ..Self::default()
        }
    }

    pub fn button_reply(display_text: impl Into<String>) -> Self {
        Self {
            buttons_response_message: Some(ButtonsResponseMessage {
                selected_button_id: None,
                selected_display_text: Some(display_text.into()),
            }),
            ..Self::default()
        }
    }

    pub fn list_reply(title: impl Into<String>) -> Self {
        Self {
            list_response_message: Some(ListResponseMessage {
                title: Some(title.into()),
                description: None,
            }),
            ..Self::default()
        }
    }
}

/// One raw inbound message event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessagePayload>,
    /// Seconds since epoch; the transport sends either a number or a string
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub message_timestamp: Option<i64>,
    #[serde(default)]
    pub push_name: Option<String>,
}

impl InboundEvent {
    pub fn new(
        remote_jid: impl Into<String>,
        id: impl Into<String>,
        message: MessagePayload,
    ) -> Self {
        Self {
            key: MessageKey {
                remote_jid: Some(remote_jid.into()),
                id: id.into(),
                from_me: false,
                participant: None,
            },
            message: Some(message),
            message_timestamp: None,
            push_name: None,
        }
    }

    pub fn with_from_me(mut self, from_me: bool) -> Self {
        self.key.from_me = from_me;
        self
    }

    pub fn with_timestamp(mut self, seconds: i64) -> Self {
        self.message_timestamp = Some(seconds);
        self
    }

    /// Conversation identifier, if present and non-empty.
    pub fn conversation_id(&self) -> Option<&str> {
        self.key
            .remote_jid
            .as_deref()
            .map(str::trim)
            .filter(|jid| !jid.is_empty())
    }

    pub fn message_id(&self) -> &str {
        &self.key.id
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    /// Numbers, numeric strings and 64-bit `{low, high}` pairs are accepted;
    /// any other shape decodes as no timestamp.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
        Long {
            low: i64,
            #[serde(default)]
            high: i64,
        },
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(value)) => Some(value),
        Some(Raw::Text(text)) => text.trim().parse().ok(),
        Some(Raw::Long { low, high }) => Some((high << 32) | i64::from(low as u32)),
        Some(Raw::Other(_)) | None => None,
    })
}

/// Why a connection closed, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseCause {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Disconnect classification driving the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    LoggedOut,
    Banned,
    Unauthorized,
    /// Network blip, server-side close, replaced connection, etc.
    Transient,
}

impl DisconnectKind {
    /// Reconnecting after these would be pointless or harmful.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Banned => "banned",
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
        }
    }
}

impl std::fmt::Display for DisconnectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CloseCause {
    pub const LOGGED_OUT: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const CONNECTION_LOST: u16 = 408;
    pub const CONNECTION_CLOSED: u16 = 428;

    pub fn new(status_code: Option<u16>, message: Option<String>) -> Self {
        Self {
            status_code,
            message,
        }
    }

    /// Socket ended without the transport reporting a reason.
    pub fn connection_closed() -> Self {
        Self::new(
            Some(Self::CONNECTION_CLOSED),
            Some("connection closed".to_string()),
        )
    }

    /// Session could not be opened at all.
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::new(Some(Self::CONNECTION_LOST), Some(reason.into()))
    }

    pub fn kind(&self) -> DisconnectKind {
        match self.status_code {
            Some(Self::LOGGED_OUT) => return DisconnectKind::LoggedOut,
            Some(Self::FORBIDDEN) => return DisconnectKind::Banned,
            _ => {}
        }

        let message = self
            .message
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
            .replace(['-', '_'], " ");
        if message.contains("logged out") {
            DisconnectKind::LoggedOut
        } else if message.contains("banned") {
            DisconnectKind::Banned
        } else if message.contains("not authorized") || message.contains("unauthorized") {
            DisconnectKind::Unauthorized
        } else {
            DisconnectKind::Transient
        }
    }
}

/// Connection-state notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Connecting,
    Open,
    Close(CloseCause),
    /// Pairing code issued; the payload is what a QR code would encode
    QrIssued(String),
}

/// Presence states the bridge signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Paused,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Composing => "composing",
            Self::Paused => "paused",
        }
    }
}

/// Kind of a message batch: live delivery or history sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    Notify,
    Append,
}

/// Opaque credential document owned by the session.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Credentials {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// True when nothing has been persisted yet (fresh pairing).
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Credentials(<empty>)")
        } else {
            f.write_str("Credentials(<redacted>)")
        }
    }
}

/// Everything a transport session can emit.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connection(ConnectionUpdate),
    Messages {
        kind: UpsertKind,
        events: Vec<InboundEvent>,
    },
    CredentialsUpdated(Credentials),
}
