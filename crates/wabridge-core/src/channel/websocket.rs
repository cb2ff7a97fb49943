//! WebSocket gateway transport.
//!
//! Talks to a transport gateway sidecar that owns the messaging protocol.
//! The gateway pushes JSON event frames and accepts JSON operation frames:
//!
//! ```text
//! gateway → bridge  {"event": "connection.update", "data": {"connection": "open"}}
//!                   {"event": "messages.upsert",   "data": {"type": "notify", "messages": [...]}}
//!                   {"event": "creds.update",      "data": { full credential document }}
//! bridge → gateway  {"op": "auth", "credentials": {...}}
//!                   {"op": "send", "id": "...", "to": "...", "text": "..."}
//!                   {"op": "read", "keys": [{...}]}
//!                   {"op": "presence", "presence": "composing", "to": "..."}
//!                   {"op": "close"}
//! ```

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{EventStream, Transport};
use super::types::{
    CloseCause, ConnectionUpdate, Credentials, InboundEvent, MessageKey, Presence,
    TransportEvent, UpsertKind,
};
use crate::config::BridgeConfig;
use crate::error::{TransportError, TransportResult};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    pub gateway_url: String,
    pub connect_timeout: Duration,
}

impl From<&BridgeConfig> for WsTransportConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Transport backed by a WebSocket connection to the gateway.
pub struct WsTransport {
    config: WsTransportConfig,
    writer: Arc<Mutex<Option<WsWriter>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Liveness flag of the current socket, cleared when its reader stops
    connected: parking_lot::Mutex<Arc<AtomicBool>>,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
            reader: parking_lot::Mutex::new(None),
            connected: parking_lot::Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Drop the current socket, if any. The reader task goes with it.
    async fn teardown(&self) {
        self.connected.lock().store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
    }

    async fn send_frame(&self, frame: Value) -> TransportResult<()> {
        if !self.connected.lock().load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(WsMessage::Text(frame.to_string().into()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn open(&self, credentials: &Credentials) -> TransportResult<EventStream> {
        self.teardown().await;

        info!("Connecting to transport gateway: {}", self.config.gateway_url);
        let (ws_stream, _) = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.gateway_url.as_str()),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout(self.config.connect_timeout))??;

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let auth = json!({ "op": "auth", "credentials": credentials });
        ws_write
            .send(WsMessage::Text(auth.to_string().into()))
            .await?;
        *self.writer.lock().await = Some(ws_write);

        let (tx, rx) = mpsc::channel::<TransportEvent>(EVENT_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        *self.connected.lock() = connected.clone();

        let reader = tokio::spawn(async move {
            let _guard = scopeguard::guard((), |_| {
                connected.store(false, Ordering::SeqCst);
            });
            let mut close_reported = false;

            while let Some(msg_result) = ws_read.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Gateway WebSocket error: {}", e);
                        break;
                    }
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(frame) => {
                        debug!("Gateway sent close frame: {:?}", frame);
                        break;
                    }
                    _ => continue,
                };

                let events = match decode_frame(text.as_str()) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Skipping undecodable gateway frame: {}", e);
                        continue;
                    }
                };

                for event in events {
                    if matches!(
                        event,
                        TransportEvent::Connection(ConnectionUpdate::Close(_))
                    ) {
                        close_reported = true;
                    }
                    if tx.send(event).await.is_err() {
                        debug!("Transport event receiver dropped");
                        return;
                    }
                }

                if close_reported {
                    break;
                }
            }

            if !close_reported {
                let _ = tx
                    .send(TransportEvent::Connection(ConnectionUpdate::Close(
                        CloseCause::connection_closed(),
                    )))
                    .await;
            }
            info!("Gateway connection ended");
        });
        *self.reader.lock() = Some(reader);

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn send_text(&self, to: &str, text: &str) -> TransportResult<()> {
        self.send_frame(json!({
            "op": "send",
            "id": Uuid::new_v4().to_string(),
            "to": to,
            "text": text,
        }))
        .await
    }

    async fn acknowledge(&self, key: &MessageKey) -> TransportResult<()> {
        self.send_frame(json!({ "op": "read", "keys": [key] })).await
    }

    async fn signal_presence(&self, presence: Presence, to: Option<&str>) -> TransportResult<()> {
        let mut frame = json!({ "op": "presence", "presence": presence.as_str() });
        if let Some(to) = to {
            frame["to"] = Value::String(to.to_string());
        }
        self.send_frame(frame).await
    }

    async fn close(&self) -> TransportResult<()> {
        // Best effort: the gateway may already be gone.
        if let Err(e) = self.send_frame(json!({ "op": "close" })).await {
            debug!("Gateway close frame not delivered: {}", e);
        }
        self.teardown().await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum GatewayFrame {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdateData),
    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessagesUpsertData),
    #[serde(rename = "creds.update")]
    CredsUpdate(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionUpdateData {
    #[serde(default)]
    connection: Option<String>,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    last_disconnect: Option<CloseCause>,
}

#[derive(Debug, Deserialize)]
struct MessagesUpsertData {
    #[serde(rename = "type")]
    kind: UpsertKind,
    /// Decoded entry by entry so one malformed message doesn't drop the batch.
    #[serde(default)]
    messages: Vec<Value>,
}

fn decode_messages(raw: Vec<Value>) -> Vec<InboundEvent> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let id = value
                .pointer("/key/id")
                .and_then(Value::as_str)
                .map(str::to_owned);
            match serde_json::from_value::<InboundEvent>(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(index, message_id = ?id, "Skipping undecodable message: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Decode one gateway text frame into transport events.
fn decode_frame(text: &str) -> Result<Vec<TransportEvent>, serde_json::Error> {
    let frame: GatewayFrame = serde_json::from_str(text)?;

    let events = match frame {
        GatewayFrame::ConnectionUpdate(data) => {
            let mut events = Vec::new();
            if let Some(qr) = data.qr.filter(|qr| !qr.is_empty()) {
                events.push(TransportEvent::Connection(ConnectionUpdate::QrIssued(qr)));
            }
            match data.connection.as_deref() {
                Some("connecting") => {
                    events.push(TransportEvent::Connection(ConnectionUpdate::Connecting))
                }
                Some("open") => events.push(TransportEvent::Connection(ConnectionUpdate::Open)),
                Some("close") => events.push(TransportEvent::Connection(
                    ConnectionUpdate::Close(data.last_disconnect.unwrap_or_default()),
                )),
                Some(other) => debug!("Unknown connection state: {}", other),
                None => {}
            }
            events
        }
        GatewayFrame::MessagesUpsert(data) => vec![TransportEvent::Messages {
            kind: data.kind,
            events: decode_messages(data.messages),
        }],
        GatewayFrame::CredsUpdate(value) => {
            vec![TransportEvent::CredentialsUpdated(Credentials::new(value))]
        }
    };
    Ok(events)
}
