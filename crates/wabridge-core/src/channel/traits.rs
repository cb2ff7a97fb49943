//! Transport Trait Definitions

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::{Credentials, MessageKey, Presence, TransportEvent};
use crate::error::TransportResult;

/// Event stream of one transport session. Ends when the socket is gone.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Capability interface of the messaging transport.
///
/// A transport holds at most one live socket. `open` tears down whatever
/// socket came before and returns the event stream of the new one; the
/// outbound operations always act on the most recently opened socket.
///
/// # Example
///
/// ```ignore
/// let mut events = transport.open(&credentials).await?;
/// while let Some(event) = events.next().await {
///     // connection updates, message batches, credential updates
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport display name for logs
    fn name(&self) -> &str {
        "transport"
    }

    /// Open a new session with the given persisted credentials
    async fn open(&self, credentials: &Credentials) -> TransportResult<EventStream>;

    /// Send a text message to a conversation
    async fn send_text(&self, to: &str, text: &str) -> TransportResult<()>;

    /// Mark a message as read
    async fn acknowledge(&self, key: &MessageKey) -> TransportResult<()>;

    /// Signal presence, globally or towards one conversation
    async fn signal_presence(&self, presence: Presence, to: Option<&str>) -> TransportResult<()>;

    /// Terminate the current session
    async fn close(&self) -> TransportResult<()>;
}
