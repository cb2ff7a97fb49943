//! Reply delivery through the transport.
//!
//! A reply is sent at most once. Presence and read-receipt failures are
//! logged and never turn into a resend.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::session::{ConnectionStatus, SessionState};
use crate::channel::{MessageKey, Presence, Transport};
use crate::error::DispatchError;

/// Outcome of a delivered reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Whether the originating message was marked read
    pub acknowledged: bool,
}

pub struct ReplyDispatcher {
    transport: Arc<dyn Transport>,
    session: watch::Receiver<SessionState>,
    presence_signals: bool,
}

impl ReplyDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: watch::Receiver<SessionState>,
        presence_signals: bool,
    ) -> Self {
        Self {
            transport,
            session,
            presence_signals,
        }
    }

    /// Send `text` to `destination` and mark `origin` as read.
    ///
    /// Fails with `NotConnected` without touching the transport when the
    /// session isn't open at send time. A failed send still attempts the
    /// read receipt before reporting `SendFailed`.
    pub async fn dispatch(
        &self,
        destination: &str,
        text: &str,
        origin: &MessageKey,
    ) -> Result<DispatchReceipt, DispatchError> {
        if self.session.borrow().status != ConnectionStatus::Open {
            return Err(DispatchError::NotConnected);
        }

        if self.presence_signals {
            self.presence(Presence::Composing, destination).await;
        }

        let sent = self.transport.send_text(destination, text).await;

        if self.presence_signals {
            self.presence(Presence::Paused, destination).await;
        }

        let acknowledged = match self.transport.acknowledge(origin).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    message_id = %origin.id,
                    conversation = destination,
                    error = %e,
                    "Failed to mark message as read"
                );
                false
            }
        };

        sent.map_err(DispatchError::SendFailed)?;
        debug!(conversation = destination, "Reply sent");
        Ok(DispatchReceipt { acknowledged })
    }

    async fn presence(&self, presence: Presence, destination: &str) {
        if let Err(e) = self
            .transport
            .signal_presence(presence, Some(destination))
            .await
        {
            debug!(
                presence = presence.as_str(),
                conversation = destination,
                error = %e,
                "Presence update failed"
            );
        }
    }
}
