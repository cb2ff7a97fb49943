//! Per-message pipeline: filter → extract → relay → dispatch.
//!
//! Every failure is contained here and reported as a `PipelineOutcome`;
//! nothing propagates back to the session.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::backend::ForwardRequest;
use super::dispatcher::ReplyDispatcher;
use super::extractor::extract;
use super::filter::{SkipReason, admit};
use super::relay::BackendRelay;
use crate::channel::InboundEvent;
use crate::error::DispatchError;

#[derive(Debug)]
pub enum PipelineOutcome {
    /// Dropped before extraction
    Skipped(SkipReason),
    /// No extractable text; dropped silently
    Unsupported,
    /// A reply went out
    Delivered {
        reply: String,
        fallback: bool,
        acknowledged: bool,
    },
    /// The reply could not be sent
    DeliveryFailed(DispatchError),
}

impl PipelineOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

pub struct MessagePipeline {
    relay: BackendRelay,
    dispatcher: ReplyDispatcher,
    source: String,
}

impl MessagePipeline {
    pub fn new(
        relay: BackendRelay,
        dispatcher: ReplyDispatcher,
        source: impl Into<String>,
    ) -> Self {
        Self {
            relay,
            dispatcher,
            source: source.into(),
        }
    }

    pub async fn process(&self, event: InboundEvent) -> PipelineOutcome {
        let conversation = match admit(&event) {
            Ok(conversation) => conversation.to_string(),
            Err(reason) => {
                debug!(
                    message_id = %event.message_id(),
                    reason = reason.as_str(),
                    "Skipping message"
                );
                return PipelineOutcome::Skipped(reason);
            }
        };

        let Some(text) = extract(&event) else {
            info!(
                message_id = %event.message_id(),
                conversation = %conversation,
                "Skipping unsupported message content"
            );
            return PipelineOutcome::Unsupported;
        };

        info!(
            message_id = %event.message_id(),
            conversation = %conversation,
            "Processing message"
        );
        debug!(
            message_id = %event.message_id(),
            push_name = ?event.push_name,
            text = %text,
            "Extracted text"
        );

        let request = ForwardRequest::new(&conversation, text, event.message_id(), &self.source)
            .with_timestamp(event_time(&event));

        let (reply, fallback) = match self.relay.forward(request).await {
            Ok(result) => (result.reply, result.fallback),
            Err(e) => {
                warn!(
                    message_id = %event.message_id(),
                    error = %e,
                    "Backend relay exhausted, sending fallback reply"
                );
                (self.relay.fallback_reply().to_string(), true)
            }
        };

        match self.dispatcher.dispatch(&conversation, &reply, &event.key).await {
            Ok(receipt) => {
                info!(
                    message_id = %event.message_id(),
                    conversation = %conversation,
                    fallback,
                    "Reply delivered"
                );
                PipelineOutcome::Delivered {
                    reply,
                    fallback,
                    acknowledged: receipt.acknowledged,
                }
            }
            Err(e) => {
                warn!(
                    message_id = %event.message_id(),
                    conversation = %conversation,
                    error = %e,
                    "Reply delivery failed"
                );
                PipelineOutcome::DeliveryFailed(e)
            }
        }
    }
}

fn event_time(event: &InboundEvent) -> DateTime<Utc> {
    event
        .message_timestamp
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}
