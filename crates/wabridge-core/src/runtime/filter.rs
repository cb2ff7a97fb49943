//! Pre-pipeline admission checks.
//!
//! Group conversations, broadcast/status channels and our own messages never
//! reach extraction. These exclusions are fixed, not configurable.

use crate::channel::InboundEvent;

const BROADCAST_SUFFIX: &str = "@broadcast";
const GROUP_SUFFIX: &str = "@g.us";

/// Why an event was dropped before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoConversation,
    Broadcast,
    Group,
    SelfOriginated,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConversation => "no_conversation",
            Self::Broadcast => "broadcast",
            Self::Group => "group",
            Self::SelfOriginated => "self",
        }
    }
}

/// Admit an event into the pipeline, returning its conversation id.
pub fn admit(event: &InboundEvent) -> Result<&str, SkipReason> {
    let conversation = event.conversation_id().ok_or(SkipReason::NoConversation)?;

    if conversation.ends_with(BROADCAST_SUFFIX) {
        return Err(SkipReason::Broadcast);
    }
    if conversation.ends_with(GROUP_SUFFIX) {
        return Err(SkipReason::Group);
    }
    if event.key.from_me {
        return Err(SkipReason::SelfOriginated);
    }
    Ok(conversation)
}
