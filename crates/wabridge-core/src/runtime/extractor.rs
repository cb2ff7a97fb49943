//! Content extraction from inbound message payloads.

use crate::channel::InboundEvent;

/// Extract the user's text from an event, or `None` when the content is
/// unsupported.
///
/// Checked in order: plain conversation text, extended (quoted/linked) text,
/// the selected button's label, the selected list row's title. Empty fields
/// fall through to the next shape; a whitespace-only result counts as
/// unsupported.
pub fn extract(event: &InboundEvent) -> Option<String> {
    let payload = event.message.as_ref()?;

    let candidates = [
        payload.conversation.as_deref(),
        payload
            .extended_text_message
            .as_ref()
            .and_then(|m| m.text.as_deref()),
        payload
            .buttons_response_message
            .as_ref()
            .and_then(|m| m.selected_display_text.as_deref()),
        payload
            .list_response_message
            .as_ref()
            .and_then(|m| m.title.as_deref()),
    ];

    let text = candidates
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty())?
        .trim();

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
