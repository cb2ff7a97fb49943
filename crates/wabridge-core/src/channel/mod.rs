//! Transport Boundary
//!
//! The messaging transport is an external collaborator. This module defines
//! the capability interface the bridge drives, the payload types it emits,
//! and the credential store that persists the session identity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           trait Transport               │
//! │  - open(credentials) -> EventStream     │
//! │  - send_text / acknowledge / presence   │
//! │  - close                                │
//! └─────────────────────────────────────────┘
//!              │
//!        ┌─────┴─────┐
//!        ▼           ▼
//!   WsTransport  MockTransport (tests)
//! ```

mod credentials;
mod traits;
mod types;
pub mod websocket;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use traits::{EventStream, Transport};
pub use types::{
    ButtonsResponseMessage, CloseCause, ConnectionUpdate, Credentials, DisconnectKind,
    ExtendedTextMessage, InboundEvent, ListResponseMessage, MessageKey, MessagePayload, Presence,
    TransportEvent, UpsertKind,
};
pub use websocket::{WsTransport, WsTransportConfig};

#[cfg(test)]
pub use traits::mock;
