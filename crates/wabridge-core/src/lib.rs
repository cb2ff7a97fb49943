//! Messaging bridge core.
//!
//! Keeps one long-lived transport session alive, relays inbound user text to
//! a backend webhook and delivers the backend's reply to the originating
//! conversation.
//!
//! ```text
//! Transport ──events──▶ SessionManager ──spawn──▶ MessagePipeline
//!     ▲                                            filter → extract
//!     │                                            → BackendRelay (retry)
//!     └──────────── send / read / presence ◀────── → ReplyDispatcher
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod paths;
pub mod runtime;

pub use config::BridgeConfig;
pub use error::{BackendError, ConfigError, DispatchError, RelayError, TransportError};
