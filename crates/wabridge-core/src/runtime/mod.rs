//! Bridge runtime.
//!
//! The session manager owns the transport lifecycle and spawns one pipeline
//! task per admitted message. A message's pipeline never affects the session
//! or any other message.

pub mod backend;
pub mod dispatcher;
pub mod extractor;
pub mod filter;
pub mod pipeline;
pub mod relay;
pub mod session;

pub use backend::{BackendClient, BackendReply, ForwardRequest, HttpBackend};
pub use dispatcher::{DispatchReceipt, ReplyDispatcher};
pub use extractor::extract;
pub use filter::{SkipReason, admit};
pub use pipeline::{MessagePipeline, PipelineOutcome};
pub use relay::{BackendRelay, ForwardResult, RelayPolicy};
pub use session::{
    ConnectionStatus, ReconnectDecision, ReconnectPolicy, SessionExit, SessionManager,
    SessionState, decide_reconnect,
};
