//! Session lifecycle and reconnect policy.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Open ──▶ Closing ──▶ Disconnected
//!      ▲                                                   │
//!      └────────── wait reconnect_interval ◀── transient ──┤
//!                                                          └── terminal / budget spent ──▶ exit
//! ```
//!
//! The manager is the only writer of session state. Inbound messages are
//! handed to independently spawned pipeline tasks; their outcome never feeds
//! back into the connection state.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::BackendClient;
use super::dispatcher::ReplyDispatcher;
use super::pipeline::{MessagePipeline, PipelineOutcome};
use super::relay::{BackendRelay, RelayPolicy};
use crate::channel::{
    CloseCause, ConnectionUpdate, CredentialStore, Credentials, DisconnectKind, InboundEvent,
    Presence, Transport, TransportEvent, UpsertKind,
};
use crate::config::BridgeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

/// Snapshot published to observers and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait before every reconnect
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&BridgeConfig> for ReconnectPolicy {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            interval: config.reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// What to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`; `attempt` is the new counter value
    Retry { attempt: u32, delay: Duration },
    /// Non-retryable cause
    Terminate(DisconnectKind),
    /// Budget spent
    GiveUp { attempts: u32 },
}

/// Classify a close and decide the next step.
pub fn decide_reconnect(
    cause: &CloseCause,
    attempts: u32,
    policy: &ReconnectPolicy,
) -> ReconnectDecision {
    let kind = cause.kind();
    if kind.is_terminal() {
        return ReconnectDecision::Terminate(kind);
    }
    if attempts < policy.max_attempts {
        ReconnectDecision::Retry {
            attempt: attempts + 1,
            delay: policy.interval,
        }
    } else {
        ReconnectDecision::GiveUp { attempts }
    }
}

/// Why `run` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Shutdown was requested
    Shutdown,
    /// The transport closed with a non-retryable cause
    Terminated(DisconnectKind),
    ReconnectExhausted { attempts: u32 },
    /// The session could not be started at all
    Failed { reason: String },
}

impl SessionExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::Terminated(_) | Self::ReconnectExhausted { .. } | Self::Failed { .. } => 1,
        }
    }
}

impl std::fmt::Display for SessionExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown requested"),
            Self::Terminated(kind) => write!(f, "session terminated ({})", kind),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {} reconnect attempts", attempts)
            }
            Self::Failed { reason } => write!(f, "session failed: {}", reason),
        }
    }
}

enum StreamEnd {
    Closed(CloseCause),
    Shutdown,
    Failed(String),
}

type QrHandler = Box<dyn Fn(&str) + Send + Sync>;
type OutcomeHandler = Arc<dyn Fn(&PipelineOutcome) + Send + Sync>;

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    pipeline: Arc<MessagePipeline>,
    policy: ReconnectPolicy,
    state: watch::Sender<SessionState>,
    reconnect_attempts: u32,
    qr_handlers: Vec<QrHandler>,
    outcome_handlers: Vec<OutcomeHandler>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        backend: Arc<dyn BackendClient>,
        config: &BridgeConfig,
    ) -> Self {
        let (state, state_rx) = watch::channel(SessionState::default());
        let relay = BackendRelay::new(
            backend,
            RelayPolicy::from(config),
            config.fallback_reply.clone(),
        );
        let dispatcher =
            ReplyDispatcher::new(transport.clone(), state_rx, config.presence_signals);
        let pipeline = MessagePipeline::new(relay, dispatcher, config.source.clone());

        Self {
            transport,
            credentials,
            pipeline: Arc::new(pipeline),
            policy: ReconnectPolicy::from(config),
            state,
            reconnect_attempts: 0,
            qr_handlers: Vec::new(),
            outcome_handlers: Vec::new(),
        }
    }

    /// Observe status and reconnect counter changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Called with the pairing payload whenever the transport issues a QR code.
    pub fn on_qr(&mut self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.qr_handlers.push(Box::new(handler));
    }

    /// Called from the pipeline task once a message has been handled.
    pub fn on_message_handled(
        &mut self,
        handler: impl Fn(&PipelineOutcome) + Send + Sync + 'static,
    ) {
        self.outcome_handlers.push(Arc::new(handler));
    }

    /// Drive the session until shutdown, a terminal close, or the reconnect
    /// budget runs out.
    pub async fn run(mut self, shutdown: CancellationToken) -> SessionExit {
        info!(
            transport = self.transport.name(),
            max_reconnect_attempts = self.policy.max_attempts,
            "Starting session"
        );

        loop {
            let cause = match self.connect_and_stream(&shutdown).await {
                StreamEnd::Closed(cause) => cause,
                StreamEnd::Shutdown => return self.shutdown().await,
                StreamEnd::Failed(reason) => {
                    self.set_status(ConnectionStatus::Disconnected);
                    error!("Session failed: {}", reason);
                    return SessionExit::Failed { reason };
                }
            };
            self.set_status(ConnectionStatus::Disconnected);

            match decide_reconnect(&cause, self.reconnect_attempts, &self.policy) {
                ReconnectDecision::Terminate(kind) => {
                    error!(
                        reason = %kind,
                        status_code = ?cause.status_code,
                        "Connection closed permanently, not reconnecting"
                    );
                    return SessionExit::Terminated(kind);
                }
                ReconnectDecision::GiveUp { attempts } => {
                    error!(attempts, "Reconnect attempts exhausted");
                    return SessionExit::ReconnectExhausted { attempts };
                }
                ReconnectDecision::Retry { attempt, delay } => {
                    self.reconnect_attempts = attempt;
                    self.publish(ConnectionStatus::Disconnected);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        status_code = ?cause.status_code,
                        reason = cause.message.as_deref().unwrap_or("unknown"),
                        "Connection closed, reconnecting"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => return self.shutdown().await,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&mut self, shutdown: &CancellationToken) -> StreamEnd {
        self.set_status(ConnectionStatus::Connecting);

        let store = self.credentials.clone();
        let credentials = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(e)) => return StreamEnd::Failed(format!("{:#}", e)),
            Err(e) => return StreamEnd::Failed(format!("Credential load task failed: {}", e)),
        };
        if credentials.is_empty() {
            info!("No stored credentials, waiting for pairing");
        }

        let opened = tokio::select! {
            _ = shutdown.cancelled() => return StreamEnd::Shutdown,
            opened = self.transport.open(&credentials) => opened,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to open transport session: {}", e);
                return StreamEnd::Closed(CloseCause::connection_lost(e.to_string()));
            }
        };

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                event = events.next() => event,
            };

            let Some(event) = event else {
                debug!("Transport event stream ended");
                return StreamEnd::Closed(CloseCause::connection_closed());
            };

            match event {
                TransportEvent::Connection(ConnectionUpdate::Connecting) => {
                    self.set_status(ConnectionStatus::Connecting);
                }
                TransportEvent::Connection(ConnectionUpdate::Open) => {
                    self.handle_open().await;
                }
                TransportEvent::Connection(ConnectionUpdate::QrIssued(qr)) => {
                    info!("Pairing QR code issued");
                    for handler in &self.qr_handlers {
                        handler(&qr);
                    }
                }
                TransportEvent::Connection(ConnectionUpdate::Close(cause)) => {
                    if self.status() == ConnectionStatus::Open {
                        self.set_status(ConnectionStatus::Closing);
                    }
                    return StreamEnd::Closed(cause);
                }
                TransportEvent::Messages { kind, events } => {
                    self.handle_messages(kind, events);
                }
                TransportEvent::CredentialsUpdated(credentials) => {
                    self.persist_credentials(credentials).await;
                }
            }
        }
    }

    async fn handle_open(&mut self) {
        self.reconnect_attempts = 0;
        self.set_status(ConnectionStatus::Open);
        info!("Connection open");

        if let Err(e) = self
            .transport
            .signal_presence(Presence::Available, None)
            .await
        {
            warn!("Failed to announce presence: {}", e);
        }
    }

    fn handle_messages(&self, kind: UpsertKind, events: Vec<InboundEvent>) {
        if kind != UpsertKind::Notify {
            debug!(count = events.len(), "Ignoring history batch");
            return;
        }
        if self.status() != ConnectionStatus::Open {
            debug!(
                count = events.len(),
                status = self.status().as_str(),
                "Ignoring messages received while not open"
            );
            return;
        }

        for event in events {
            let pipeline = self.pipeline.clone();
            let handlers = self.outcome_handlers.clone();
            tokio::spawn(async move {
                let outcome = pipeline.process(event).await;
                for handler in &handlers {
                    handler(&outcome);
                }
            });
        }
    }

    /// Store I/O runs on the blocking pool; the event loop waits for it so
    /// updates are written in arrival order.
    async fn persist_credentials(&self, credentials: Credentials) {
        let store = self.credentials.clone();
        match tokio::task::spawn_blocking(move || store.save(&credentials)).await {
            Ok(Ok(())) => debug!("Credentials updated"),
            Ok(Err(e)) => error!("Failed to persist credentials: {:#}", e),
            Err(e) => error!("Credential save task failed: {}", e),
        }
    }

    async fn shutdown(&mut self) -> SessionExit {
        info!("Shutting down session");
        let was_open = self.status() == ConnectionStatus::Open;
        self.set_status(ConnectionStatus::Closing);
        if was_open
            && let Err(e) = self
                .transport
                .signal_presence(Presence::Unavailable, None)
                .await
        {
            debug!("Failed to announce unavailability: {}", e);
        }
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {}", e);
        }
        self.set_status(ConnectionStatus::Disconnected);
        SessionExit::Shutdown
    }

    fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.publish(status);
    }

    fn publish(&self, status: ConnectionStatus) {
        let attempts = self.reconnect_attempts;
        self.state.send_replace(SessionState {
            status,
            reconnect_attempts: attempts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryCredentialStore;
    use crate::channel::MessagePayload;
    use crate::channel::mock::{MockTransport, SessionScript, TransportCall};
    use crate::runtime::backend::BackendReply;
    use crate::runtime::relay::mock::ScriptedBackend;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn open() -> TransportEvent {
        TransportEvent::Connection(ConnectionUpdate::Open)
    }

    fn close(status_code: Option<u16>, message: &str) -> TransportEvent {
        TransportEvent::Connection(ConnectionUpdate::Close(CloseCause::new(
            status_code,
            Some(message.to_string()),
        )))
    }

    fn notify(events: Vec<InboundEvent>) -> TransportEvent {
        TransportEvent::Messages {
            kind: UpsertKind::Notify,
            events,
        }
    }

    fn config(max_reconnect_attempts: u32) -> BridgeConfig {
        BridgeConfig {
            max_reconnect_attempts,
            reconnect_interval_secs: 5,
            forward_retry_base_delay_ms: 100,
            ..BridgeConfig::default()
        }
    }

    fn stored_credentials() -> Credentials {
        Credentials::new(json!({ "me": { "id": "15550001111:7@s.whatsapp.net" } }))
    }

    struct Harness {
        manager: SessionManager,
        transport: Arc<MockTransport>,
        backend: Arc<ScriptedBackend>,
        store: Arc<MemoryCredentialStore>,
    }

    fn harness(backend: ScriptedBackend, max_reconnect_attempts: u32) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryCredentialStore::new(stored_credentials()));
        let manager = SessionManager::new(
            transport.clone(),
            store.clone(),
            backend.clone(),
            &config(max_reconnect_attempts),
        );
        Harness {
            manager,
            transport,
            backend,
            store,
        }
    }

    /// Record every distinct state the manager publishes.
    fn record_states(manager: &SessionManager) -> Arc<Mutex<Vec<SessionState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let mut rx = manager.subscribe();
        let sink = states.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                sink.lock().push(state);
            }
        });
        states
    }

    #[test]
    fn test_decide_reconnect() {
        let policy = ReconnectPolicy {
            interval: Duration::from_secs(5),
            max_attempts: 10,
        };

        assert_eq!(
            decide_reconnect(&CloseCause::new(Some(408), None), 3, &policy),
            ReconnectDecision::Retry {
                attempt: 4,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            decide_reconnect(&CloseCause::new(Some(408), None), 10, &policy),
            ReconnectDecision::GiveUp { attempts: 10 }
        );
        assert_eq!(
            decide_reconnect(&CloseCause::new(Some(401), None), 0, &policy),
            ReconnectDecision::Terminate(DisconnectKind::LoggedOut)
        );
        assert_eq!(
            decide_reconnect(&CloseCause::new(Some(403), None), 0, &policy),
            ReconnectDecision::Terminate(DisconnectKind::Banned)
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SessionExit::Shutdown.exit_code(), 0);
        assert_eq!(
            SessionExit::Terminated(DisconnectKind::LoggedOut).exit_code(),
            1
        );
        assert_eq!(
            SessionExit::ReconnectExhausted { attempts: 10 }.exit_code(),
            1
        );
        assert_eq!(
            SessionExit::Failed {
                reason: "corrupt".into()
            }
            .exit_code(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_round_trip_then_shutdown() {
        let mut h = harness(ScriptedBackend::new().reply(BackendReply::ok("Hi!")), 10);
        let event = InboundEvent::new("A", "m1", MessagePayload::text("hello"));
        h.transport.push_session(SessionScript::held_open(vec![
            open(),
            notify(vec![event.clone()]),
        ]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager.on_message_handled(move |outcome| {
            let _ = tx.send(outcome.is_delivered());
        });

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));

        assert_eq!(rx.recv().await, Some(true));
        shutdown.cancel();

        assert_eq!(run.await.unwrap(), SessionExit::Shutdown);
        assert_eq!(h.transport.sent(), vec![("A".to_string(), "Hi!".to_string())]);
        assert_eq!(h.transport.acknowledged(), vec![event.key]);
        assert_eq!(h.transport.close_count(), 1);
        assert_eq!(h.backend.call_count(), 1);
        assert!(
            h.transport
                .calls()
                .contains(&TransportCall::Presence(Presence::Available, None))
        );
        let calls = h.transport.calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                TransportCall::Presence(Presence::Unavailable, None),
                TransportCall::Close
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_message_makes_no_network_calls() {
        let mut h = harness(ScriptedBackend::new().reply(BackendReply::ok("never")), 10);
        h.transport.push_session(SessionScript::held_open(vec![
            open(),
            notify(vec![InboundEvent::new(
                "120363025246125486@g.us",
                "g1",
                MessagePayload::text("hello group"),
            )]),
        ]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager.on_message_handled(move |outcome| {
            let _ = tx.send(matches!(outcome, PipelineOutcome::Skipped(_)));
        });

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));

        assert_eq!(rx.recv().await, Some(true));
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(h.backend.call_count(), 0);
        assert!(h.transport.sent().is_empty());
        assert!(h.transport.acknowledged().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_batch_is_ignored() {
        let mut h = harness(ScriptedBackend::new(), 10);
        h.transport.push_session(SessionScript::held_open(vec![
            open(),
            TransportEvent::Messages {
                kind: UpsertKind::Append,
                events: vec![InboundEvent::new("A", "old", MessagePayload::text("old"))],
            },
        ]));

        let handled = Arc::new(Mutex::new(0usize));
        let counter = handled.clone();
        h.manager.on_message_handled(move |_| *counter.lock() += 1);

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(*handled.lock(), 0);
        assert_eq!(h.backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_terminates_without_reconnect() {
        let h = harness(ScriptedBackend::new(), 10);
        h.transport
            .push_session(SessionScript::new(vec![open(), close(Some(401), "logged out")]));

        let exit = h.manager.run(CancellationToken::new()).await;

        assert_eq!(exit, SessionExit::Terminated(DisconnectKind::LoggedOut));
        assert_eq!(exit.exit_code(), 1);
        assert_eq!(h.transport.opened_with().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_before_open_terminates() {
        let h = harness(ScriptedBackend::new(), 10);
        h.transport.push_session(SessionScript::new(vec![close(
            None,
            "Connection Failure: not-authorized",
        )]));

        let exit = h.manager.run(CancellationToken::new()).await;

        assert_eq!(exit, SessionExit::Terminated(DisconnectKind::Unauthorized));
        assert_eq!(h.transport.opened_with().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_reconnects_with_same_credentials() {
        let h = harness(ScriptedBackend::new(), 10);
        h.transport
            .push_session(SessionScript::new(vec![open(), close(Some(428), "closed")]));
        h.transport.push_session(SessionScript::new(vec![close(Some(408), "lost")]));
        h.transport.push_session(SessionScript::held_open(vec![open()]));

        let states = record_states(&h.manager);
        let current = h.manager.subscribe();
        let shutdown = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));

        while h.transport.opened_with().len() < 3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            *current.borrow(),
            SessionState {
                status: ConnectionStatus::Open,
                reconnect_attempts: 0
            }
        );
        shutdown.cancel();
        assert_eq!(run.await.unwrap(), SessionExit::Shutdown);

        // Two fixed waits of 5s each
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));

        let opened = h.transport.opened_with();
        assert_eq!(opened.len(), 3);
        assert!(opened.iter().all(|creds| *creds == stored_credentials()));

        let attempts: Vec<u32> = states.lock().iter().map(|s| s.reconnect_attempts).collect();
        assert!(attempts.contains(&1));
        assert!(attempts.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_only_on_open() {
        // Budget of 2; four failed sessions survive only because an open in
        // between resets the counter.
        let h = harness(ScriptedBackend::new(), 2);
        h.transport.push_open_failure("gateway unreachable");
        h.transport.push_session(SessionScript::new(vec![close(Some(500), "bad session")]));
        h.transport
            .push_session(SessionScript::new(vec![open(), close(Some(428), "closed")]));
        h.transport.push_session(SessionScript::new(vec![close(Some(428), "closed")]));
        h.transport.push_session(SessionScript::held_open(vec![open()]));

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));

        while h.transport.opened_with().len() < 5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        assert_eq!(run.await.unwrap(), SessionExit::Shutdown);
        assert_eq!(h.transport.opened_with().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_budget_exhausted() {
        let h = harness(ScriptedBackend::new(), 2);
        for _ in 0..3 {
            h.transport.push_session(SessionScript::new(vec![close(Some(408), "lost")]));
        }

        let exit = h.manager.run(CancellationToken::new()).await;

        assert_eq!(exit, SessionExit::ReconnectExhausted { attempts: 2 });
        assert_eq!(exit.exit_code(), 1);
        assert_eq!(h.transport.opened_with().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_counts_as_transient_close() {
        let h = harness(ScriptedBackend::new(), 1);
        h.transport.push_session(SessionScript::new(vec![open()]));
        h.transport.push_session(SessionScript::new(vec![]));

        let exit = h.manager.run(CancellationToken::new()).await;

        assert_eq!(exit, SessionExit::ReconnectExhausted { attempts: 1 });
        assert_eq!(h.transport.opened_with().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_update_is_persisted_and_reused() {
        let h = harness(ScriptedBackend::new(), 10);
        let updated = Credentials::new(json!({ "me": { "id": "new" }, "registered": true }));
        h.transport.push_session(SessionScript::new(vec![
            TransportEvent::CredentialsUpdated(updated.clone()),
            open(),
            close(Some(515), "restart required"),
        ]));
        h.transport.push_session(SessionScript::held_open(vec![open()]));

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));
        while h.transport.opened_with().len() < 2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(h.store.save_count(), 1);
        assert_eq!(h.transport.opened_with()[1], updated);
    }

    #[tokio::test]
    async fn test_credential_store_runs_off_the_runtime_thread() {
        #[derive(Default)]
        struct ThreadRecordingStore {
            threads: Mutex<Vec<std::thread::ThreadId>>,
        }
        impl CredentialStore for ThreadRecordingStore {
            fn load(&self) -> anyhow::Result<Credentials> {
                self.threads.lock().push(std::thread::current().id());
                Ok(stored_credentials())
            }
            fn save(&self, _: &Credentials) -> anyhow::Result<()> {
                self.threads.lock().push(std::thread::current().id());
                Ok(())
            }
        }

        let transport = Arc::new(MockTransport::new());
        transport.push_session(SessionScript::new(vec![
            open(),
            TransportEvent::CredentialsUpdated(stored_credentials()),
            close(Some(401), "logged out"),
        ]));
        let store = Arc::new(ThreadRecordingStore::default());
        let manager = SessionManager::new(
            transport,
            store.clone(),
            Arc::new(ScriptedBackend::new()),
            &config(10),
        );

        let exit = manager.run(CancellationToken::new()).await;

        assert_eq!(exit, SessionExit::Terminated(DisconnectKind::LoggedOut));
        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_handler_receives_payload() {
        let mut h = harness(ScriptedBackend::new(), 10);
        h.transport.push_session(SessionScript::new(vec![
            TransportEvent::Connection(ConnectionUpdate::QrIssued("2@pairing-ref".into())),
            close(Some(401), "logged out"),
        ]));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.manager.on_qr(move |qr| sink.lock().push(qr.to_string()));

        h.manager.run(CancellationToken::new()).await;

        assert_eq!(*seen.lock(), vec!["2@pairing-ref".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_reconnect_wait() {
        let h = harness(ScriptedBackend::new(), 10);
        h.transport.push_session(SessionScript::new(vec![close(Some(408), "lost")]));

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        assert_eq!(run.await.unwrap(), SessionExit::Shutdown);
        assert_eq!(h.transport.opened_with().len(), 1);
        assert_eq!(h.transport.close_count(), 1);
        assert!(
            !h.transport
                .calls()
                .contains(&TransportCall::Presence(Presence::Unavailable, None))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_failure_keeps_session_open() {
        let mut h = harness(ScriptedBackend::new().reply(BackendReply::ok("Hi!")), 10);
        h.transport.fail_send(true);
        h.transport.push_session(SessionScript::held_open(vec![
            open(),
            notify(vec![InboundEvent::new("A", "m1", MessagePayload::text("hello"))]),
        ]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager.on_message_handled(move |outcome| {
            let _ = tx.send(matches!(outcome, PipelineOutcome::DeliveryFailed(_)));
        });
        let state = h.manager.subscribe();

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.manager.run(shutdown.clone()));

        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(state.borrow().status, ConnectionStatus::Open);
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(h.transport.opened_with().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_credentials_fail_startup() {
        struct BrokenStore;
        impl CredentialStore for BrokenStore {
            fn load(&self) -> anyhow::Result<Credentials> {
                anyhow::bail!("Corrupt credentials file")
            }
            fn save(&self, _: &Credentials) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let transport = Arc::new(MockTransport::new());
        let manager = SessionManager::new(
            transport.clone(),
            Arc::new(BrokenStore),
            Arc::new(ScriptedBackend::new()),
            &config(10),
        );

        let exit = manager.run(CancellationToken::new()).await;

        assert!(matches!(exit, SessionExit::Failed { .. }));
        assert_eq!(exit.exit_code(), 1);
        assert!(transport.calls().is_empty());
    }
}
