use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wabridge_core::BridgeConfig;
use wabridge_core::channel::{FileCredentialStore, WsTransport, WsTransportConfig};
use wabridge_core::runtime::{HttpBackend, PipelineOutcome, SessionExit, SessionManager};

/// Run the bridge until shutdown or a fatal session end. Returns the exit code.
pub async fn run(config: BridgeConfig) -> Result<i32> {
    config.validate().context("Invalid configuration")?;

    let credentials_path = config.resolved_credentials_path()?;
    info!(path = %credentials_path.display(), "Using credential store");
    let store = Arc::new(FileCredentialStore::new(credentials_path));
    let transport = Arc::new(WsTransport::new(WsTransportConfig::from(&config)));
    let backend = Arc::new(HttpBackend::new(&config)?);
    info!(url = %backend.webhook_url(), "Forwarding messages to backend webhook");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    if !check_backend(&backend, &config.health_url(), &shutdown).await {
        info!("Shutdown requested during startup");
        return Ok(0);
    }

    let mut manager = SessionManager::new(transport, store, backend, &config);
    manager.on_qr(|qr| {
        info!("Scan the pairing QR code with the phone to link this device");
        println!("Pairing code:\n{}", qr);
    });
    manager.on_message_handled(|outcome| {
        if let PipelineOutcome::DeliveryFailed(e) = outcome {
            warn!(error = %e, "Reply was not delivered");
        }
    });

    println!("Bridge running. Press Ctrl+C to stop.");
    let exit = manager.run(shutdown).await;

    match &exit {
        SessionExit::Shutdown => info!("Bridge stopped"),
        other => error!("Bridge stopped: {}", other),
    }
    Ok(exit.exit_code())
}

/// One health check before the session starts; an unhealthy backend only
/// warns. Returns false when shutdown was requested while waiting.
async fn check_backend(backend: &HttpBackend, url: &str, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        health = backend.health() => {
            match health {
                Ok(()) => info!(url, "Backend is healthy"),
                Err(e) => warn!(url, error = %e, "Backend health check failed, starting anyway"),
            }
            true
        }
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        let _ = tokio::signal::ctrl_c().await;
                        shutdown.cancel();
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            }
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });
    }
}
