//! Signal handling for graceful shutdown

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Resolve when the process is asked to exit (SIGTERM or SIGINT).
pub async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            // The default disposition still terminates the process; wait
            // forever so another select! branch runs the shutdown.
            warn!(?e, "failed to register SIGTERM handler");
            std::future::pending().await
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sigint) => sigint,
        Err(e) => {
            warn!(?e, "failed to register SIGINT handler");
            std::future::pending().await
        }
    };

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "shutdown requested");
}
