//! Signal handling for graceful shutdown.

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;

/// Spawns a task that flips the returned watch channel to `true` on SIGTERM
/// or SIGINT (Ctrl+C).
///
/// The signal handlers are installed before this returns.
pub fn spawn_shutdown_handler() -> std::io::Result<watch::Receiver<bool>> {
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal(sigterm, sigint).await;
        let _ = shutdown_tx.send(true);
    });

    Ok(shutdown_rx)
}

/// Completes when either signal is received.
async fn shutdown_signal(mut sigterm: Signal, mut sigint: Signal) {
    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}
