//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGTERM and SIGINT
//! - Translate the first one into a graceful shutdown request
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A signal is a clean shutdown: exit code 0

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Resolve with the name of the first termination signal received.
pub async fn termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

/// Trigger `shutdown` on the first termination signal.
///
/// The task also ends quietly if shutdown is requested some other way.
pub fn spawn_signal_handler(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = termination_signal() => match signal {
                Ok(name) => {
                    tracing::info!(signal = name, "Shutdown signal received");
                    shutdown.trigger();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                }
            },
            _ = shutdown.wait() => {}
        }
    })
}
