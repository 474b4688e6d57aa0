//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for Ctrl-C / SIGTERM
//! - Trigger bridge cleanup so in-flight calls stop and stream handles close

use std::sync::Arc;

use crate::bridge::AgentBridge;

/// Resolves when the process is asked to stop.
pub async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Spawn a task that cleans up `bridge` on the first stop signal.
pub fn spawn_cleanup_on_signal(bridge: Arc<AgentBridge>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_requested().await;
        bridge.cleanup_connection();
    })
}
