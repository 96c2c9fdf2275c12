//! Graceful shutdown coordination: signal handling plus the staged drain
//! sequence (spec §4.13 "on graceful shutdown").

use std::sync::Arc;

use relaymcp_core::Result;
use relaymcp_transport::{SessionManager, ShutdownReport};

/// Cloneable handle for triggering or awaiting graceful shutdown from outside
/// the `serve` loop (tests, embedders, container orchestration hooks).
#[derive(Clone)]
pub struct ShutdownHandle {
    manager: Arc<SessionManager>,
}

impl ShutdownHandle {
    pub(crate) fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Marks every live session inactive, drains in-flight requests up to
    /// the manager's configured grace period, then returns how many
    /// sessions were marked. KV/event-store flushing, if the backing store
    /// needs it, is the caller's responsibility — the KV contract here has
    /// no explicit flush operation.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        self.manager.shutdown().await
    }
}

/// Resolves on SIGINT (and SIGTERM where supported), for use with axum's
/// `with_graceful_shutdown`.
pub async fn signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
