//! Top-level server facade: configuration loading, the OAuth + MCP HTTP
//! surface, and graceful shutdown for an MCP server process (spec §6).

pub mod config;
mod dispatch;
pub mod error_mapping;
pub mod router;
pub mod shutdown;
mod state;

pub use config::{RelayConfig, TransportType};
pub use dispatch::RegistryDispatcher;
pub use shutdown::ShutdownHandle;
pub use state::AppState;

use std::sync::Arc;

use relaymcp_core::{Error, Result};
use relaymcp_kv::KvStore;

/// Loads config and assembles [`AppState`] from one KV handle. Callers that
/// need to register tools/workflows before serving (the `demos/` binary,
/// any embedder) do so against `state.tools`/`state.workflows` between this
/// call and [`serve`].
pub fn build(kv: Arc<dyn KvStore>) -> Result<AppState> {
    let config = RelayConfig::load()?;
    AppState::new(kv, config)
}

/// Restores any sessions persisted before a prior restart, then serves
/// either the stdio transport or the HTTP transport depending on
/// `config.transport_type` (spec §5 "stdio is single-client,
/// single-threaded by contract"). Runs until the transport loop exits (HTTP:
/// a shutdown signal; stdio: EOF on stdin).
pub async fn serve(state: AppState) -> Result<()> {
    let restore_report = state.manager.restore().await?;
    if restore_report.failed_count > 0 {
        tracing::warn!(
            restored = restore_report.restored_count,
            failed = restore_report.failed_count,
            errors = ?restore_report.errors,
            "some persisted sessions failed to restore"
        );
    } else {
        tracing::info!(restored = restore_report.restored_count, "session restore complete");
    }

    match state.config.transport_type {
        TransportType::Stdio => relaymcp_transport::run_stdio(state.dispatcher.clone()).await,
        TransportType::Http => serve_http(state).await,
    }
}

async fn serve_http(state: AppState) -> Result<()> {
    let hostname = state.config.http_hostname.clone();
    let port = state.config.http_port;
    let shutdown_handle = ShutdownHandle::new(state.manager.clone());

    let app = router::build_router(state);
    let addr = format!("{hostname}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::transport(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(%addr, "relaymcp listening (POST /mcp, OAuth endpoints at /)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .map_err(|e| Error::transport(format!("server error: {e}")))?;

    shutdown_handle.shutdown().await?;
    Ok(())
}
