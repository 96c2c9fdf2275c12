//! The `Transport` seam: one live connection bound to a session id, able to
//! push a protocol message to its client. Concrete HTTP/stdio transports are
//! supplied by the server facade; this crate only needs the trait.

use async_trait::async_trait;
use relaymcp_core::Result;
use serde_json::Value;
use tokio::sync::broadcast;

#[async_trait]
pub trait Transport: Send + Sync {
    fn session_id(&self) -> &str;

    /// Push a server-initiated or response message to the connected client.
    async fn send(&self, message: Value) -> Result<()>;
}

/// Dispatches a decoded protocol message into the tool/workflow registries
/// and returns the response to append to the session's event stream. The
/// server facade crate implements this against its registries; this crate
/// only needs the seam (spec §4.13 step 4).
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, session_id: &str, message: Value) -> Result<Value>;
}

const BROADCAST_CAPACITY: usize = 256;

/// An HTTP transport's live handle: SSE listeners subscribe to a broadcast
/// channel so that any response dispatched for this session (including ones
/// triggered by a concurrent request, e.g. server-initiated push) reaches
/// every connected client.
pub struct BroadcastTransport {
    session_id: String,
    sender: broadcast::Sender<Value>,
}

impl BroadcastTransport {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            session_id: session_id.into(),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    /// A message with no subscribed listener is simply dropped; there is
    /// nothing waiting to receive it yet (e.g. a plain POST/response cycle
    /// with no open SSE stream).
    async fn send(&self, message: Value) -> Result<()> {
        let _ = self.sender.send(message);
        Ok(())
    }
}
