//! Shared application state assembled at startup: one KV handle underlies
//! the OAuth core, the session/credential/transport-persistence stores, the
//! event store, and the tool/workflow registries.

use std::sync::Arc;

use relaymcp_core::Result;
use relaymcp_events::ChunkedEventStore;
use relaymcp_kv::KvStore;
use relaymcp_oauth::OAuthServer;
use relaymcp_registry::{ToolRegistry, WorkflowRegistry};
use relaymcp_session::{CredentialStore, SessionStore, TransportPersistenceStore};
use relaymcp_transport::{MessageDispatcher, SessionManager};

use crate::config::RelayConfig;
use crate::dispatch::RegistryDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub oauth: Arc<OAuthServer>,
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub manager: Arc<SessionManager>,
    /// The same dispatcher wrapped inside `manager`, exposed directly for
    /// the stdio transport, which bypasses HTTP session binding entirely.
    pub dispatcher: Arc<dyn MessageDispatcher>,
}

impl AppState {
    /// Wires every component from one KV handle and the loaded config. This
    /// is the assembly step the `demos/` binary (and any embedder) calls
    /// once at startup.
    pub fn new(kv: Arc<dyn KvStore>, config: RelayConfig) -> Result<Self> {
        let oauth = Arc::new(OAuthServer::new(kv.clone(), &config.oauth_config())?);
        let credentials = Arc::new(CredentialStore::new(kv.clone()));
        let sessions = Arc::new(SessionStore::new(kv.clone()));
        let tools = Arc::new(ToolRegistry::new());
        let workflows = Arc::new(WorkflowRegistry::new());
        workflows.surface_as_tools(&tools)?;

        let persistence = Arc::new(TransportPersistenceStore::new(kv.clone()));
        let events = Arc::new(ChunkedEventStore::new(kv.clone(), config.chunking_config()));
        let dispatcher = Arc::new(RegistryDispatcher {
            tools: tools.clone(),
            workflows: workflows.clone(),
        });
        let manager = Arc::new(SessionManager::new(
            persistence,
            events,
            oauth.tokens.clone(),
            dispatcher.clone(),
            config.manager_config(),
        ));

        Ok(Self {
            config: Arc::new(config),
            oauth,
            credentials,
            sessions,
            tools,
            workflows,
            manager,
            dispatcher,
        })
    }
}
