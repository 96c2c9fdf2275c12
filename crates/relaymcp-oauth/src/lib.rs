//! RFC 6749 authorization-code grant + PKCE (RFC 7636) + dynamic client
//! registration (RFC 7591) + RFC 8414 metadata — the authorization-server
//! core described in spec §4.6-§4.10.

pub mod authorization;
pub mod client_registry;
pub mod config;
pub mod consumer;
pub mod metadata;
pub mod pkce;
pub mod token_manager;

pub use authorization::{AuthorizationHandler, AuthorizationHandlerConfig, AuthorizeRequest, McpAuthRequest};
pub use client_registry::{ClientRegistry, OAuthClient, RegistrationRequest, RegistrationResponse, RegistryConfig};
pub use config::OAuthConfig;
pub use consumer::{ConsumerConfig, GenericOAuthConsumer, OAuthConsumer, ProviderOAuthConsumer, SharedOAuthConsumer};
pub use metadata::{generate_metadata, AuthorizationServerMetadata, MetadataConfig};
pub use token_manager::{AccessToken, AuthorizationCode, RefreshToken, TokenManager, TokenManagerConfig, TokenPair};

use std::sync::Arc;

use relaymcp_kv::KvStore;

/// Wires the full authorization-server core from one KV handle and config —
/// the assembly the server facade crate reaches for at startup.
pub struct OAuthServer {
    pub clients: Arc<ClientRegistry>,
    pub tokens: Arc<TokenManager>,
    pub authorization: Arc<AuthorizationHandler>,
    pub metadata: AuthorizationServerMetadata,
}

impl OAuthServer {
    pub fn new(kv: Arc<dyn KvStore>, config: &OAuthConfig) -> relaymcp_core::Result<Self> {
        let metadata = generate_metadata(&config.metadata_config())?;
        let clients = Arc::new(ClientRegistry::new(kv.clone(), config.registry_config()));
        let tokens = Arc::new(TokenManager::new(kv.clone(), config.token_manager_config()));
        let authorization = Arc::new(AuthorizationHandler::new(
            kv,
            clients.clone(),
            tokens.clone(),
            config.authorization_handler_config(),
        ));
        Ok(Self {
            clients,
            tokens,
            authorization,
            metadata,
        })
    }
}
