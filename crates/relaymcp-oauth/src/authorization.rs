//! Authorization Handler (spec §4.9): the authorization-code-grant state
//! machine — validated → code-issued → code-consumed → tokens-issued — plus
//! MCP session binding for upstream OAuth callbacks.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relaymcp_core::{time, Error, Result};
use relaymcp_kv::{Key, KvStore, KvStoreJsonExt, SetOptions};

use crate::client_registry::ClientRegistry;
use crate::pkce::{self, ChallengeMethod};
use crate::token_manager::TokenManager;

const MCP_AUTH_REQUEST_TTL_MS: i64 = 10 * 60 * 1_000;

fn mcp_auth_request_key(external_state: &str) -> Key {
    Key::new(["oauth", "mcp_auth_requests", external_state])
}

/// An inbound `/authorize` request (spec §6).
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub code: String,
    pub state: String,
    pub redirect_url: String,
}

/// An opaque record correlating a third-party OAuth provider's callback back
/// to the MCP client request that triggered it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct McpAuthRequest {
    pub external_state: String,
    pub original_redirect_uri: String,
    pub original_state: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationHandlerConfig {
    pub supported_response_types: Vec<String>,
    pub supported_scopes: HashSet<String>,
    pub enable_pkce: bool,
    pub require_pkce: bool,
}

impl Default for AuthorizationHandlerConfig {
    fn default() -> Self {
        Self {
            supported_response_types: vec!["code".to_string()],
            supported_scopes: ["all", "read", "write"].into_iter().map(str::to_string).collect(),
            enable_pkce: true,
            require_pkce: true,
        }
    }
}

pub struct AuthorizationHandler {
    kv: Arc<dyn KvStore>,
    clients: Arc<ClientRegistry>,
    tokens: Arc<TokenManager>,
    config: AuthorizationHandlerConfig,
}

impl AuthorizationHandler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clients: Arc<ClientRegistry>,
        tokens: Arc<TokenManager>,
        config: AuthorizationHandlerConfig,
    ) -> Self {
        Self {
            kv,
            clients,
            tokens,
            config,
        }
    }

    pub async fn handle_authorize_request(&self, request: AuthorizeRequest, user_id: &str) -> Result<AuthorizeOutcome> {
        self.validate_authorization_request(&request).await?;

        let code = self
            .tokens
            .generate_authorization_code(
                &request.client_id,
                user_id,
                &request.redirect_uri,
                request.code_challenge.clone(),
                request.scope.clone(),
            )
            .await?;

        let mut redirect = url::Url::parse(&request.redirect_uri)
            .map_err(|e| Error::validation(format!("invalid redirect_uri: {e}")))?;
        redirect
            .query_pairs_mut()
            .append_pair("code", &code)
            .append_pair("state", &request.state);

        Ok(AuthorizeOutcome {
            code,
            state: request.state,
            redirect_url: redirect.to_string(),
        })
    }

    async fn validate_authorization_request(&self, request: &AuthorizeRequest) -> Result<()> {
        if !self.config.supported_response_types.iter().any(|t| t == &request.response_type) {
            return Err(Error::validation(format!(
                "unsupported response_type {}",
                request.response_type
            )));
        }

        if request.state.trim().is_empty() {
            return Err(Error::validation("state is required"));
        }

        let client_valid = self
            .clients
            .validate_client(&request.client_id, Some(&request.redirect_uri))
            .await?;
        if !client_valid {
            return Err(Error::validation("invalid client_id or redirect_uri"));
        }

        if let Some(scope) = &request.scope {
            for s in scope.split(' ').filter(|s| !s.is_empty()) {
                if !self.config.supported_scopes.contains(s) {
                    return Err(Error::validation(format!("unsupported scope {s}")));
                }
            }
        }

        match (&request.code_challenge, &request.code_challenge_method) {
            (Some(_), Some(method)) if self.config.enable_pkce => {
                if ChallengeMethod::parse(method) != Some(ChallengeMethod::S256) {
                    return Err(Error::validation("unsupported code_challenge_method"));
                }
            }
            (None, _) if self.config.require_pkce => {
                return Err(Error::validation("PKCE required for this client"));
            }
            _ => {}
        }

        Ok(())
    }

    /// `exchange_authorization_code` (spec §4.9). On failure after the code
    /// has been loaded, the code is left untouched so the client may retry
    /// with corrected credentials within the expiry window: the code's
    /// consumption and the new token pair's issuance happen together in one
    /// atomic transaction, so a concurrent exchange of the same code can
    /// never leave it deleted without tokens to show for it, and at most one
    /// concurrent caller ever succeeds.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<crate::token_manager::TokenPair> {
        let record = self
            .tokens
            .get_authorization_code(code)
            .await?
            .ok_or_else(|| Error::validation("Invalid or expired authorization code"))?;

        if record.client_id != client_id {
            return Err(Error::validation("Invalid client credentials"));
        }
        if record.redirect_uri != redirect_uri {
            return Err(Error::validation("Invalid client credentials"));
        }

        if let Some(challenge) = &record.code_challenge {
            let verifier = code_verifier.ok_or_else(|| Error::validation("Invalid PKCE code verifier"))?;
            pkce::validate_code_challenge(challenge, verifier, ChallengeMethod::S256)
                .map_err(|_| Error::validation("Invalid PKCE code verifier"))?;
        }

        let scopes: Vec<String> = record
            .scope
            .unwrap_or_default()
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.tokens
            .consume_authorization_code(code, &record.client_id, &record.user_id, scopes)
            .await
    }

    pub async fn store_mcp_auth_request(&self, external_state: &str, request: McpAuthRequest) -> Result<()> {
        self.kv
            .set_json(
                mcp_auth_request_key(external_state),
                &request,
                SetOptions::with_ttl(MCP_AUTH_REQUEST_TTL_MS),
            )
            .await
    }

    /// Expiry is enforced by the KV store's own TTL (lazy-expired on read,
    /// which also reclaims the entry) — this is a thin, named wrapper so
    /// callers don't reach for the raw KV key.
    pub async fn get_mcp_auth_request(&self, external_state: &str) -> Result<Option<McpAuthRequest>> {
        self.kv.get_json(&mcp_auth_request_key(external_state)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_registry::{ClientRegistry, RegistrationRequest, RegistryConfig};
    use crate::token_manager::{TokenManager, TokenManagerConfig};
    use relaymcp_kv::MemoryKv;

    async fn handler() -> (AuthorizationHandler, String) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let clients = Arc::new(ClientRegistry::new(kv.clone(), RegistryConfig::default()));
        let tokens = Arc::new(TokenManager::new(kv.clone(), TokenManagerConfig::default()));
        let resp = clients
            .register(RegistrationRequest {
                redirect_uris: vec!["https://example.com/cb".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        (
            AuthorizationHandler::new(kv, clients, tokens, AuthorizationHandlerConfig::default()),
            resp.client_id,
        )
    }

    fn request(client_id: &str, challenge: Option<&str>) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: "code".to_string(),
            client_id: client_id.to_string(),
            redirect_uri: "https://example.com/cb".to_string(),
            state: "xyz".to_string(),
            scope: Some("read".to_string()),
            code_challenge: challenge.map(str::to_string),
            code_challenge_method: challenge.map(|_| "S256".to_string()),
        }
    }

    #[tokio::test]
    async fn full_authorization_code_grant_with_pkce() {
        let (handler, client_id) = handler().await;
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, ChallengeMethod::S256);

        let outcome = handler
            .handle_authorize_request(request(&client_id, Some(&challenge)), "user-1")
            .await
            .unwrap();
        assert!(outcome.redirect_url.contains(&format!("code={}", outcome.code)));
        assert!(outcome.redirect_url.contains("state=xyz"));

        let pair = handler
            .exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
    }

    #[tokio::test]
    async fn missing_pkce_is_rejected_when_required() {
        let (handler, client_id) = handler().await;
        let err = handler
            .handle_authorize_request(request(&client_id, None), "user-1")
            .await
            .unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn missing_state_is_rejected() {
        let (handler, client_id) = handler().await;
        let mut req = request(&client_id, Some("whatever-challenge-value-000000000000000"));
        req.state = String::new();
        let err = handler.handle_authorize_request(req, "user-1").await.unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn exchange_rejects_mismatched_redirect_uri_and_preserves_code() {
        let (handler, client_id) = handler().await;
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, ChallengeMethod::S256);
        let outcome = handler
            .handle_authorize_request(request(&client_id, Some(&challenge)), "user-1")
            .await
            .unwrap();

        let err = handler
            .exchange_authorization_code(&outcome.code, &client_id, "https://example.com/wrong", Some(&verifier))
            .await
            .unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);

        // code preserved: retry with the correct redirect_uri succeeds.
        let pair = handler
            .exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
    }

    #[tokio::test]
    async fn exchange_is_one_time_use() {
        let (handler, client_id) = handler().await;
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, ChallengeMethod::S256);
        let outcome = handler
            .handle_authorize_request(request(&client_id, Some(&challenge)), "user-1")
            .await
            .unwrap();

        handler
            .exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier))
            .await
            .unwrap();

        let err = handler
            .exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier))
            .await
            .unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn concurrent_exchange_of_same_code_succeeds_exactly_once() {
        let (handler, client_id) = handler().await;
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, ChallengeMethod::S256);
        let outcome = handler
            .handle_authorize_request(request(&client_id, Some(&challenge)), "user-1")
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            handler.exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier)),
            handler.exchange_authorization_code(&outcome.code, &client_id, "https://example.com/cb", Some(&verifier)),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find(Result::is_err).unwrap().unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn mcp_auth_request_round_trips_and_is_single_use() {
        let (handler, client_id) = handler().await;
        let record = McpAuthRequest {
            external_state: "ext-1".to_string(),
            original_redirect_uri: "https://example.com/cb".to_string(),
            original_state: "xyz".to_string(),
            client_id,
            created_at: time::now(),
        };
        handler.store_mcp_auth_request("ext-1", record.clone()).await.unwrap();
        let fetched = handler.get_mcp_auth_request("ext-1").await.unwrap().unwrap();
        assert_eq!(fetched.original_state, record.original_state);
    }
}
