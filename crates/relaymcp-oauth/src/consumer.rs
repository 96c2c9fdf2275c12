//! Third-party OAuth consumer (spec §9 "Subclass-based provider extension").
//!
//! This server is an authorization server *to* MCP clients, but it also
//! *consumes* a third-party provider's OAuth flow on a user's behalf (spec
//! §1: "mediate access to third-party APIs via OAuth"). The source system
//! modeled that as a concrete OAuth client subclassed per provider,
//! overriding a couple of hooks. Spec §9 calls for re-architecting that as
//! an interface — [`OAuthConsumer`] — with a default implementation a
//! provider composes rather than inherits from.

use std::sync::Arc;

use async_trait::async_trait;
use relaymcp_core::{time, Error, Result};
use relaymcp_session::{CredentialStore, OAuthCredentials};
use serde::Deserialize;

/// Static per-provider endpoints and client credentials.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// RFC 6749 §5.1 token response, the fields every mainstream provider returns.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// The hook methods a provider-specific consumer needs. Default methods
/// cover the generic RFC 6749 authorization-code flow; a provider with
/// quirks overrides only the hook that differs, composing a
/// [`GenericOAuthConsumer`] for the rest rather than subclassing it.
#[async_trait]
pub trait OAuthConsumer: Send + Sync {
    fn config(&self) -> &ConsumerConfig;
    fn credential_store(&self) -> &CredentialStore;

    /// Builds the URL this server sends the resource owner's user agent to
    /// at the upstream provider. `external_state` is the value this server
    /// generated and recorded via
    /// [`crate::AuthorizationHandler::store_mcp_auth_request`] so the
    /// provider's callback can be correlated back to the originating MCP
    /// client request.
    fn build_authorize_url(&self, external_state: &str) -> Result<String> {
        let config = self.config();
        let mut url = url::Url::parse(&config.authorize_url)
            .map_err(|e| Error::configuration(format!("invalid authorize_url for provider {}: {e}", config.provider)))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("state", external_state)
            .append_pair("scope", &config.scopes.join(" "));
        Ok(url.to_string())
    }

    /// Exchanges an upstream authorization code for a token pair and
    /// persists it under `user_id` in the credential store.
    async fn exchange_code_for_tokens(&self, code: &str, user_id: &str) -> Result<OAuthCredentials>;

    /// Refreshes `credentials.refresh_token` and persists the rotated pair.
    async fn refresh_tokens(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials>;

    /// Returns a currently-valid access token for `user_id`, refreshing
    /// first when the stored credentials have expired.
    async fn get_access_token(&self, user_id: &str) -> Result<String> {
        let stored = self
            .credential_store()
            .get(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("no stored credentials for user {user_id}")))?;
        if !stored.is_expired() {
            return Ok(stored.access_token);
        }
        let refreshed = self.refresh_tokens(&stored).await?;
        Ok(refreshed.access_token)
    }
}

/// Default [`OAuthConsumer`] implementation for a generic RFC 6749 provider:
/// plain `application/x-www-form-urlencoded` token requests, standard
/// response fields. Provider-specific consumers compose this and override
/// only the hooks their provider handles non-standardly (e.g. a token
/// endpoint that wants a JSON body instead of form encoding).
pub struct GenericOAuthConsumer {
    config: ConsumerConfig,
    credentials: CredentialStore,
    http: reqwest::Client,
}

impl GenericOAuthConsumer {
    pub fn new(config: ConsumerConfig, credentials: CredentialStore) -> Self {
        Self {
            config,
            credentials,
            http: reqwest::Client::new(),
        }
    }

    async fn post_token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_url.as_str())
            .form(params)
            .send()
            .await
            .map_err(|e| Error::network(format!("token request to {} failed: {e}", self.config.provider)))?;

        if !response.status().is_success() {
            return Err(Error::external_api(format!(
                "{} token endpoint returned {}",
                self.config.provider,
                response.status()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::external_api(format!("{} returned an invalid token response: {e}", self.config.provider)))
    }

    fn credentials_from_response(&self, token: TokenResponse, user_id: &str, fallback: Option<&OAuthCredentials>) -> OAuthCredentials {
        let refresh_token = token
            .refresh_token
            .or_else(|| fallback.and_then(|c| c.refresh_token.clone()));
        let scopes = token
            .scope
            .map(|s| s.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .or_else(|| fallback.map(|c| c.scopes.clone()))
            .unwrap_or_default();

        OAuthCredentials {
            user_id: user_id.to_string(),
            access_token: token.access_token,
            refresh_token,
            token_type: token.token_type,
            expires_at: time::expiry_from_now(token.expires_in.unwrap_or(3600) * 1000),
            scopes,
            metadata: fallback.map(|c| c.metadata.clone()).unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

#[async_trait]
impl OAuthConsumer for GenericOAuthConsumer {
    fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    fn credential_store(&self) -> &CredentialStore {
        &self.credentials
    }

    async fn exchange_code_for_tokens(&self, code: &str, user_id: &str) -> Result<OAuthCredentials> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let token = self.post_token_request(&params).await?;
        let credentials = self.credentials_from_response(token, user_id, None);
        self.credentials.store(&credentials).await?;
        Ok(credentials)
    }

    async fn refresh_tokens(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        let refresh_token = credentials
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::validation("no refresh_token available to refresh with"))?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let token = self.post_token_request(&params).await?;
        let refreshed = self.credentials_from_response(token, &credentials.user_id, Some(credentials));
        self.credentials.store(&refreshed).await?;
        Ok(refreshed)
    }
}

/// A provider-specific consumer that only overrides `build_authorize_url` to
/// add a provider-mandated query parameter, delegating everything else to a
/// composed [`GenericOAuthConsumer`] — the shape spec §9 asks for in place
/// of subclassing.
pub struct ProviderOAuthConsumer {
    inner: GenericOAuthConsumer,
    extra_authorize_params: Vec<(String, String)>,
}

impl ProviderOAuthConsumer {
    pub fn new(inner: GenericOAuthConsumer, extra_authorize_params: Vec<(String, String)>) -> Self {
        Self {
            inner,
            extra_authorize_params,
        }
    }
}

#[async_trait]
impl OAuthConsumer for ProviderOAuthConsumer {
    fn config(&self) -> &ConsumerConfig {
        self.inner.config()
    }

    fn credential_store(&self) -> &CredentialStore {
        self.inner.credential_store()
    }

    fn build_authorize_url(&self, external_state: &str) -> Result<String> {
        let base = self.inner.build_authorize_url(external_state)?;
        let mut url = url::Url::parse(&base).map_err(|e| Error::internal(format!("built an unparsable authorize url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.extra_authorize_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    async fn exchange_code_for_tokens(&self, code: &str, user_id: &str) -> Result<OAuthCredentials> {
        self.inner.exchange_code_for_tokens(code, user_id).await
    }

    async fn refresh_tokens(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        self.inner.refresh_tokens(credentials).await
    }
}

/// Type-erased handle used by callers that just need "the consumer for this
/// provider" without caring which concrete type implements it.
pub type SharedOAuthConsumer = Arc<dyn OAuthConsumer>;

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_kv::{KvStore, MemoryKv};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(token_url: String) -> ConsumerConfig {
        ConsumerConfig {
            provider: "test-provider".to_string(),
            client_id: "client-abc".to_string(),
            client_secret: "secret-xyz".to_string(),
            authorize_url: "https://provider.example/authorize".to_string(),
            token_url,
            redirect_uri: "https://relay.example/callback".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
        }
    }

    fn consumer(token_url: String) -> GenericOAuthConsumer {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        GenericOAuthConsumer::new(config(token_url), CredentialStore::new(kv))
    }

    #[test]
    fn build_authorize_url_carries_external_state_and_scopes() {
        let consumer = consumer("https://provider.example/token".to_string());
        let url = consumer.build_authorize_url("ext-state-1").unwrap();
        assert!(url.contains("state=ext-state-1"));
        assert!(url.contains("client_id=client-abc"));
        assert!(url.contains("scope=read+write") || url.contains("scope=read%20write"));
    }

    #[tokio::test]
    async fn exchange_code_for_tokens_stores_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-123",
                "refresh_token": "rt-123",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "read write"
            })))
            .mount(&server)
            .await;

        let consumer = consumer(format!("{}/token", server.uri()));
        let credentials = consumer.exchange_code_for_tokens("auth-code-1", "user-1").await.unwrap();
        assert_eq!(credentials.access_token, "at-123");
        assert_eq!(credentials.refresh_token.as_deref(), Some("rt-123"));

        let stored = consumer.credential_store().get("user-1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "at-123");
    }

    #[tokio::test]
    async fn refresh_tokens_rotates_and_preserves_refresh_token_if_absent_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let consumer = consumer(format!("{}/token", server.uri()));
        let original = OAuthCredentials {
            user_id: "user-1".to_string(),
            access_token: "at-old".to_string(),
            refresh_token: Some("rt-old".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: time::now(),
            scopes: vec!["read".to_string()],
            metadata: serde_json::json!({}),
        };
        let refreshed = consumer.refresh_tokens(&original).await.unwrap();
        assert_eq!(refreshed.access_token, "at-new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-old"));
    }

    #[tokio::test]
    async fn get_access_token_refreshes_expired_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-fresh",
                "refresh_token": "rt-old",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let consumer = consumer(format!("{}/token", server.uri()));
        let expired = OAuthCredentials {
            user_id: "user-1".to_string(),
            access_token: "at-stale".to_string(),
            refresh_token: Some("rt-old".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: time::now() - chrono::Duration::seconds(10),
            scopes: vec![],
            metadata: serde_json::json!({}),
        };
        consumer.credential_store().store(&expired).await.unwrap();

        let token = consumer.get_access_token("user-1").await.unwrap();
        assert_eq!(token, "at-fresh");
    }

    #[tokio::test]
    async fn get_access_token_returns_stored_token_when_not_expired() {
        let consumer = consumer("https://provider.example/token".to_string());
        let fresh = OAuthCredentials {
            user_id: "user-1".to_string(),
            access_token: "at-valid".to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_at: time::expiry_from_now(3_600_000),
            scopes: vec![],
            metadata: serde_json::json!({}),
        };
        consumer.credential_store().store(&fresh).await.unwrap();

        let token = consumer.get_access_token("user-1").await.unwrap();
        assert_eq!(token, "at-valid");
    }

    #[test]
    fn provider_consumer_adds_extra_authorize_params_on_top_of_generic() {
        let generic = consumer("https://provider.example/token".to_string());
        let provider = ProviderOAuthConsumer::new(generic, vec![("access_type".to_string(), "offline".to_string())]);
        let url = provider.build_authorize_url("ext-1").unwrap();
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=ext-1"));
    }
}
