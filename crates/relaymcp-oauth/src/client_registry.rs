//! Client Registry: RFC 7591 dynamic client registration (spec §4.7).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use relaymcp_core::{time, Error, Result};
use relaymcp_kv::{Key, KvOp, KvStore, KvStoreJsonExt, SetOptions};
use url::Url;

const MAX_CLIENT_ID_COLLISION_ATTEMPTS: usize = 10;

fn clients_prefix() -> Key {
    Key::new(["oauth", "client_registrations"])
}

fn client_key(client_id: &str) -> Key {
    clients_prefix().join(client_id)
}

/// A registered OAuth client (spec §3 `OAuthClient`). No client secret: this
/// registry is PKCE-only, `token_endpoint_auth_method = "none"`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_name: Option<String>,
    pub contacts: Option<Vec<String>>,
    pub tos_uri: Option<String>,
    pub client_uri: Option<String>,
    pub revoked: bool,
}

/// Inbound RFC 7591 registration request.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub client_name: Option<String>,
    pub contacts: Option<Vec<String>>,
    pub tos_uri: Option<String>,
    pub client_uri: Option<String>,
    pub scope: Option<String>,
}

/// Outbound RFC 7591 registration response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: &'static str,
    pub code_challenge_methods_supported: &'static [&'static str],
    pub client_secret_expires_at: u64,
}

/// Registry-level configuration (a subset of the server's OAuth config
/// relevant to registration validation).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub dynamic_registration_enabled: bool,
    pub require_https: bool,
    pub allowed_redirect_hosts: Vec<String>,
    pub default_scopes: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dynamic_registration_enabled: true,
            require_https: true,
            allowed_redirect_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            default_scopes: vec!["read".to_string(), "write".to_string()],
        }
    }
}

/// Snapshot statistics over the registry.
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct RegistryStats {
    pub total_clients: usize,
    pub active_clients: usize,
    pub revoked_clients: usize,
}

pub struct ClientRegistry {
    kv: Arc<dyn KvStore>,
    config: RegistryConfig,
}

impl ClientRegistry {
    pub fn new(kv: Arc<dyn KvStore>, config: RegistryConfig) -> Self {
        Self { kv, config }
    }

    /// Register a new client (spec §4.7).
    pub async fn register(&self, request: RegistrationRequest) -> Result<RegistrationResponse> {
        if !self.config.dynamic_registration_enabled {
            return Err(Error::configuration("dynamic client registration is disabled"));
        }

        self.validate_redirect_uris(&request.redirect_uris)?;

        let client_id = self.generate_unique_client_id().await?;
        let now = time::now();
        let scopes = request
            .scope
            .map(|s| s.split(' ').map(str::to_string).collect())
            .unwrap_or_else(|| self.config.default_scopes.clone());

        let client = OAuthClient {
            client_id: client_id.clone(),
            redirect_uris: request.redirect_uris.clone(),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            scopes,
            created_at: now,
            updated_at: now,
            client_name: request.client_name,
            contacts: request.contacts,
            tos_uri: request.tos_uri,
            client_uri: request.client_uri,
            revoked: false,
        };

        self.kv
            .set_json(client_key(&client_id), &client, SetOptions::default())
            .await?;

        Ok(RegistrationResponse {
            client_id,
            client_id_issued_at: now.timestamp(),
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            response_types: client.response_types,
            token_endpoint_auth_method: "none",
            code_challenge_methods_supported: crate::pkce::supported_methods(),
            client_secret_expires_at: 0,
        })
    }

    /// Validate that `client_id` exists, is not revoked, and — if provided —
    /// that `redirect_uri` matches one of the registered URIs byte-exactly.
    pub async fn validate_client(&self, client_id: &str, redirect_uri: Option<&str>) -> Result<bool> {
        let Some(client) = self.get(client_id).await? else {
            return Ok(false);
        };
        if client.revoked {
            return Ok(false);
        }
        match redirect_uri {
            Some(uri) => Ok(client.redirect_uris.iter().any(|registered| registered == uri)),
            None => Ok(true),
        }
    }

    pub async fn get(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        self.kv.get_json(&client_key(client_id)).await
    }

    pub async fn update(&self, client_id: &str, redirect_uris: Option<Vec<String>>, client_name: Option<String>) -> Result<OAuthClient> {
        let mut client = self
            .get(client_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("client {client_id} not found")))?;

        if let Some(uris) = redirect_uris {
            self.validate_redirect_uris(&uris)?;
            client.redirect_uris = uris;
        }
        if let Some(name) = client_name {
            client.client_name = Some(name);
        }
        client.updated_at = time::now();

        self.kv
            .set_json(client_key(client_id), &client, SetOptions::default())
            .await?;
        Ok(client)
    }

    pub async fn revoke(&self, client_id: &str) -> Result<()> {
        let mut client = self
            .get(client_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("client {client_id} not found")))?;
        client.revoked = true;
        client.updated_at = time::now();
        self.kv
            .set_json(client_key(client_id), &client, SetOptions::default())
            .await
    }

    pub async fn delete(&self, client_id: &str) -> Result<()> {
        self.kv.delete(&client_key(client_id)).await
    }

    pub async fn list(&self) -> Result<Vec<OAuthClient>> {
        let mut out = Vec::new();
        let mut after = None;
        loop {
            let page = self.kv.list(&clients_prefix(), after.as_ref(), 200).await?;
            let done = page.cursor.is_none();
            for (key, bytes) in &page.entries {
                out.push(serde_json::from_slice(bytes)?);
                after = Some(key.clone());
            }
            if done {
                break;
            }
        }
        Ok(out)
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        let clients = self.list().await?;
        let mut stats = RegistryStats {
            total_clients: clients.len(),
            ..Default::default()
        };
        for client in &clients {
            if client.revoked {
                stats.revoked_clients += 1;
            } else {
                stats.active_clients += 1;
            }
        }
        Ok(stats)
    }

    fn validate_redirect_uris(&self, uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Err(Error::validation("redirect_uris must not be empty"));
        }
        for uri in uris {
            let parsed = Url::parse(uri).map_err(|e| Error::validation(format!("invalid redirect_uri {uri}: {e}")))?;
            if parsed.fragment().is_some() {
                return Err(Error::validation(format!(
                    "redirect_uri {uri} must not contain a URL fragment"
                )));
            }
            let host = parsed.host_str().unwrap_or_default();
            let host_allowed = self.config.allowed_redirect_hosts.is_empty()
                || self.config.allowed_redirect_hosts.iter().any(|h| h == host);
            if !host_allowed {
                return Err(Error::validation(format!(
                    "redirect_uri host {host} is not in the allowed redirect host list"
                )));
            }
            let is_exempt_host = self.config.allowed_redirect_hosts.iter().any(|h| h == host)
                && (host == "localhost" || host == "127.0.0.1");
            if self.config.require_https && parsed.scheme() != "https" && !is_exempt_host {
                return Err(Error::validation(format!(
                    "redirect_uri {uri} must use https (host {host} is not an allowed http exemption)"
                )));
            }
        }
        Ok(())
    }

    async fn generate_unique_client_id(&self) -> Result<String> {
        for _ in 0..MAX_CLIENT_ID_COLLISION_ATTEMPTS {
            let candidate = format!("mcp_{}", random_hex(16));
            if self.get(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(Error::internal(
            "failed to generate a unique client_id after 10 attempts",
        ))
    }
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| format!("{:x}", rng.random_range(0..16u8)))
        .collect()
}
