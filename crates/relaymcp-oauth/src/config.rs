//! OAuth subsystem configuration, assembled from the `OAUTH_*` keys (spec §6)
//! into the per-component config structs the rest of the crate consumes.

use crate::authorization::AuthorizationHandlerConfig;
use crate::client_registry::RegistryConfig;
use crate::metadata::MetadataConfig;
use crate::token_manager::TokenManagerConfig;

/// Everything the oauth crate needs, deserializable from the `oauth.*` table
/// the server's `config` crate layer populates from `OAUTH_*` env vars.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub issuer: String,
    pub supported_scopes: Vec<String>,
    pub enable_pkce: bool,
    pub require_pkce: bool,
    pub enable_dynamic_registration: bool,
    pub access_token_expiry_ms: i64,
    pub refresh_token_expiry_ms: i64,
    pub auth_code_expiry_ms: i64,
    pub require_https: bool,
    pub allowed_redirect_hosts: Vec<String>,
    pub server_name: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://localhost:8443".to_string(),
            supported_scopes: vec!["all".to_string(), "read".to_string(), "write".to_string()],
            enable_pkce: true,
            require_pkce: true,
            enable_dynamic_registration: true,
            access_token_expiry_ms: crate::token_manager::DEFAULT_ACCESS_TOKEN_EXPIRY_MS,
            refresh_token_expiry_ms: crate::token_manager::DEFAULT_REFRESH_TOKEN_EXPIRY_MS,
            auth_code_expiry_ms: crate::token_manager::DEFAULT_AUTH_CODE_EXPIRY_MS,
            require_https: true,
            allowed_redirect_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            server_name: None,
        }
    }
}

impl OAuthConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            dynamic_registration_enabled: self.enable_dynamic_registration,
            require_https: self.require_https,
            allowed_redirect_hosts: self.allowed_redirect_hosts.clone(),
            default_scopes: self.supported_scopes.clone(),
        }
    }

    pub fn token_manager_config(&self) -> TokenManagerConfig {
        TokenManagerConfig {
            authorization_code_expiry_ms: self.auth_code_expiry_ms,
            access_token_expiry_ms: self.access_token_expiry_ms,
            refresh_token_expiry_ms: self.refresh_token_expiry_ms,
        }
    }

    pub fn authorization_handler_config(&self) -> AuthorizationHandlerConfig {
        AuthorizationHandlerConfig {
            supported_response_types: vec!["code".to_string()],
            supported_scopes: self.supported_scopes.iter().cloned().collect(),
            enable_pkce: self.enable_pkce,
            require_pkce: self.require_pkce,
        }
    }

    pub fn metadata_config(&self) -> MetadataConfig {
        MetadataConfig {
            issuer: self.issuer.clone(),
            grant_types_supported: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types_supported: vec!["code".to_string()],
            scopes_supported: self.supported_scopes.clone(),
            dynamic_registration_enabled: self.enable_dynamic_registration,
            pkce_enabled: self.enable_pkce,
            server_name: self.server_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_produces_valid_metadata() {
        let config = OAuthConfig::default();
        assert!(config.metadata_config().validate().is_ok());
    }
}
