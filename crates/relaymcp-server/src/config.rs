//! Configuration loading (spec §6 "Configuration keys consumed by the
//! core"): one `RelayConfig` field per enumerated key, loaded from
//! environment variables via the `config` crate with a `RELAYMCP_` prefix,
//! double-underscore nested. A bare [`RelayConfig::default()`] is a valid
//! dev config, so tests and the `demos/` binary never need a `.env` file.

use relaymcp_core::{Error, Result};
use relaymcp_events::ChunkingConfig;
use relaymcp_oauth::OAuthConfig;
use relaymcp_transport::ManagerConfig;
use serde::Deserialize;

/// `stdio` (single client, single-threaded) or `http` (many concurrent
/// sessions) — spec §5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Http,
}

impl Default for TransportType {
    fn default() -> Self {
        TransportType::Stdio
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub oauth_issuer: String,
    pub oauth_supported_scopes: Vec<String>,
    pub oauth_enable_pkce: bool,
    pub oauth_require_pkce: bool,
    pub oauth_enable_dynamic_registration: bool,
    pub oauth_access_token_expiry_ms: i64,
    pub oauth_refresh_token_expiry_ms: i64,
    pub oauth_auth_code_expiry_ms: i64,
    pub oauth_require_https: bool,
    pub oauth_allowed_redirect_hosts: Vec<String>,

    pub event_store_max_chunk_size: usize,
    pub event_store_enable_compression: bool,
    pub event_store_compression_threshold: usize,
    pub event_store_max_message_size: usize,

    pub session_timeout_ms: i64,
    pub session_cleanup_interval_ms: u64,

    pub transport_type: TransportType,
    pub http_hostname: String,
    pub http_port: u16,
    pub http_max_concurrent_sessions: usize,
    pub http_request_timeout_ms: u64,

    pub server_name: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let oauth = OAuthConfig::default();
        let chunking = ChunkingConfig::default();
        Self {
            oauth_issuer: oauth.issuer,
            oauth_supported_scopes: oauth.supported_scopes,
            oauth_enable_pkce: oauth.enable_pkce,
            oauth_require_pkce: oauth.require_pkce,
            oauth_enable_dynamic_registration: oauth.enable_dynamic_registration,
            oauth_access_token_expiry_ms: oauth.access_token_expiry_ms,
            oauth_refresh_token_expiry_ms: oauth.refresh_token_expiry_ms,
            oauth_auth_code_expiry_ms: oauth.auth_code_expiry_ms,
            oauth_require_https: oauth.require_https,
            oauth_allowed_redirect_hosts: oauth.allowed_redirect_hosts,

            event_store_max_chunk_size: chunking.max_chunk_size,
            event_store_enable_compression: chunking.enable_compression,
            event_store_compression_threshold: chunking.compression_threshold,
            event_store_max_message_size: chunking.max_message_size,

            session_timeout_ms: 60 * 60 * 1_000,
            session_cleanup_interval_ms: 60 * 60 * 1_000,

            transport_type: TransportType::default(),
            http_hostname: "0.0.0.0".to_string(),
            http_port: 8080,
            http_max_concurrent_sessions: 1_000,
            http_request_timeout_ms: 30_000,

            server_name: oauth.server_name,
        }
    }
}

impl RelayConfig {
    /// Layers `RELAYMCP_`-prefixed environment variables over the typed
    /// defaults above. `RELAYMCP_OAUTH_SUPPORTED_SCOPES=read,write,all`
    /// style comma-separated lists are supported by `config`'s list parsing.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).map_err(config_error)?)
            .add_source(
                config::Environment::with_prefix("RELAYMCP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );
        builder.build().map_err(config_error)?.try_deserialize().map_err(config_error)
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            issuer: self.oauth_issuer.clone(),
            supported_scopes: self.oauth_supported_scopes.clone(),
            enable_pkce: self.oauth_enable_pkce,
            require_pkce: self.oauth_require_pkce,
            enable_dynamic_registration: self.oauth_enable_dynamic_registration,
            access_token_expiry_ms: self.oauth_access_token_expiry_ms,
            refresh_token_expiry_ms: self.oauth_refresh_token_expiry_ms,
            auth_code_expiry_ms: self.oauth_auth_code_expiry_ms,
            require_https: self.oauth_require_https,
            allowed_redirect_hosts: self.oauth_allowed_redirect_hosts.clone(),
            server_name: self.server_name.clone(),
        }
    }

    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_size: self.event_store_max_chunk_size,
            enable_compression: self.event_store_enable_compression,
            compression_threshold: self.event_store_compression_threshold,
            max_message_size: self.event_store_max_message_size,
            ..ChunkingConfig::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            hostname: self.http_hostname.clone(),
            port: self.http_port,
            allowed_hosts: self.oauth_allowed_redirect_hosts.clone(),
            ..ManagerConfig::default()
        }
    }
}

fn config_error(error: impl std::fmt::Display) -> Error {
    Error::configuration(format!("failed to load configuration: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_a_valid_dev_config() {
        let config = RelayConfig::default();
        assert_eq!(config.transport_type, TransportType::Stdio);
        assert_eq!(config.http_port, 8080);
        assert!(config.oauth_enable_pkce);
    }

    #[test]
    fn load_without_env_overrides_matches_default() {
        let loaded = RelayConfig::load().unwrap();
        assert_eq!(loaded.http_port, RelayConfig::default().http_port);
        assert_eq!(loaded.oauth_issuer, RelayConfig::default().oauth_issuer);
    }
}
