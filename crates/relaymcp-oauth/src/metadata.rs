//! OAuth Metadata (spec §4.10): RFC 8414 authorization server metadata
//! document generation and its config validation.

use relaymcp_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub issuer: String,
    pub grant_types_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub dynamic_registration_enabled: bool,
    pub pkce_enabled: bool,
    pub server_name: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            issuer: "https://localhost:8443".to_string(),
            grant_types_supported: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types_supported: vec!["code".to_string()],
            scopes_supported: vec!["all".to_string(), "read".to_string(), "write".to_string()],
            dynamic_registration_enabled: true,
            pkce_enabled: true,
            server_name: None,
        }
    }
}

impl MetadataConfig {
    /// Validation per spec §4.10: invalid issuer URL; empty grant/response
    /// type lists; `authorization_code` absent from grants; `code` absent
    /// from response types; PKCE enabled without `code` in response types.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.issuer).map_err(|e| Error::configuration(format!("invalid issuer URL: {e}")))?;

        if self.grant_types_supported.is_empty() {
            return Err(Error::configuration("grant_types_supported must not be empty"));
        }
        if self.response_types_supported.is_empty() {
            return Err(Error::configuration("response_types_supported must not be empty"));
        }
        if !self
            .grant_types_supported
            .iter()
            .any(|g| g == "authorization_code")
        {
            return Err(Error::configuration(
                "grant_types_supported must include authorization_code",
            ));
        }
        if !self.response_types_supported.iter().any(|r| r == "code") {
            return Err(Error::configuration("response_types_supported must include code"));
        }
        Ok(())
    }
}

/// RFC 8414 authorization server metadata document.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    pub revocation_endpoint: String,
    pub grant_types_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_extensions: Option<McpExtensions>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct McpExtensions {
    pub server_name: String,
}

pub fn generate_metadata(config: &MetadataConfig) -> Result<AuthorizationServerMetadata> {
    config.validate()?;

    let issuer = config.issuer.trim_end_matches('/').to_string();
    Ok(AuthorizationServerMetadata {
        authorization_endpoint: format!("{issuer}/authorize"),
        token_endpoint: format!("{issuer}/token"),
        registration_endpoint: config
            .dynamic_registration_enabled
            .then(|| format!("{issuer}/register")),
        revocation_endpoint: format!("{issuer}/revoke"),
        grant_types_supported: config.grant_types_supported.clone(),
        response_types_supported: config.response_types_supported.clone(),
        scopes_supported: config.scopes_supported.clone(),
        token_endpoint_auth_methods_supported: &["none", "client_secret_basic", "client_secret_post"],
        code_challenge_methods_supported: config.pkce_enabled.then_some(crate::pkce::supported_methods()),
        mcp_extensions: config.server_name.clone().map(|server_name| McpExtensions { server_name }),
        issuer,
    })
}
