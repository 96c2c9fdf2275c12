//! Token Manager (spec §4.8): authorization codes, access tokens, refresh
//! tokens — issuance, lookup, consumption, rotation, expiry.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use relaymcp_core::{time, Error, Result};
use relaymcp_kv::{AtomicOutcome, Key, KvOp, KvStore, KvStoreJsonExt, SetOptions};

/// Default TTLs (spec §4.8), overridable via [`TokenManagerConfig`].
pub const DEFAULT_AUTH_CODE_EXPIRY_MS: i64 = 10 * 60 * 1_000;
pub const DEFAULT_ACCESS_TOKEN_EXPIRY_MS: i64 = 60 * 60 * 1_000;
pub const DEFAULT_REFRESH_TOKEN_EXPIRY_MS: i64 = 30 * 24 * 60 * 60 * 1_000;

fn auth_code_key(code: &str) -> Key {
    Key::new(["oauth", "auth_codes", code])
}

fn access_token_key(token: &str) -> Key {
    Key::new(["oauth", "access_tokens", token])
}

fn refresh_token_key(token: &str) -> Key {
    Key::new(["oauth", "refresh_tokens", token])
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An issued access+refresh token pair, shaped for the RFC 6749 `/token`
/// response body.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub authorization_code_expiry_ms: i64,
    pub access_token_expiry_ms: i64,
    pub refresh_token_expiry_ms: i64,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            authorization_code_expiry_ms: DEFAULT_AUTH_CODE_EXPIRY_MS,
            access_token_expiry_ms: DEFAULT_ACCESS_TOKEN_EXPIRY_MS,
            refresh_token_expiry_ms: DEFAULT_REFRESH_TOKEN_EXPIRY_MS,
        }
    }
}

pub struct TokenManager {
    kv: Arc<dyn KvStore>,
    config: TokenManagerConfig,
}

impl TokenManager {
    pub fn new(kv: Arc<dyn KvStore>, config: TokenManagerConfig) -> Self {
        Self { kv, config }
    }

    pub async fn generate_authorization_code(
        &self,
        client_id: &str,
        user_id: &str,
        redirect_uri: &str,
        code_challenge: Option<String>,
        scope: Option<String>,
    ) -> Result<String> {
        let code = random_token(32);
        let record = AuthorizationCode {
            code: code.clone(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code_challenge,
            scope,
            created_at: time::now(),
        };
        self.kv
            .set_json(
                auth_code_key(&code),
                &record,
                SetOptions::with_ttl(self.config.authorization_code_expiry_ms),
            )
            .await?;
        Ok(code)
    }

    pub async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        self.kv.get_json(&auth_code_key(code)).await
    }

    pub async fn delete_authorization_code(&self, code: &str) -> Result<()> {
        self.kv.delete(&auth_code_key(code)).await
    }

    /// Consumes `code` and issues a fresh token pair in a single atomic
    /// transaction (spec §4.9): the code's deletion and the new access/refresh
    /// token `set`s commit together, or not at all. A concurrent caller that
    /// loses the race (the code was already consumed) observes
    /// `AtomicOutcome::Conflict`, mapped here to "Invalid or expired
    /// authorization code" rather than also receiving a valid token pair.
    pub async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        user_id: &str,
        scopes: Vec<String>,
    ) -> Result<TokenPair> {
        let access = AccessToken {
            token: random_token(32),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes: scopes.clone(),
            created_at: time::now(),
        };
        let refresh = RefreshToken {
            token: random_token(32),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes: scopes.clone(),
            created_at: time::now(),
        };

        let outcome = self
            .kv
            .atomic(vec![
                KvOp::require_present(auth_code_key(code)),
                KvOp::delete(auth_code_key(code)),
                KvOp::set_with_ttl(
                    access_token_key(&access.token),
                    serde_json::to_vec(&access)?,
                    self.config.access_token_expiry_ms,
                ),
                KvOp::set_with_ttl(
                    refresh_token_key(&refresh.token),
                    serde_json::to_vec(&refresh)?,
                    self.config.refresh_token_expiry_ms,
                ),
            ])
            .await?;
        if outcome != AtomicOutcome::Committed {
            return Err(Error::validation("Invalid or expired authorization code"));
        }

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: self.config.access_token_expiry_ms / 1_000,
            scope: scopes.join(" "),
        })
    }

    pub async fn issue_token_pair(&self, client_id: &str, user_id: &str, scopes: Vec<String>) -> Result<TokenPair> {
        let access = AccessToken {
            token: random_token(32),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes: scopes.clone(),
            created_at: time::now(),
        };
        let refresh = RefreshToken {
            token: random_token(32),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes: scopes.clone(),
            created_at: time::now(),
        };

        let outcome = self
            .kv
            .atomic(vec![
                KvOp::set_with_ttl(
                    access_token_key(&access.token),
                    serde_json::to_vec(&access)?,
                    self.config.access_token_expiry_ms,
                ),
                KvOp::set_with_ttl(
                    refresh_token_key(&refresh.token),
                    serde_json::to_vec(&refresh)?,
                    self.config.refresh_token_expiry_ms,
                ),
            ])
            .await?;
        if outcome != AtomicOutcome::Committed {
            return Err(Error::internal("token issuance transaction did not commit"));
        }

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: self.config.access_token_expiry_ms / 1_000,
            scope: scopes.join(" "),
        })
    }

    pub async fn validate_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.kv.get_json(&access_token_key(token)).await
    }

    /// Refresh-token rotation (spec §4.8/§5): the presented refresh token's
    /// existence is re-checked and the token deleted in the same atomic
    /// transaction that issues the new pair, so two concurrent callers
    /// racing on the same refresh token cannot both commit — the loser's
    /// `RequirePresent` precondition fails and it observes
    /// `AtomicOutcome::Conflict`, mapped to "Invalid or expired refresh
    /// token" below, instead of also receiving a fresh token pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let Some(existing): Option<RefreshToken> = self.kv.get_json(&refresh_token_key(refresh_token)).await? else {
            return Err(Error::authentication("Invalid or expired refresh token"));
        };

        let new_access = AccessToken {
            token: random_token(32),
            client_id: existing.client_id.clone(),
            user_id: existing.user_id.clone(),
            scopes: existing.scopes.clone(),
            created_at: time::now(),
        };
        let new_refresh = RefreshToken {
            token: random_token(32),
            client_id: existing.client_id.clone(),
            user_id: existing.user_id.clone(),
            scopes: existing.scopes.clone(),
            created_at: time::now(),
        };

        let outcome = self
            .kv
            .atomic(vec![
                KvOp::require_present(refresh_token_key(refresh_token)),
                KvOp::delete(refresh_token_key(refresh_token)),
                KvOp::set_with_ttl(
                    access_token_key(&new_access.token),
                    serde_json::to_vec(&new_access)?,
                    self.config.access_token_expiry_ms,
                ),
                KvOp::set_with_ttl(
                    refresh_token_key(&new_refresh.token),
                    serde_json::to_vec(&new_refresh)?,
                    self.config.refresh_token_expiry_ms,
                ),
            ])
            .await?;
        if outcome != AtomicOutcome::Committed {
            return Err(Error::authentication("Invalid or expired refresh token"));
        }

        Ok(TokenPair {
            access_token: new_access.token,
            refresh_token: new_refresh.token,
            token_type: "Bearer",
            expires_in: self.config.access_token_expiry_ms / 1_000,
            scope: existing.scopes.join(" "),
        })
    }

    /// RFC 7009 revocation: looks up `token` in both access and refresh
    /// stores and deletes whichever is found. Always succeeds (best-effort,
    /// spec §6 `/revoke`).
    pub async fn revoke(&self, token: &str) -> Result<()> {
        if self.kv.get(&access_token_key(token)).await?.is_some() {
            self.kv.delete(&access_token_key(token)).await?;
        }
        if self.kv.get(&refresh_token_key(token)).await?.is_some() {
            self.kv.delete(&refresh_token_key(token)).await?;
        }
        Ok(())
    }
}

fn random_token(entropy_bytes: usize) -> String {
    let mut bytes = vec![0u8; entropy_bytes];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_kv::MemoryKv;

    fn manager() -> TokenManager {
        TokenManager::new(Arc::new(MemoryKv::new()), TokenManagerConfig::default())
    }

    #[tokio::test]
    async fn authorization_code_round_trips_then_deletes() {
        let tm = manager();
        let code = tm
            .generate_authorization_code("mcp_abc", "user-1", "https://example.com/cb", None, None)
            .await
            .unwrap();
        let record = tm.get_authorization_code(&code).await.unwrap().unwrap();
        assert_eq!(record.client_id, "mcp_abc");
        tm.delete_authorization_code(&code).await.unwrap();
        assert!(tm.get_authorization_code(&code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issue_token_pair_then_validate_access_token() {
        let tm = manager();
        let pair = tm
            .issue_token_pair("mcp_abc", "user-1", vec!["read".to_string()])
            .await
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
        let access = tm.validate_access_token(&pair.access_token).await.unwrap().unwrap();
        assert_eq!(access.user_id, "user-1");
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_invalidates_old_one() {
        let tm = manager();
        let pair = tm
            .issue_token_pair("mcp_abc", "user-1", vec!["read".to_string()])
            .await
            .unwrap();
        let rotated = tm.refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_ne!(rotated.access_token, pair.access_token);

        let err = tm.refresh(&pair.refresh_token).await.unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Authentication);
    }

    #[tokio::test]
    async fn concurrent_refresh_of_same_token_succeeds_exactly_once() {
        let tm = manager();
        let pair = tm
            .issue_token_pair("mcp_abc", "user-1", vec!["read".to_string()])
            .await
            .unwrap();

        let (first, second) = tokio::join!(tm.refresh(&pair.refresh_token), tm.refresh(&pair.refresh_token));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find(Result::is_err).unwrap().unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Authentication);
    }

    #[tokio::test]
    async fn revoke_is_best_effort_and_idempotent() {
        let tm = manager();
        let pair = tm
            .issue_token_pair("mcp_abc", "user-1", vec!["read".to_string()])
            .await
            .unwrap();
        tm.revoke(&pair.access_token).await.unwrap();
        assert!(tm.validate_access_token(&pair.access_token).await.unwrap().is_none());
        tm.revoke(&pair.access_token).await.unwrap();
        tm.revoke("never-issued-token").await.unwrap();
    }
}
