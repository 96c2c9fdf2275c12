//! Credential Store (spec §4.2): per-user OAuth credential records for
//! third-party APIs the server mediates access to, keyed by `user_id`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relaymcp_core::Result;
use relaymcp_kv::{Key, KvStore, KvStoreJsonExt, SetOptions};
use serde_json::Value;

fn credential_key(user_id: &str) -> Key {
    Key::new(["oauth", "credentials", user_id])
}

/// A user's stored credentials for a third-party OAuth-protected API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OAuthCredentials {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub metadata: Value,
}

impl OAuthCredentials {
    pub fn is_expired(&self) -> bool {
        relaymcp_core::time::is_expired(self.expires_at)
    }
}

pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn store(&self, credentials: &OAuthCredentials) -> Result<()> {
        self.kv
            .set_json(credential_key(&credentials.user_id), credentials, SetOptions::default())
            .await
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<OAuthCredentials>> {
        self.kv.get_json(&credential_key(user_id)).await
    }

    pub async fn delete(&self, user_id: &str) -> Result<()> {
        self.kv.delete(&credential_key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_kv::MemoryKv;

    fn credentials(user_id: &str) -> OAuthCredentials {
        OAuthCredentials {
            user_id: user_id.to_string(),
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: relaymcp_core::time::expiry_from_now(3_600_000),
            scopes: vec!["read".to_string()],
            metadata: serde_json::json!({"provider": "github"}),
        }
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let store = CredentialStore::new(Arc::new(MemoryKv::new()));
        store.store(&credentials("user-1")).await.unwrap();
        let fetched = store.get("user-1").await.unwrap().unwrap();
        assert_eq!(fetched.access_token, "at-1");
        assert!(!fetched.is_expired());
    }

    #[tokio::test]
    async fn get_absent_user_returns_none() {
        let store = CredentialStore::new(Arc::new(MemoryKv::new()));
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = CredentialStore::new(Arc::new(MemoryKv::new()));
        store.store(&credentials("user-1")).await.unwrap();
        store.delete("user-1").await.unwrap();
        assert!(store.get("user-1").await.unwrap().is_none());
    }
}
