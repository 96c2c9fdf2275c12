//! Transport Persistence Store (spec §4.5): records the existence of HTTP
//! transport sessions so they can be reconstructed after a process restart.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relaymcp_core::{time, Result};
use relaymcp_kv::{Key, KvStore, KvStoreJsonExt, SetOptions};
use serde_json::Value;

const TRANSPORT_PREFIX: &str = "transport";
const LIST_BATCH_SIZE: usize = 200;
const DEFAULT_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1_000;
const CLEANUP_BATCH_SIZE: usize = 8;

fn session_key(session_id: &str) -> Key {
    Key::new([TRANSPORT_PREFIX, "session", session_id])
}

fn by_user_prefix(user_id: &str) -> Key {
    Key::new([TRANSPORT_PREFIX, "session_by_user", user_id])
}

fn by_user_key(user_id: &str, session_id: &str) -> Key {
    by_user_prefix(user_id).join(session_id)
}

/// A snapshot of the HTTP transport config bound to a session, frozen at
/// persist time so a restart can reconstruct an equivalent transport.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransportConfigSnapshot {
    pub hostname: String,
    pub port: u16,
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransportSession {
    pub session_id: String,
    pub user_id: Option<String>,
    pub config: TransportConfigSnapshot,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub metadata: Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct UserIndexPointer {
    session_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct TransportPersistenceStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
}

/// Result of [`TransportPersistenceStore::restore_transports`]. Per-session
/// failures are isolated: one bad reconstruction never aborts the batch.
pub struct RestoreOutcome<T> {
    pub restored: Vec<(String, T)>,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

impl<T> RestoreOutcome<T> {
    pub fn restored_count(&self) -> usize {
        self.restored.len()
    }
}

pub struct TransportPersistenceStore {
    kv: Arc<dyn KvStore>,
}

impl TransportPersistenceStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn persist(&self, session: &TransportSession) -> Result<()> {
        self.kv
            .set_json(session_key(&session.session_id), session, SetOptions::default())
            .await?;
        if let Some(user_id) = &session.user_id {
            let pointer = UserIndexPointer {
                session_id: session.session_id.clone(),
                created_at: session.created_at,
            };
            self.kv
                .set_json(by_user_key(user_id, &session.session_id), &pointer, SetOptions::default())
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<TransportSession>> {
        self.kv.get_json(&session_key(session_id)).await
    }

    pub async fn update_activity(&self, session_id: &str) -> Result<Option<TransportSession>> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(None);
        };
        session.last_activity = time::now();
        self.kv
            .set_json(session_key(session_id), &session, SetOptions::default())
            .await?;
        Ok(Some(session))
    }

    pub async fn mark_inactive(&self, session_id: &str) -> Result<Option<TransportSession>> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(None);
        };
        session.is_active = false;
        session.last_activity = time::now();
        self.kv
            .set_json(session_key(session_id), &session, SetOptions::default())
            .await?;
        Ok(Some(session))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<TransportSession>> {
        let mut sessions = Vec::new();
        let mut after = None;
        loop {
            let page = self.kv.list(&by_user_prefix(user_id), after.as_ref(), LIST_BATCH_SIZE).await?;
            let done = page.cursor.is_none();
            for (key, bytes) in &page.entries {
                let pointer: UserIndexPointer = serde_json::from_slice(bytes)?;
                if let Some(session) = self.get(&pointer.session_id).await? {
                    sessions.push(session);
                }
                after = Some(key.clone());
            }
            if done {
                break;
            }
        }
        Ok(sessions)
    }

    pub async fn list_active(&self) -> Result<Vec<TransportSession>> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|s| s.is_active).collect())
    }

    async fn list_all(&self) -> Result<Vec<TransportSession>> {
        let prefix = Key::new([TRANSPORT_PREFIX, "session"]);
        let mut sessions = Vec::new();
        let mut after = None;
        loop {
            let page = self.kv.list(&prefix, after.as_ref(), LIST_BATCH_SIZE).await?;
            let done = page.cursor.is_none();
            for (key, bytes) in &page.entries {
                sessions.push(serde_json::from_slice(bytes)?);
                after = Some(key.clone());
            }
            if done {
                break;
            }
        }
        Ok(sessions)
    }

    /// Deletes inactive records whose `last_activity` is older than
    /// `max_age_ms` (default 24h), in bounded batches.
    pub async fn cleanup_old(&self, max_age_ms: Option<i64>) -> Result<usize> {
        let cutoff = time::now() - chrono::Duration::milliseconds(max_age_ms.unwrap_or(DEFAULT_MAX_AGE_MS));
        let stale: Vec<TransportSession> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|s| !s.is_active && s.last_activity < cutoff)
            .collect();

        let mut deleted = 0;
        for batch in stale.chunks(CLEANUP_BATCH_SIZE) {
            for session in batch {
                self.delete(&session.session_id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let key = session_key(session_id);
        if let Some(session) = self.kv.get_json::<TransportSession>(&key).await? {
            if let Some(user_id) = &session.user_id {
                self.kv.delete(&by_user_key(user_id, session_id)).await?;
            }
        }
        self.kv.delete(&key).await
    }

    pub async fn stats(&self) -> Result<TransportPersistenceStats> {
        let all = self.list_all().await?;
        Ok(TransportPersistenceStats {
            total_sessions: all.len(),
            active_sessions: all.iter().filter(|s| s.is_active).count(),
        })
    }

    /// Restore-after-restart (spec §4.5): reconstructs a transport for every
    /// active persisted session via the caller-supplied `factory`, isolating
    /// per-session failures instead of aborting the batch. The caller is
    /// responsible for inserting the returned `(session_id, transport)` pairs
    /// into its in-memory session→transport map.
    pub async fn restore_transports<F, Fut, T>(&self, mut factory: F) -> Result<RestoreOutcome<T>>
    where
        F: FnMut(TransportSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let active = self.list_active().await?;
        let mut restored = Vec::new();
        let mut errors = Vec::new();

        for session in active {
            let session_id = session.session_id.clone();
            match factory(session).await {
                Ok(transport) => restored.push((session_id, transport)),
                Err(error) => {
                    tracing::warn!(session_id, %error, "failed to restore transport session");
                    errors.push(format!("{session_id}: {error}"));
                }
            }
        }

        let failed_count = errors.len();
        Ok(RestoreOutcome {
            restored,
            failed_count,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_kv::MemoryKv;

    fn transport_session(session_id: &str, user_id: Option<&str>, is_active: bool) -> TransportSession {
        let now = time::now();
        TransportSession {
            session_id: session_id.to_string(),
            user_id: user_id.map(str::to_string),
            config: TransportConfigSnapshot {
                hostname: "0.0.0.0".to_string(),
                port: 8080,
                allowed_hosts: vec!["localhost".to_string()],
            },
            created_at: now,
            last_activity: now,
            is_active,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn persist_then_get_round_trips() {
        let store = TransportPersistenceStore::new(Arc::new(MemoryKv::new()));
        store.persist(&transport_session("t1", Some("u1"), true)).await.unwrap();
        let fetched = store.get("t1").await.unwrap().unwrap();
        assert!(fetched.is_active);
    }

    #[tokio::test]
    async fn mark_inactive_preserves_record() {
        let store = TransportPersistenceStore::new(Arc::new(MemoryKv::new()));
        store.persist(&transport_session("t1", None, true)).await.unwrap();
        store.mark_inactive("t1").await.unwrap();
        let fetched = store.get("t1").await.unwrap().unwrap();
        assert!(!fetched.is_active);
    }

    #[tokio::test]
    async fn list_active_excludes_inactive_sessions() {
        let store = TransportPersistenceStore::new(Arc::new(MemoryKv::new()));
        store.persist(&transport_session("t1", None, true)).await.unwrap();
        store.persist(&transport_session("t2", None, false)).await.unwrap();
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "t1");
    }

    #[tokio::test]
    async fn restore_transports_isolates_per_session_failures() {
        let store = TransportPersistenceStore::new(Arc::new(MemoryKv::new()));
        store.persist(&transport_session("good", None, true)).await.unwrap();
        store.persist(&transport_session("bad", None, true)).await.unwrap();

        let outcome = store
            .restore_transports(|session| async move {
                if session.session_id == "bad" {
                    Err(relaymcp_core::Error::transport("boom"))
                } else {
                    Ok(session.session_id.clone())
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.restored_count(), 1);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.restored[0].1, "good");
    }

    #[tokio::test]
    async fn cleanup_old_deletes_only_stale_inactive_sessions() {
        let store = TransportPersistenceStore::new(Arc::new(MemoryKv::new()));
        let mut stale = transport_session("old", None, false);
        stale.last_activity = time::now() - chrono::Duration::hours(48);
        store.persist(&stale).await.unwrap();
        store.persist(&transport_session("fresh", None, false)).await.unwrap();
        store.persist(&transport_session("active", None, true)).await.unwrap();

        let deleted = store.cleanup_old(None).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
