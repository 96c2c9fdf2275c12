//! Session Store (spec §4.2): generic application sessions keyed by session
//! id, with a secondary user→session index and a background sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relaymcp_core::{time, Error, Result};
use relaymcp_kv::{Key, KvStore, KvStoreJsonExt, SetOptions};
use serde_json::Value;

const SESSIONS_PREFIX: &str = "sessions";
const LIST_BATCH_SIZE: usize = 200;

fn session_key(session_id: &str) -> Key {
    Key::new([SESSIONS_PREFIX, session_id])
}

fn by_user_prefix(user_id: &str) -> Key {
    Key::new([SESSIONS_PREFIX, "by_user", user_id])
}

fn by_user_key(user_id: &str, session_id: &str) -> Key {
    by_user_prefix(user_id).join(session_id)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct UserIndexPointer {
    session_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub expired_sessions: usize,
}

pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn store(&self, session: &Session) -> Result<()> {
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

    /// Reads a session, deleting and returning absent on expiry.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let key = session_key(session_id);
        let Some(session): Option<Session> = self.kv.get_json(&key).await? else {
            return Ok(None);
        };
        if time::is_expired(session.expires_at) {
            self.delete(session_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Read-modify-write: applies `mutate` to the current session and
    /// persists the result, auto-touching `last_active_at`. `session_id`
    /// is preserved regardless of what `mutate` does to it.
    pub async fn update(&self, session_id: &str, mutate: impl FnOnce(&mut Session)) -> Result<Session> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("session {session_id} not found")))?;
        mutate(&mut session);
        session.session_id = session_id.to_string();
        session.last_active_at = time::now();
        self.kv
            .set_json(session_key(session_id), &session, SetOptions::default())
            .await?;
        Ok(session)
    }

    pub async fn touch(&self, session_id: &str) -> Result<Session> {
        self.update(session_id, |_| {}).await
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let key = session_key(session_id);
        if let Some(session): Option<Session> = self.kv.get_json(&key).await? {
            if let Some(user_id) = &session.user_id {
                self.kv.delete(&by_user_key(user_id, session_id)).await?;
            }
        }
        self.kv.delete(&key).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
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

    pub async fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        let sessions = self.list_for_user(user_id).await?;
        let count = sessions.len();
        for session in sessions {
            self.delete(&session.session_id).await?;
        }
        Ok(count)
    }

    /// Deletes sessions whose `expires_at` is at or before `before`
    /// (defaults to now when `None`). Returns the number swept.
    pub async fn sweep_expired(&self, before: Option<DateTime<Utc>>) -> Result<usize> {
        let cutoff = before.unwrap_or_else(time::now);
        let mut expired_ids = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .kv
                .list(&Key::new([SESSIONS_PREFIX]), after.as_ref(), LIST_BATCH_SIZE)
                .await?;
            let done = page.cursor.is_none();
            for (key, bytes) in &page.entries {
                // Skip the by_user index subtree; only top-level session records.
                if key.segments().len() == 2 {
                    let session: Session = serde_json::from_slice(bytes)?;
                    if session.expires_at <= cutoff {
                        expired_ids.push(session.session_id);
                    }
                }
                after = Some(key.clone());
            }
            if done {
                break;
            }
        }
        for session_id in &expired_ids {
            self.delete(session_id).await?;
        }
        Ok(expired_ids.len())
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        let mut stats = SessionStats::default();
        let mut after = None;
        loop {
            let page = self
                .kv
                .list(&Key::new([SESSIONS_PREFIX]), after.as_ref(), LIST_BATCH_SIZE)
                .await?;
            let done = page.cursor.is_none();
            for (key, bytes) in &page.entries {
                if key.segments().len() == 2 {
                    let session: Session = serde_json::from_slice(bytes)?;
                    stats.total_sessions += 1;
                    if time::is_expired(session.expires_at) {
                        stats.expired_sessions += 1;
                    }
                }
                after = Some(key.clone());
            }
            if done {
                break;
            }
        }
        Ok(stats)
    }

    /// Spawns the background sweeper (spec §4.2 default interval 1 h).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(error) = store.sweep_expired(None).await {
                    tracing::warn!(%error, "session sweep failed");
                }
            }
        })
    }
}
