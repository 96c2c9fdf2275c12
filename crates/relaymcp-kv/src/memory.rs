//! In-process reference implementation of [`crate::KvStore`].
//!
//! Backed by a single `BTreeMap` under a `parking_lot::RwLock` so ordering
//! falls out of the map's natural iteration order and "atomic" batches are
//! trivially atomic (the whole batch runs under one write-lock critical
//! section, never held across an `.await`).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use relaymcp_core::{time, Error, Result};

use crate::{AtomicOutcome, Key, KvOp, KvStore, ListPage, SetOptions, MAX_VALUE_SIZE};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(time::is_expired)
    }
}

/// An in-memory [`KvStore`]. Cheaply cloneable (the map lives behind an
/// `Arc`); spawn [`MemoryKv::spawn_ttl_sweeper`] once per process if you want
/// expired entries reclaimed proactively rather than lazily on access.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<RwLock<BTreeMap<Key, Entry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background task that sweeps expired entries every `interval`.
    /// TTL in this store is best-effort (spec §4.1): correctness never
    /// depends on the sweeper running, only on the lazy expiry check in
    /// `get`/`list`.
    pub fn spawn_ttl_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut guard = inner.write();
                guard.retain(|_, entry| !entry.is_expired());
            }
        })
    }

    fn validate_value_size(value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::validation(format!(
                "value size {} exceeds the {}-byte KV store limit; chunk it first",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.write();
        match guard.get(key) {
            Some(entry) if entry.is_expired() => {
                guard.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: Key, value: Vec<u8>, options: SetOptions) -> Result<()> {
        Self::validate_value_size(&value)?;
        let expires_at = options.expires_in_ms.map(time::expiry_from_now);
        self.inner.write().insert(key, Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &Key, after: Option<&Key>, batch_size: usize) -> Result<ListPage> {
        let mut guard = self.inner.write();
        let mut expired = Vec::new();
        let mut entries = Vec::new();
        let mut cursor = None;

        for (k, entry) in guard.range(prefix.clone()..) {
            if !k.starts_with(prefix) {
                break;
            }
            if let Some(after) = after {
                if k <= after {
                    continue;
                }
            }
            if entry.is_expired() {
                expired.push(k.clone());
                continue;
            }
            if entries.len() == batch_size {
                // More entries remain after this page; resume from the last
                // *included* key so the caller's next `after` excludes
                // exactly what this page already returned, not one past it.
                cursor = entries.last().map(|(k, _)| k.clone());
                break;
            }
            entries.push((k.clone(), entry.value.clone()));
        }

        for k in expired {
            guard.remove(&k);
        }

        Ok(ListPage { entries, cursor })
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<AtomicOutcome> {
        // Validate before touching the map so a bad op never leaves a
        // partially-applied batch.
        for op in &ops {
            if let KvOp::Set { value, .. } = op {
                Self::validate_value_size(value)?;
            }
        }

        let mut guard = self.inner.write();

        // Evaluate every precondition before applying any write, under the
        // same write-lock critical section, so a failing `RequirePresent`
        // leaves the batch fully unapplied.
        for op in &ops {
            if let KvOp::RequirePresent { key } = op {
                match guard.get(key) {
                    Some(entry) if !entry.is_expired() => {}
                    _ => return Ok(AtomicOutcome::Conflict),
                }
            }
        }

        for op in ops {
            match op {
                KvOp::Set { key, value, options } => {
                    let expires_at = options.expires_in_ms.map(time::expiry_from_now);
                    guard.insert(key, Entry { value, expires_at });
                }
                KvOp::Delete { key } => {
                    guard.remove(&key);
                }
                KvOp::RequirePresent { .. } => {}
            }
        }
        Ok(AtomicOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SetOptions;

    fn key(s: &str) -> Key {
        Key::new(s.split('/'))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = MemoryKv::new();
        kv.set(key("a/b"), b"hello".to_vec(), SetOptions::default())
            .await
            .unwrap();
        assert_eq!(kv.get(&key("a/b")).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn oversized_value_is_rejected() {
        let kv = MemoryKv::new();
        let big = vec![0u8; crate::MAX_VALUE_SIZE + 1];
        let err = kv.set(key("big"), big, SetOptions::default()).await.unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent_and_is_deleted() {
        let kv = MemoryKv::new();
        kv.set(key("ephemeral"), b"x".to_vec(), SetOptions::with_ttl(-1))
            .await
            .unwrap();
        assert_eq!(kv.get(&key("ephemeral")).await.unwrap(), None);
        // Second read confirms it was actually removed, not just filtered.
        let page = kv.list(&key("ephemeral"), None, 10).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn list_respects_prefix_and_ascending_order() {
        let kv = MemoryKv::new();
        for n in ["sessions/b", "sessions/a", "sessions/c", "other/x"] {
            kv.set(key(n), b"v".to_vec(), SetOptions::default()).await.unwrap();
        }
        let page = kv.list(&key("sessions"), None, 10).await.unwrap();
        let keys: Vec<String> = page.entries.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["sessions/a", "sessions/b", "sessions/c"]);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn list_pagination_resumes_via_cursor() {
        let kv = MemoryKv::new();
        for n in 0..5 {
            kv.set(key(&format!("p/{n}")), b"v".to_vec(), SetOptions::default())
                .await
                .unwrap();
        }
        let first = kv.list(&key("p"), None, 2).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.cursor.expect("more entries remain");
        let second = kv.list(&key("p"), Some(&cursor), 2).await.unwrap();
        assert_eq!(second.entries.len(), 2);
        let third = kv.list(&key("p"), Some(&second.cursor.unwrap()), 2).await.unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(third.cursor.is_none());
    }

    #[tokio::test]
    async fn atomic_batch_applies_all_or_nothing_on_validation_failure() {
        let kv = MemoryKv::new();
        let big = vec![0u8; crate::MAX_VALUE_SIZE + 1];
        let ops = vec![
            KvOp::set(key("ok"), b"v".to_vec()),
            KvOp::set(key("bad"), big),
        ];
        let err = kv.atomic(ops).await.unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
        // The valid op in the same batch must not have been applied either.
        assert_eq!(kv.get(&key("ok")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_require_present_conflicts_on_missing_key_and_applies_nothing() {
        let kv = MemoryKv::new();
        let outcome = kv
            .atomic(vec![
                KvOp::require_present(key("never-set")),
                KvOp::set(key("new"), b"v".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(outcome, AtomicOutcome::Conflict);
        assert_eq!(kv.get(&key("new")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_require_present_commits_when_key_exists() {
        let kv = MemoryKv::new();
        kv.set(key("token"), b"v".to_vec(), SetOptions::default()).await.unwrap();
        let outcome = kv
            .atomic(vec![KvOp::require_present(key("token")), KvOp::delete(key("token"))])
            .await
            .unwrap();
        assert_eq!(outcome, AtomicOutcome::Committed);
        assert_eq!(kv.get(&key("token")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_delete_and_set_commit_together() {
        let kv = MemoryKv::new();
        kv.set(key("old"), b"v".to_vec(), SetOptions::default()).await.unwrap();
        let outcome = kv
            .atomic(vec![KvOp::delete(key("old")), KvOp::set(key("new"), b"v2".to_vec())])
            .await
            .unwrap();
        assert_eq!(outcome, AtomicOutcome::Committed);
        assert_eq!(kv.get(&key("old")).await.unwrap(), None);
        assert_eq!(kv.get(&key("new")).await.unwrap(), Some(b"v2".to_vec()));
    }
}
