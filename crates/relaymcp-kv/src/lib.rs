//! The KV Store contract (spec §4.1): an ordered-key persistent map with
//! atomic multi-write transactions, prefix iteration, per-entry TTL, and a
//! hard ~64 KiB per-value size limit.
//!
//! Everything persistent in the rest of the RelayMCP crate family is layered
//! on top of [`KvStore`]. This crate ships [`MemoryKv`], a reference
//! implementation good enough for tests and single-process deployments; a
//! production deployment swaps it for a real ordered-key store (sled, redis,
//! postgres) behind the same trait.

mod key;
mod memory;

pub use key::Key;
pub use memory::MemoryKv;

use async_trait::async_trait;
use relaymcp_core::Result;

/// Maximum size, in bytes, of a single stored value (spec §4.1).
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

/// Recommended maximum batch size for `atomic` deletions (spec §4.1: "Batches
/// of deletions use a bounded batch size (≈5–10) to stay under transaction
/// limits").
pub const RECOMMENDED_DELETE_BATCH_SIZE: usize = 8;

/// Options accepted by [`KvStore::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Optional TTL in milliseconds. Implementations that lack native TTL
    /// support emulate it with background sweeping; callers must not rely on
    /// TTL alone for correctness (spec §4.1).
    pub expires_in_ms: Option<i64>,
}

impl SetOptions {
    pub fn with_ttl(expires_in_ms: i64) -> Self {
        Self {
            expires_in_ms: Some(expires_in_ms),
        }
    }
}

/// A single operation within an [`KvStore::atomic`] transaction.
#[derive(Debug, Clone)]
pub enum KvOp {
    Set {
        key: Key,
        value: Vec<u8>,
        options: SetOptions,
    },
    Delete {
        key: Key,
    },
    /// Precondition: `key` must be present (and unexpired) when the batch
    /// runs, or the whole transaction fails with [`AtomicOutcome::Conflict`]
    /// and no op in the batch is applied. Used to make single-use-token
    /// consumption (authorization codes, refresh token rotation) safe under
    /// concurrent callers — a losing caller observes `Conflict` rather than
    /// also succeeding.
    RequirePresent {
        key: Key,
    },
}

impl KvOp {
    pub fn set(key: Key, value: Vec<u8>) -> Self {
        Self::Set {
            key,
            value,
            options: SetOptions::default(),
        }
    }

    pub fn set_with_ttl(key: Key, value: Vec<u8>, expires_in_ms: i64) -> Self {
        Self::Set {
            key,
            value,
            options: SetOptions::with_ttl(expires_in_ms),
        }
    }

    pub fn delete(key: Key) -> Self {
        Self::Delete { key }
    }

    pub fn require_present(key: Key) -> Self {
        Self::RequirePresent { key }
    }
}

/// Outcome of [`KvStore::atomic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOutcome {
    Committed,
    Conflict,
}

/// One page of a prefix listing, with a cursor to resume from.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<(Key, Vec<u8>)>,
    /// Present iff there may be more entries after this page.
    pub cursor: Option<Key>,
}

/// The KV Store contract.
///
/// All methods are suspension points (spec §5): implementations must not hold
/// any non-KV lock across an `.await` of one of these calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a single value, or `Ok(None)` if absent or expired.
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value. Rejects values larger than
    /// [`MAX_VALUE_SIZE`] with a validation error.
    async fn set(&self, key: Key, value: Vec<u8>, options: SetOptions) -> Result<()>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// List entries whose key starts with `prefix`, in ascending key order.
    /// `batch_size` bounds the page size; pass the returned `cursor` back in
    /// via [`Key::resume_after`]-style exclusive-start semantics by calling
    /// this again with `prefix` unchanged and relying on the implementation
    /// to skip past the cursor — concretely, callers pass `after` explicitly.
    async fn list(&self, prefix: &Key, after: Option<&Key>, batch_size: usize) -> Result<ListPage>;

    /// Apply a batch of `set`/`delete`/`require_present` operations
    /// all-or-nothing. Returns [`AtomicOutcome::Conflict`] (no writes
    /// applied) if any `RequirePresent` precondition in the batch fails.
    async fn atomic(&self, ops: Vec<KvOp>) -> Result<AtomicOutcome>;
}

/// Convenience extension for JSON-valued records, which is how every
/// higher-layer component in this workspace uses the KV store.
#[async_trait]
pub trait KvStoreJsonExt: KvStore {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &Key) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: Key,
        value: &T,
        options: SetOptions,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, options).await
    }
}

impl<T: KvStore + ?Sized> KvStoreJsonExt for T {}
