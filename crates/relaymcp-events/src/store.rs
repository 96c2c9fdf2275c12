//! The Transport Event Store / Chunked Event Store (spec §4.3, §4.4).
//!
//! A single implementation handles both the "base" per-stream append-only
//! log and the chunked-storage scheme for oversized messages: every event is
//! written as one metadata record plus `chunk_count` chunk records, with
//! `chunk_count == 1` for the common small-message case. This keeps the
//! event-id/ordering semantics (§4.3) and the chunking/compression math
//! (§4.4) in one place instead of duplicating the replay/cleanup logic across
//! two near-identical stores.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relaymcp_core::{time, Error, Result};
use relaymcp_kv::{Key, KvOp, KvStore, KvStoreJsonExt, SetOptions};
use tokio::sync::Mutex as AsyncMutex;

use crate::chunk::{self, ChunkingConfig, PreparedChunk};
use crate::stream_id::{format_event_id, parse_event_id, validate_stream_id};

/// Metadata record for one stored event (spec §3 `StoredEventMetadata`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredEventMetadata {
    pub event_id: String,
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_size: usize,
    pub chunk_count: u32,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct StreamIndexEntry {
    last_event_id: String,
    event_count: u64,
}

/// Aggregate statistics returned by [`ChunkedEventStore::chunk_statistics`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChunkStatistics {
    pub total_events: u64,
    pub total_chunks: u64,
    pub average_chunks_per_event: f64,
    pub largest_event: Option<StoredEventMetadata>,
    pub compressed_count: u64,
    pub uncompressed_count: u64,
}

/// Outcome of restoring one replayed event to a caller-supplied sink.
pub type ReplaySink<'a> = dyn FnMut(String, serde_json::Value) + Send + 'a;

fn stream_prefix(stream_id: &str) -> Key {
    Key::new(["events", "stream", stream_id])
}

fn metadata_prefix(stream_id: &str) -> Key {
    stream_prefix(stream_id).join("metadata")
}

fn metadata_key(stream_id: &str, event_id: &str) -> Key {
    metadata_prefix(stream_id).join(event_id)
}

fn chunks_prefix(stream_id: &str) -> Key {
    stream_prefix(stream_id).join("chunks")
}

fn chunk_event_prefix(stream_id: &str, event_id: &str) -> Key {
    chunks_prefix(stream_id).join(event_id)
}

fn chunk_key(stream_id: &str, event_id: &str, chunk_index: u32) -> Key {
    chunk_event_prefix(stream_id, event_id).join(chunk_index.to_string())
}

fn counter_key(stream_id: &str) -> Key {
    stream_prefix(stream_id).join("counter")
}

fn streams_index_key(stream_id: &str) -> Key {
    Key::new(["events", "streams_index", stream_id])
}

const STREAMS_INDEX_PREFIX_SEGMENTS: [&str; 2] = ["events", "streams_index"];

/// Exhaustively page through a KV prefix, looping on the returned cursor.
async fn list_all(kv: &dyn KvStore, prefix: &Key) -> Result<Vec<(Key, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut after = None;
    loop {
        let page = kv.list(prefix, after.as_ref(), 500).await?;
        let done = page.cursor.is_none();
        if let Some((last_key, _)) = page.entries.last() {
            after = Some(last_key.clone());
        }
        out.extend(page.entries);
        if done {
            break;
        }
    }
    Ok(out)
}

/// The Transport Event Store / Chunked Event Store.
pub struct ChunkedEventStore {
    kv: Arc<dyn KvStore>,
    config: ChunkingConfig,
    stream_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ChunkedEventStore {
    pub fn new(kv: Arc<dyn KvStore>, config: ChunkingConfig) -> Self {
        Self {
            kv,
            config,
            stream_locks: DashMap::new(),
        }
    }

    fn stream_lock(&self, stream_id: &str) -> Arc<AsyncMutex<()>> {
        self.stream_locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Append `message` to `stream_id`'s log, returning the new event id.
    ///
    /// Ordering guarantee (spec §5): calls for the same `stream_id` are
    /// serialized through a per-stream lock so the counter read-then-write
    /// that allocates the event id is never raced, and the metadata+chunk
    /// writes land in one atomic KV transaction.
    pub async fn store_event(&self, stream_id: &str, message: &serde_json::Value) -> Result<String> {
        validate_stream_id(stream_id)?;
        let prepared = chunk::prepare_payload(message, &self.config)?;
        let chunks = chunk::split_into_chunks(&prepared.bytes, &self.config);

        let lock = self.stream_lock(stream_id);
        let _guard = lock.lock().await;

        let counter: u64 = self
            .kv
            .get_json(&counter_key(stream_id))
            .await?
            .unwrap_or(0);
        let next_counter = counter + 1;
        let event_id = format_event_id(stream_id, next_counter);

        let metadata = StoredEventMetadata {
            event_id: event_id.clone(),
            stream_id: stream_id.to_string(),
            timestamp: time::now(),
            message_size: prepared.original_size,
            chunk_count: chunks.len() as u32,
            compressed: prepared.compressed,
        };

        let mut ops = Vec::with_capacity(chunks.len() + 2);
        ops.push(KvOp::set_with_ttl(
            metadata_key(stream_id, &event_id),
            serde_json::to_vec(&metadata)?,
            self.config.chunk_ttl_ms,
        ));
        for chunk in &chunks {
            ops.push(KvOp::set_with_ttl(
                chunk_key(stream_id, &event_id, chunk.chunk_index),
                serde_json::to_vec(chunk)?,
                self.config.chunk_ttl_ms,
            ));
        }
        ops.push(KvOp::set(
            counter_key(stream_id),
            serde_json::to_vec(&next_counter)?,
        ));
        self.kv.atomic(ops).await?;
        drop(_guard);

        // Best-effort, outside the atomic write (spec §4.4 step 5): failure
        // here must not fail the store_event call.
        let index_entry = StreamIndexEntry {
            last_event_id: event_id.clone(),
            event_count: next_counter,
        };
        if let Err(e) = self
            .kv
            .set_json(streams_index_key(stream_id), &index_entry, SetOptions::default())
            .await
        {
            tracing::warn!(stream_id, error = %e, "failed to update stream index metadata");
        }

        Ok(event_id)
    }

    /// Load and checksum-verify every chunk of `event_id`, returning the
    /// reassembled message, or `Ok(None)` if the metadata record is absent.
    /// A chunk read/checksum failure is a hard error the caller decides how
    /// to handle (replay logs-and-skips; direct callers may want to fail).
    pub async fn reassemble(&self, stream_id: &str, event_id: &str) -> Result<Option<serde_json::Value>> {
        let metadata: Option<StoredEventMetadata> =
            self.kv.get_json(&metadata_key(stream_id, event_id)).await?;
        let Some(metadata) = metadata else {
            return Ok(None);
        };

        let mut payload = Vec::with_capacity(metadata.message_size);
        for i in 0..metadata.chunk_count {
            let chunk: Option<PreparedChunk> =
                self.kv.get_json(&chunk_key(stream_id, event_id, i)).await?;
            let chunk = chunk.ok_or_else(|| {
                Error::storage(format!("event {event_id} is missing chunk {i} of {}", metadata.chunk_count))
            })?;
            payload.extend(chunk::decode_chunk(&chunk)?);
        }

        let message = chunk::reassemble_message(&payload, metadata.compressed)?;
        Ok(Some(message))
    }

    /// Replay events strictly after `last_event_id`, in ascending timestamp
    /// order. An empty `last_event_id` replays every event across every
    /// stream, globally timestamp-ordered. Individual reassembly failures
    /// are logged and skipped, never abort the replay (spec §7).
    pub async fn replay_events_after(&self, last_event_id: &str, send: &mut ReplaySink<'_>) -> Result<()> {
        let candidates: Vec<StoredEventMetadata> = if last_event_id.is_empty() {
            let mut all = Vec::new();
            for stream_id in self.known_stream_ids().await? {
                all.extend(self.metadata_for_stream(&stream_id).await?);
            }
            all
        } else {
            let (stream_id, after_counter) = parse_event_id(last_event_id)?;
            self.metadata_for_stream(stream_id)
                .await?
                .into_iter()
                .filter(|m| {
                    parse_event_id(&m.event_id)
                        .map(|(_, c)| c > after_counter)
                        .unwrap_or(false)
                })
                .collect()
        };

        let mut candidates = candidates;
        candidates.sort_by_key(|m| m.timestamp);

        for metadata in candidates {
            match self.reassemble(&metadata.stream_id, &metadata.event_id).await {
                Ok(Some(message)) => send(metadata.event_id, message),
                Ok(None) => {
                    tracing::warn!(event_id = %metadata.event_id, "metadata vanished during replay");
                }
                Err(e) => {
                    tracing::warn!(event_id = %metadata.event_id, error = %e, "skipping corrupted event during replay");
                }
            }
        }
        Ok(())
    }

    /// Retain only the newest `keep_count` events of `stream_id`, deleting
    /// the rest (metadata + all their chunks) in bounded batches.
    pub async fn cleanup_old_events(&self, stream_id: &str, keep_count: usize) -> Result<usize> {
        let mut all = self.metadata_for_stream(stream_id).await?;
        all.sort_by_key(|m| parse_event_id(&m.event_id).map(|(_, c)| c).unwrap_or(0));
        if all.len() <= keep_count {
            return Ok(0);
        }
        let to_remove = &all[..all.len() - keep_count];
        let mut deleted = 0;
        for batch in to_remove.chunks(relaymcp_kv::RECOMMENDED_DELETE_BATCH_SIZE) {
            let mut ops = Vec::new();
            for metadata in batch {
                ops.push(KvOp::delete(metadata_key(stream_id, &metadata.event_id)));
                for i in 0..metadata.chunk_count {
                    ops.push(KvOp::delete(chunk_key(stream_id, &metadata.event_id, i)));
                }
            }
            self.kv.atomic(ops).await?;
            deleted += batch.len();
        }
        Ok(deleted)
    }

    /// Delete chunk records whose metadata is missing (spec §4.4).
    pub async fn cleanup_orphaned_chunks(&self, stream_id: &str) -> Result<usize> {
        let all_chunks = list_all(self.kv.as_ref(), &chunks_prefix(stream_id)).await?;
        let mut by_event: HashMap<String, Vec<Key>> = HashMap::new();
        for (key, _) in all_chunks {
            // key segments: ["events","stream",stream_id,"chunks",event_id,chunk_index]
            if let Some(event_id) = key.segments().get(4) {
                by_event.entry(event_id.clone()).or_default().push(key);
            }
        }

        let mut deleted = 0;
        for (event_id, keys) in by_event {
            let has_metadata = self
                .kv
                .get(&metadata_key(stream_id, &event_id))
                .await?
                .is_some();
            if has_metadata {
                continue;
            }
            for batch in keys.chunks(relaymcp_kv::RECOMMENDED_DELETE_BATCH_SIZE) {
                let ops = batch.iter().cloned().map(KvOp::delete).collect();
                self.kv.atomic(ops).await?;
                deleted += batch.len();
            }
        }
        Ok(deleted)
    }

    /// Aggregate statistics for one stream, or across all known streams if
    /// `stream_id` is `None`.
    pub async fn chunk_statistics(&self, stream_id: Option<&str>) -> Result<ChunkStatistics> {
        let all_metadata: Vec<StoredEventMetadata> = match stream_id {
            Some(id) => self.metadata_for_stream(id).await?,
            None => {
                let mut all = Vec::new();
                for id in self.known_stream_ids().await? {
                    all.extend(self.metadata_for_stream(&id).await?);
                }
                all
            }
        };

        let mut stats = ChunkStatistics::default();
        for metadata in &all_metadata {
            stats.total_events += 1;
            stats.total_chunks += u64::from(metadata.chunk_count);
            if metadata.compressed {
                stats.compressed_count += 1;
            } else {
                stats.uncompressed_count += 1;
            }
            let is_largest = stats
                .largest_event
                .as_ref()
                .is_none_or(|largest| metadata.message_size > largest.message_size);
            if is_largest {
                stats.largest_event = Some(metadata.clone());
            }
        }
        if stats.total_events > 0 {
            stats.average_chunks_per_event = stats.total_chunks as f64 / stats.total_events as f64;
        }
        Ok(stats)
    }

    async fn metadata_for_stream(&self, stream_id: &str) -> Result<Vec<StoredEventMetadata>> {
        let entries = list_all(self.kv.as_ref(), &metadata_prefix(stream_id)).await?;
        entries
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }

    async fn known_stream_ids(&self) -> Result<Vec<String>> {
        let prefix = Key::new(STREAMS_INDEX_PREFIX_SEGMENTS);
        let entries = list_all(self.kv.as_ref(), &prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.segments().get(2).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_kv::MemoryKv;
    use serde_json::json;

    fn store() -> ChunkedEventStore {
        ChunkedEventStore::new(Arc::new(MemoryKv::new()), ChunkingConfig::default())
    }

    #[tokio::test]
    async fn store_then_reassemble_round_trips() {
        let store = store();
        let message = json!({"jsonrpc": "2.0", "method": "ping"});
        let event_id = store.store_event("s1", &message).await.unwrap();
        assert_eq!(event_id, "s1|1");
        let restored = store.reassemble("s1", &event_id).await.unwrap().unwrap();
        assert_eq!(restored, message);
    }

    #[tokio::test]
    async fn event_ids_are_monotonic_per_stream() {
        let store = store();
        let e1 = store.store_event("s1", &json!(1)).await.unwrap();
        let e2 = store.store_event("s1", &json!(2)).await.unwrap();
        let e3 = store.store_event("s1", &json!(3)).await.unwrap();
        assert_eq!((e1.as_str(), e2.as_str(), e3.as_str()), ("s1|1", "s1|2", "s1|3"));
    }

    #[tokio::test]
    async fn large_event_round_trips_with_many_chunks() {
        let store = store();
        let message = json!({"payload": "z".repeat(500 * 1024)});
        let event_id = store.store_event("big", &message).await.unwrap();
        let stats = store.chunk_statistics(Some("big")).await.unwrap();
        assert_eq!(stats.total_events, 1);
        assert!(stats.total_chunks >= 8);
        let restored = store.reassemble("big", &event_id).await.unwrap().unwrap();
        assert_eq!(restored, message);
    }

    #[tokio::test]
    async fn replay_after_empty_id_delivers_every_event_once() {
        let store = store();
        store.store_event("a", &json!("a1")).await.unwrap();
        store.store_event("b", &json!("b1")).await.unwrap();
        store.store_event("a", &json!("a2")).await.unwrap();

        let mut seen = Vec::new();
        let mut sink = |id: String, msg: serde_json::Value| seen.push((id, msg));
        store.replay_events_after("", &mut sink).await.unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn replay_after_an_id_only_returns_later_events_in_that_stream() {
        let store = store();
        let e1 = store.store_event("s", &json!(1)).await.unwrap();
        let e2 = store.store_event("s", &json!(2)).await.unwrap();
        store.store_event("other", &json!("x")).await.unwrap();

        let mut seen = Vec::new();
        let mut sink = |id: String, msg: serde_json::Value| seen.push((id, msg));
        store.replay_events_after(&e1, &mut sink).await.unwrap();
        assert_eq!(seen, vec![(e2, json!(2))]);
    }

    #[tokio::test]
    async fn cleanup_old_events_retains_only_newest() {
        let store = store();
        for i in 0..10 {
            store.store_event("s", &json!(i)).await.unwrap();
        }
        let deleted = store.cleanup_old_events("s", 3).await.unwrap();
        assert_eq!(deleted, 7);
        let remaining = store.metadata_for_stream("s").await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn corrupted_event_is_skipped_not_fatal_during_replay() {
        let store = store();
        let good = store.store_event("s", &json!("ok")).await.unwrap();
        let bad = store.store_event("s", &json!("corrupt-me")).await.unwrap();
        // Corrupt the bad event's single chunk directly through the KV layer.
        let mut tampered: PreparedChunk = store
            .kv
            .get_json(&chunk_key("s", &bad, 0))
            .await
            .unwrap()
            .unwrap();
        tampered.checksum = tampered.checksum.wrapping_add(1);
        store
            .kv
            .set_json(chunk_key("s", &bad, 0), &tampered, SetOptions::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut sink = |id: String, msg: serde_json::Value| seen.push((id, msg));
        store.replay_events_after("", &mut sink).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, good);
    }

    #[tokio::test]
    async fn orphaned_chunks_without_metadata_are_cleaned_up() {
        let store = store();
        // Write a chunk directly, bypassing store_event, so it has no
        // metadata record — simulating a crash between the two writes.
        let orphan_chunk = PreparedChunk {
            chunk_index: 0,
            data_b64: "AAA=".to_string(),
            checksum: 0,
        };
        store
            .kv
            .set_json(chunk_key("s", "s|99", 0), &orphan_chunk, SetOptions::default())
            .await
            .unwrap();
        let deleted = store.cleanup_orphaned_chunks("s").await.unwrap();
        assert_eq!(deleted, 1);
    }
}
