//! Resumable per-stream event log (spec §4.3/§4.4): the Transport Event
//! Store and its chunked+compressed extension for messages too large for a
//! single KV value.

mod chunk;
mod store;
mod stream_id;

pub use chunk::{ChunkingConfig, PreparedChunk, DEFAULT_CHUNK_TTL_MS, DEFAULT_COMPRESSION_THRESHOLD,
    DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
pub use store::{ChunkStatistics, ChunkedEventStore, StoredEventMetadata};
pub use stream_id::{format_event_id, parse_event_id, validate_stream_id};
