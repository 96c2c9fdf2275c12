//! Pure chunking, compression, and checksum logic (spec §4.4).
//!
//! Kept free of any KV dependency so the write/read-path math can be
//! property-tested without a store.

use std::io::{Read, Write};

use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use relaymcp_core::{Error, Result};

/// Default max chunk size before the 0.75 budgeting factor is applied.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 60 * 1024;
/// Default compression threshold (spec §4.4).
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;
/// Default max message size (spec §4.4).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Default chunk TTL fallback: 90 days, in milliseconds.
pub const DEFAULT_CHUNK_TTL_MS: i64 = 90 * 24 * 60 * 60 * 1000;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Knobs controlling the write path; mirrors `EVENT_STORE_*` config keys.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub enable_compression: bool,
    pub compression_threshold: usize,
    pub max_message_size: usize,
    pub chunk_ttl_ms: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            enable_compression: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            chunk_ttl_ms: DEFAULT_CHUNK_TTL_MS,
        }
    }
}

impl ChunkingConfig {
    /// `floor(max_chunk_size * 0.75)` — budgets for base64 expansion and
    /// per-chunk metadata overhead so no chunk value exceeds the KV limit.
    pub fn effective_chunk_size(&self) -> usize {
        (self.max_chunk_size as f64 * 0.75).floor() as usize
    }
}

/// The result of preparing a message for storage: payload bytes ready to be
/// sliced into chunks, plus whether compression was actually used.
pub struct PreparedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub original_size: usize,
}

/// Serialize, size-check, and optionally compress a message (spec §4.4 steps
/// 1–2).
pub fn prepare_payload(message: &serde_json::Value, config: &ChunkingConfig) -> Result<PreparedPayload> {
    let json_bytes = serde_json::to_vec(message)?;
    let original_size = json_bytes.len();

    if original_size > config.max_message_size {
        return Err(Error::validation(format!(
            "message too large: {original_size} bytes exceeds max_message_size of {}",
            config.max_message_size
        )));
    }

    if !config.enable_compression || original_size < config.compression_threshold {
        return Ok(PreparedPayload {
            bytes: json_bytes,
            compressed: false,
            original_size,
        });
    }

    let gzipped = gzip(&json_bytes)?;
    // Estimate final on-the-wire size as what base64 of the compressed bytes
    // would take, since that's what ultimately gets stored per chunk.
    let estimated_compressed_len = gzipped.len().div_ceil(3) * 4;
    if estimated_compressed_len <= (original_size * 9) / 10 {
        Ok(PreparedPayload {
            bytes: gzipped,
            compressed: true,
            original_size,
        })
    } else {
        Ok(PreparedPayload {
            bytes: json_bytes,
            compressed: false,
            original_size,
        })
    }
}

/// A single chunk ready to persist.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PreparedChunk {
    pub chunk_index: u32,
    pub data_b64: String,
    pub checksum: u32,
}

/// Split prepared payload bytes into chunks (spec §4.4 step 3).
pub fn split_into_chunks(payload: &[u8], config: &ChunkingConfig) -> Vec<PreparedChunk> {
    let effective = config.effective_chunk_size().max(1);
    if payload.is_empty() {
        return vec![PreparedChunk {
            chunk_index: 0,
            data_b64: B64.encode([]),
            checksum: checksum32(&[]),
        }];
    }
    payload
        .chunks(effective)
        .enumerate()
        .map(|(i, slice)| PreparedChunk {
            chunk_index: i as u32,
            data_b64: B64.encode(slice),
            checksum: checksum32(slice),
        })
        .collect()
}

/// Decode and checksum-verify a single chunk, returning its raw bytes.
pub fn decode_chunk(chunk: &PreparedChunk) -> Result<Vec<u8>> {
    let bytes = B64
        .decode(&chunk.data_b64)
        .map_err(|e| Error::storage(format!("chunk {} has invalid base64: {e}", chunk.chunk_index)))?;
    if checksum32(&bytes) != chunk.checksum {
        return Err(Error::storage(format!(
            "chunk {} failed checksum verification (corrupted)",
            chunk.chunk_index
        )));
    }
    Ok(bytes)
}

/// Reassemble payload bytes back into the original JSON message.
pub fn reassemble_message(payload: &[u8], compressed: bool) -> Result<serde_json::Value> {
    let json_bytes = if compressed { gunzip(payload)? } else { payload.to_vec() };
    let value = serde_json::from_slice(&json_bytes)?;
    Ok(value)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::internal(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::internal(format!("gzip compression failed: {e}")))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::storage(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

/// Fast non-cryptographic 32-bit checksum (FNV-1a) used purely as a storage
/// integrity check against corruption — not a security primitive (spec
/// §4.4).
pub fn checksum32(bytes: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_message_is_not_compressed() {
        let config = ChunkingConfig::default();
        let message = json!({"hello": "world"});
        let prepared = prepare_payload(&message, &config).unwrap();
        assert!(!prepared.compressed);
    }

    #[test]
    fn large_compressible_message_is_compressed() {
        let config = ChunkingConfig::default();
        let message = json!({"data": "a".repeat(10_000)});
        let prepared = prepare_payload(&message, &config).unwrap();
        assert!(prepared.compressed);
        assert!(prepared.bytes.len() < prepared.original_size);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let config = ChunkingConfig {
            max_message_size: 10,
            ..ChunkingConfig::default()
        };
        let message = json!({"data": "way more than ten bytes of json"});
        let err = prepare_payload(&message, &config).unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[test]
    fn message_exactly_at_limit_succeeds_one_byte_over_fails() {
        let payload = serde_json::to_vec(&json!("x")).unwrap();
        let exact = ChunkingConfig {
            max_message_size: payload.len(),
            enable_compression: false,
            ..ChunkingConfig::default()
        };
        assert!(prepare_payload(&json!("x"), &exact).is_ok());

        let one_under = ChunkingConfig {
            max_message_size: payload.len() - 1,
            enable_compression: false,
            ..ChunkingConfig::default()
        };
        assert!(prepare_payload(&json!("x"), &one_under).is_err());
    }

    #[test]
    fn chunk_round_trip_preserves_bytes() {
        let config = ChunkingConfig::default();
        let payload = vec![7u8; 500_000];
        let chunks = split_into_chunks(&payload, &config);
        assert!(chunks.len() >= 8);
        let mut reassembled = Vec::new();
        for chunk in &chunks {
            reassembled.extend(decode_chunk(chunk).unwrap());
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn tampered_chunk_fails_checksum() {
        let config = ChunkingConfig::default();
        let payload = vec![1u8; 100];
        let mut chunks = split_into_chunks(&payload, &config);
        chunks[0].data_b64 = base64::engine::general_purpose::STANDARD.encode([9, 9, 9]);
        assert!(decode_chunk(&chunks[0]).is_err());
    }

    #[test]
    fn full_round_trip_through_reassemble() {
        let config = ChunkingConfig::default();
        let message = json!({"big": "y".repeat(200_000), "n": 42});
        let prepared = prepare_payload(&message, &config).unwrap();
        let chunks = split_into_chunks(&prepared.bytes, &config);
        let mut payload = Vec::new();
        for chunk in &chunks {
            payload.extend(decode_chunk(chunk).unwrap());
        }
        let restored = reassemble_message(&payload, prepared.compressed).unwrap();
        assert_eq!(restored, message);
    }
}
