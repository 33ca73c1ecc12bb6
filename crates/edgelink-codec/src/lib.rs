//! Deterministic chunk codec for bandwidth measurement
//!
//! Chunk content is reproducible from the challenge seed alone, so the
//! remote checker can recompute and verify the stream without storing it.
//! Layout per chunk:
//! `| seq (4 bytes, u32 big-endian) | payload (chunk_size bytes) | hmac (32 bytes) |`
//! where the HMAC-SHA256 covers seq + payload.

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use edgelink_proto::{HMAC_SIZE, SEQ_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Error constructing a chunk generator
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid hex in {field}: {source}")]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
}

/// On-wire size of one chunk record for a given payload size
pub fn chunk_total_size(chunk_size: usize) -> usize {
    SEQ_SIZE + chunk_size + HMAC_SIZE
}

/// Generates chunk records for one upload stream.
///
/// Generation is a pure function of (seed, stream_id, seq); two generators
/// built from the same inputs produce byte-identical chunks.
pub struct ChunkGenerator {
    seed: Vec<u8>,
    hmac_key: Vec<u8>,
    chunk_size: usize,
    stream_id: u32,
}

impl ChunkGenerator {
    /// Create a generator from the hex-encoded challenge material
    pub fn new(
        seed_hex: &str,
        hmac_key_hex: &str,
        chunk_size: usize,
        stream_id: u32,
    ) -> Result<Self, CodecError> {
        let seed = hex::decode(seed_hex).map_err(|source| CodecError::InvalidHex {
            field: "seed",
            source,
        })?;
        let hmac_key = hex::decode(hmac_key_hex).map_err(|source| CodecError::InvalidHex {
            field: "hmac_key",
            source,
        })?;

        Ok(Self {
            seed,
            hmac_key,
            chunk_size,
            stream_id,
        })
    }

    /// On-wire size of the records this generator produces
    pub fn chunk_total_size(&self) -> usize {
        chunk_total_size(self.chunk_size)
    }

    /// Generate the chunk record for one sequence number
    pub fn generate(&self, seq: u32) -> Bytes {
        let mut chunk = BytesMut::with_capacity(self.chunk_total_size());
        chunk.put_u32(seq);
        self.fill_payload(seq, &mut chunk);

        // HMAC covers seq + payload, never the trailer itself
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(&chunk);
        chunk.put_slice(&mac.finalize().into_bytes());

        chunk.freeze()
    }

    /// Expand `SHA256(seed + stream_id + seq + block_index)` blocks until
    /// `chunk_size` bytes are produced, truncating the final block.
    fn fill_payload(&self, seq: u32, out: &mut BytesMut) {
        let mut remaining = self.chunk_size;
        let mut block_index: u32 = 0;

        while remaining > 0 {
            let mut hasher = Sha256::new();
            hasher.update(&self.seed);
            hasher.update(self.stream_id.to_be_bytes());
            hasher.update(seq.to_be_bytes());
            hasher.update(block_index.to_be_bytes());
            let block = hasher.finalize();

            let take = remaining.min(block.len());
            out.put_slice(&block[..take]);
            remaining -= take;
            block_index += 1;
        }
    }
}
