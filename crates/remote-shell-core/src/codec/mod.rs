//! Wire codec: base64 framing and chunked compression.
//!
//! Stream payloads travel as base64 text. When a shell is created with
//! compression enabled, the decoded bytes are additionally a sequence of
//! compression chunks (see [`chunked`]).

pub mod chunked;
pub mod framing;

pub use chunked::{CHUNK_HEADER_LEN, ChunkHeader, MAX_CHUNK_SIZE, compress, decompress};
pub use framing::{decode_base64, encode_base64, encoded_capacity};

use thiserror::Error;

/// Wire codec error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Encoded payload does not fit in {capacity} bytes")]
    EncodeOverflow { capacity: usize },
    #[error("Chunk size {size} is outside 1..=65536")]
    ChunkSize { size: usize },
    #[error("Truncated chunk at offset {offset}")]
    TruncatedChunk { offset: usize },
    #[error("Chunk at offset {offset} overruns the output buffer")]
    BufferOverrun { offset: usize },
    #[error("Chunk at offset {offset} failed to inflate: {reason}")]
    Inflate { offset: usize, reason: String },
    #[error("Chunk at offset {offset} inflated to {actual} bytes, header declared {declared}")]
    SizeMismatch {
        offset: usize,
        declared: usize,
        actual: usize,
    },
    #[error("Out of memory reserving {0} bytes")]
    OutOfMemory(usize),
}

/// Encode raw stream bytes for the wire.
///
/// # Errors
/// Returns error if compression or base64 encoding fails.
pub fn encode_payload(data: &[u8], compressed: bool) -> Result<String, CodecError> {
    if compressed {
        // Room for the terminator the base64 pass appends.
        let chunks = compress(data, 1)?;
        encode_base64(&chunks)
    } else {
        encode_base64(data)
    }
}

/// Decode a wire payload back into raw stream bytes.
///
/// # Errors
/// Returns error if the base64 text or the compression chunks are malformed.
pub fn decode_payload(text: &str, compressed: bool) -> Result<Vec<u8>, CodecError> {
    let decoded = decode_base64(text)?;
    if compressed {
        decompress(&decoded)
    } else {
        Ok(decoded)
    }
}
