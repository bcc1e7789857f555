//! Chunked compression.
//!
//! A compressed buffer is a concatenation of chunks. Each chunk is a 4 byte
//! header, two little-endian `u16` sizes (original, then compressed),
//! followed by the compressed payload. The input is cut into chunks of at
//! most [`MAX_CHUNK_SIZE`] bytes.
//!
//! Both sizes are stored as one less than their true value: producers
//! subtract one before writing, consumers add one after reading. A chunk
//! whose two sizes are equal was stored verbatim because compression did not
//! shrink it.

use miniz_oxide::{deflate::compress_to_vec, inflate::decompress_to_vec_with_limit};

use super::CodecError;

/// Largest uncompressed payload of a single chunk.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Encoded size of a chunk header.
pub const CHUNK_HEADER_LEN: usize = 4;

const COMPRESSION_LEVEL: u8 = 6;

/// Chunk header holding the *true* sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub original_size: usize,
    pub compressed_size: usize,
}

impl ChunkHeader {
    /// Whether the payload was stored without compression.
    #[must_use]
    pub const fn is_stored(self) -> bool {
        self.original_size == self.compressed_size
    }

    /// Encode the header, writing each size minus one.
    ///
    /// # Errors
    /// Returns [`CodecError::ChunkSize`] if a size is zero or above 64 KiB.
    pub fn encode(self) -> Result<[u8; CHUNK_HEADER_LEN], CodecError> {
        let original = wire_size(self.original_size)?.to_le_bytes();
        let compressed = wire_size(self.compressed_size)?.to_le_bytes();
        Ok([original[0], original[1], compressed[0], compressed[1]])
    }

    /// Decode a header, adding one to each wire size.
    #[must_use]
    pub fn decode(bytes: [u8; CHUNK_HEADER_LEN]) -> Self {
        Self {
            original_size: usize::from(u16::from_le_bytes([bytes[0], bytes[1]])) + 1,
            compressed_size: usize::from(u16::from_le_bytes([bytes[2], bytes[3]])) + 1,
        }
    }

    fn read(data: &[u8], offset: usize) -> Result<Self, CodecError> {
        let bytes = data
            .get(offset..offset + CHUNK_HEADER_LEN)
            .and_then(|b| <[u8; CHUNK_HEADER_LEN]>::try_from(b).ok())
            .ok_or(CodecError::TruncatedChunk { offset })?;
        Ok(Self::decode(bytes))
    }
}

fn wire_size(size: usize) -> Result<u16, CodecError> {
    size.checked_sub(1)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or(CodecError::ChunkSize { size })
}

fn reserve(len: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CodecError::OutOfMemory(len))?;
    Ok(buf)
}

/// Walk the chunk headers and return the total uncompressed size.
fn total_uncompressed_size(data: &[u8]) -> Result<usize, CodecError> {
    let mut offset = 0;
    let mut total = 0usize;

    while offset < data.len() {
        let header = ChunkHeader::read(data, offset)?;
        let end = offset + CHUNK_HEADER_LEN + header.compressed_size;
        if end > data.len() {
            return Err(CodecError::TruncatedChunk { offset });
        }
        total += header.original_size;
        offset = end;
    }

    Ok(total)
}

/// Decompress a sequence of chunks.
///
/// The output buffer is sized up front from the chunk headers.
///
/// # Errors
/// Returns error if a chunk is truncated, fails to inflate, or inflates to a
/// size other than the one its header declares.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let total = total_uncompressed_size(data)?;
    let mut out = reserve(total)?;
    let mut offset = 0;

    while offset < data.len() {
        let header = ChunkHeader::read(data, offset)?;
        let start = offset + CHUNK_HEADER_LEN;
        let payload = data
            .get(start..start + header.compressed_size)
            .ok_or(CodecError::TruncatedChunk { offset })?;

        if out.len() + header.original_size > total {
            return Err(CodecError::BufferOverrun { offset });
        }

        if header.is_stored() {
            out.extend_from_slice(payload);
        } else {
            let inflated = decompress_to_vec_with_limit(payload, header.original_size).map_err(
                |e| CodecError::Inflate {
                    offset,
                    reason: format!("{:?}", e.status),
                },
            )?;
            if inflated.len() != header.original_size {
                return Err(CodecError::SizeMismatch {
                    offset,
                    declared: header.original_size,
                    actual: inflated.len(),
                });
            }
            out.extend_from_slice(&inflated);
        }

        offset = start + header.compressed_size;
    }

    Ok(out)
}

/// Compress `data` into chunks.
///
/// `extra` bytes of spare capacity are reserved after the worst case
/// (every chunk stored verbatim) so callers can append without reallocating.
///
/// # Errors
/// Returns error if the output buffer cannot be allocated or a chunk would
/// overrun it.
pub fn compress(data: &[u8], extra: usize) -> Result<Vec<u8>, CodecError> {
    let chunk_count = data.len().div_ceil(MAX_CHUNK_SIZE);
    let budget = chunk_count * CHUNK_HEADER_LEN + data.len();
    let mut out = reserve(budget + extra)?;

    for chunk in data.chunks(MAX_CHUNK_SIZE) {
        let packed = compress_to_vec(chunk, COMPRESSION_LEVEL);
        // Equal sizes mean "stored" on the wire, so compression has to win
        // by at least one byte.
        let payload = if packed.len() < chunk.len() {
            packed.as_slice()
        } else {
            chunk
        };

        if out.len() + CHUNK_HEADER_LEN + payload.len() > budget {
            return Err(CodecError::BufferOverrun { offset: out.len() });
        }

        let header = ChunkHeader {
            original_size: chunk.len(),
            compressed_size: payload.len(),
        };
        tracing::trace!(
            original = header.original_size,
            compressed = header.compressed_size,
            "Compressed chunk"
        );
        out.extend_from_slice(&header.encode()?);
        out.extend_from_slice(payload);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state.to_le_bytes()[0]
            })
            .collect()
    }

    #[test]
    fn test_single_byte_chunk_header_is_zero() {
        let out = compress(b"A", 0).unwrap();
        assert_eq!(out, [0, 0, 0, 0, b'A']);

        let header = ChunkHeader::decode([0, 0, 0, 0]);
        assert_eq!(header.original_size, 1);
        assert_eq!(header.compressed_size, 1);
        assert!(header.is_stored());
    }

    #[test]
    fn test_header_encoding_limits() {
        let full = ChunkHeader {
            original_size: MAX_CHUNK_SIZE,
            compressed_size: 10,
        };
        assert_eq!(full.encode().unwrap(), [0xff, 0xff, 9, 0]);
        assert!(
            ChunkHeader {
                original_size: 0,
                compressed_size: 1
            }
            .encode()
            .is_err()
        );
        assert!(
            ChunkHeader {
                original_size: MAX_CHUNK_SIZE + 1,
                compressed_size: 1
            }
            .encode()
            .is_err()
        );
    }

    #[test]
    fn test_empty_roundtrip() {
        let out = compress(&[], 0).unwrap();
        assert!(out.is_empty());
        assert!(decompress(&out).unwrap().is_empty());
    }

    #[test]
    fn test_compressible_roundtrip() {
        let data = b"The quick brown fox jumps over the lazy dog. ".repeat(100);
        let out = compress(&data, 0).unwrap();
        assert!(out.len() < data.len());

        let header = ChunkHeader::read(&out, 0).unwrap();
        assert_eq!(header.original_size, data.len());
        assert!(!header.is_stored());
        assert_eq!(decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_multi_chunk_roundtrip() {
        let mut data = b"abcdefgh".repeat(20_000);
        data.extend(noise(70_000));
        assert!(data.len() > 3 * MAX_CHUNK_SIZE);

        let out = compress(&data, 0).unwrap();
        assert_eq!(decompress(&out).unwrap(), data);

        let mut offset = 0;
        let mut chunks = 0;
        while offset < out.len() {
            let header = ChunkHeader::read(&out, offset).unwrap();
            assert!(header.original_size <= MAX_CHUNK_SIZE);
            offset += CHUNK_HEADER_LEN + header.compressed_size;
            chunks += 1;
        }
        assert_eq!(chunks, data.len().div_ceil(MAX_CHUNK_SIZE));
    }

    #[test]
    fn test_incompressible_chunk_is_stored() {
        let data = noise(1000);
        let out = compress(&data, 0).unwrap();
        assert_eq!(out.len(), CHUNK_HEADER_LEN + data.len());
        assert!(ChunkHeader::read(&out, 0).unwrap().is_stored());
        assert_eq!(decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_extra_space_is_reserved() {
        let data = noise(100);
        let out = compress(&data, 16).unwrap();
        assert!(out.capacity() >= out.len() + 16);
    }

    #[test]
    fn test_truncated_input() {
        let out = compress(&noise(100), 0).unwrap();
        assert!(matches!(
            decompress(&out[..out.len() - 1]),
            Err(CodecError::TruncatedChunk { offset: 0 })
        ));
        assert!(matches!(
            decompress(&out[..2]),
            Err(CodecError::TruncatedChunk { offset: 0 })
        ));
    }

    #[test]
    fn test_corrupt_payload_fails() {
        // Declares 100 bytes compressed into 4 bytes of garbage.
        let data = [99, 0, 3, 0, 0xff, 0xff, 0xff, 0xff];
        assert!(decompress(&data).is_err());
    }

    #[test]
    fn test_short_inflate_is_rejected() {
        let mut out = compress(&b"xy".repeat(500), 0).unwrap();
        // Claim one byte more than the chunk really holds.
        out[0..2].copy_from_slice(&1000u16.to_le_bytes());
        assert!(matches!(
            decompress(&out),
            Err(CodecError::SizeMismatch {
                declared: 1001,
                actual: 1000,
                ..
            })
        ));
    }
}
