//! Base64 framing of stream payloads.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use super::CodecError;

/// Bytes kept free after the encoded text for a terminator.
const TERMINATOR_LEN: usize = 1;

/// Size of the buffer the encoder writes into: `ceil(n * 4 / 3) + 2`
/// plus the terminator.
#[must_use]
pub const fn encoded_capacity(len: usize) -> usize {
    len.saturating_mul(4).div_ceil(3) + 2 + TERMINATOR_LEN
}

/// Base64-encode `data`.
///
/// # Errors
/// Returns [`CodecError::EncodeOverflow`] if the encoded text does not leave
/// room for the terminator in the pre-sized buffer.
pub fn encode_base64(data: &[u8]) -> Result<String, CodecError> {
    let capacity = encoded_capacity(data.len());
    let mut buf = vec![0u8; capacity];

    let written = BASE64
        .encode_slice(data, &mut buf)
        .map_err(|_| CodecError::EncodeOverflow { capacity })?;
    if capacity - written < TERMINATOR_LEN {
        return Err(CodecError::EncodeOverflow { capacity });
    }

    buf.truncate(written);
    Ok(buf.into_iter().map(char::from).collect())
}

/// Base64-decode `text`.
///
/// # Errors
/// Returns [`CodecError::Base64`] if `text` is not valid padded base64.
pub fn decode_base64(text: impl AsRef<[u8]>) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_tail_lengths() {
        let data: Vec<u8> = (0..=255).collect();
        for len in 0..data.len() {
            let text = encode_base64(&data[..len]).unwrap();
            assert_eq!(decode_base64(&text).unwrap(), &data[..len]);
        }
    }

    #[test]
    fn test_capacity_covers_padding() {
        for len in 0usize..64 {
            let padded = len.div_ceil(3) * 4;
            assert!(encoded_capacity(len) > padded, "len {len}");
        }
        assert_eq!(encoded_capacity(0), 3);
        assert_eq!(encoded_capacity(3), 7);
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(encode_base64(b"hello").unwrap(), "aGVsbG8=");
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_invalid_input() {
        assert!(decode_base64("aGVsbG8").is_err());
        assert!(decode_base64("@@@@").is_err());
    }
}
