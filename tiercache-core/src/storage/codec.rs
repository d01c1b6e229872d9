//! Value codec: JSON, gzip above a size threshold
//!
//! Compressed payloads carry a leading [`COMPRESSION_FLAG`] byte. JSON text
//! never starts with that byte, so uncompressed payloads are stored as-is.

use crate::error::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::io::{Read, Write};

/// Payloads of at least this many bytes are compressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

/// Marks a gzip-compressed payload
pub const COMPRESSION_FLAG: u8 = 1;

/// Serializes a value and compresses it when it reaches `threshold` bytes
pub fn encode<T: Serialize + ?Sized>(value: &T, threshold: usize) -> Result<Vec<u8>> {
    let data = serde_json::to_vec(value)?;
    compress(data, threshold)
}

/// Decompresses if needed and deserializes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let data = decompress(bytes)?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn compress(data: Vec<u8>, threshold: usize) -> Result<Vec<u8>> {
    if data.len() < threshold {
        return Ok(data);
    }

    let mut out = Vec::with_capacity(data.len() / 4 + 1);
    out.push(COMPRESSION_FLAG);
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(&data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    match bytes.first() {
        Some(&COMPRESSION_FLAG) => {
            let mut decoder = GzDecoder::new(&bytes[1..]);
            let mut out = Vec::with_capacity(bytes.len() * 4);
            decoder.read_to_end(&mut out)?;
            Ok(Cow::Owned(out))
        }
        _ => Ok(Cow::Borrowed(bytes)),
    }
}

pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.first() == Some(&COMPRESSION_FLAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::value::{CacheEntry, CacheValue};
    use proptest::prelude::*;

    /// A JSON string literal serializing to exactly `len` bytes
    fn string_of_encoded_len(len: usize) -> String {
        "a".repeat(len - 2)
    }

    #[test]
    fn test_below_threshold_is_stored_plain() {
        let value = string_of_encoded_len(DEFAULT_COMPRESSION_THRESHOLD - 1);
        let bytes = encode(&value, DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        assert!(!is_compressed(&bytes));
        assert_eq!(bytes.len(), DEFAULT_COMPRESSION_THRESHOLD - 1);
        let back: String = decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_at_threshold_is_compressed() {
        let value = string_of_encoded_len(DEFAULT_COMPRESSION_THRESHOLD);
        let bytes = encode(&value, DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        assert!(is_compressed(&bytes));
        assert!(bytes.len() < DEFAULT_COMPRESSION_THRESHOLD);
        let back: String = decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_entry_round_trip_through_compression() {
        let entry = CacheEntry {
            value: CacheValue::Str("z".repeat(10_000)),
            expiration: 1_700_000_000,
        };
        let bytes = encode(&entry, 64).unwrap();
        assert!(is_compressed(&bytes));
        let back: CacheEntry = decode(&bytes).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_garbage_after_flag_is_an_error() {
        let bytes = [COMPRESSION_FLAG, 0xde, 0xad];
        assert!(decode::<String>(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip_any_threshold(text in ".{0,600}", threshold in 1usize..512) {
            let bytes = encode(&text, threshold).unwrap();
            let back: String = decode(&bytes).unwrap();
            prop_assert_eq!(back, text);
        }
    }
}
