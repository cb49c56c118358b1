//! Stored Record Format
//!
//! Byte envelope used by the session (L2) and persistent (L3) tiers.
//!
//! ```text
//! ┌───────────┬─────────┬───────┬────────────┬────────────┬─────────────┬──────────┬──────────────┬──────────┬─────────┐
//! │ magic (4) │ ver u16 │ flags │ created i64│ expires i64│ key u32+..  │ tags u16 │ payload u32  │ sum u64  │ payload │
//! └───────────┴─────────┴───────┴────────────┴────────────┴─────────────┴──────────┴──────────────┴──────────┴─────────┘
//! ```
//!
//! All integers are big endian, timestamps are Unix milliseconds. Every
//! variable-length field is length-prefixed and bounds-checked on decode, and
//! the payload is covered by an FxHash checksum, so truncated or overwritten
//! records decode to a [`CacheError::Serialization`] instead of a panic or a
//! silently wrong value.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::codec::{fx_hash, KeyCodec};
use super::compression::{CompressionAlgorithm, PayloadCompressor};
use super::entry::CacheEntry;
use crate::error::{CacheError, Result};

/// Record magic
pub const RECORD_MAGIC: [u8; 4] = *b"CCR\x01";

/// Current record format version
pub const FORMAT_VERSION: u16 = 1;

const FLAG_HAS_EXPIRY: u8 = 0b0000_0001;
const FLAG_LZ4: u8 = 0b0000_0010;
const KNOWN_FLAGS: u8 = FLAG_HAS_EXPIRY | FLAG_LZ4;

/// Decoded record header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u16,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub compression: CompressionAlgorithm,
    /// Stored (possibly compressed) payload length
    pub payload_len: usize,
}

impl RecordHeader {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Encode an entry; `compressor` enables LZ4 for large payloads
pub fn encode<V: Serialize>(
    entry: &CacheEntry<V>,
    compressor: Option<&PayloadCompressor>,
) -> Result<Bytes> {
    let raw = KeyCodec::serialize(entry.value())?;
    let (payload, algorithm) = match compressor {
        Some(c) => c.compress(&raw),
        None => (raw, CompressionAlgorithm::None),
    };

    let key = entry.key().as_bytes();
    let key_len = u32::try_from(key.len())
        .map_err(|_| CacheError::Serialization("key too long for record".into()))?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| CacheError::Serialization("payload too large for record".into()))?;
    let tag_count = u16::try_from(entry.tags().len())
        .map_err(|_| CacheError::Serialization("too many tags for record".into()))?;

    let mut flags = 0u8;
    if entry.expires_at().is_some() {
        flags |= FLAG_HAS_EXPIRY;
    }
    if algorithm == CompressionAlgorithm::Lz4 {
        flags |= FLAG_LZ4;
    }

    let tags_len: usize = entry.tags().iter().map(|t| 2 + t.len()).sum();
    let mut buf = BytesMut::with_capacity(4 + 2 + 1 + 16 + 4 + key.len() + 2 + tags_len + 12 + payload.len());

    buf.put_slice(&RECORD_MAGIC);
    buf.put_u16(FORMAT_VERSION);
    buf.put_u8(flags);
    buf.put_i64(entry.created_at().timestamp_millis());
    buf.put_i64(entry.expires_at().map(|at| at.timestamp_millis()).unwrap_or(0));
    buf.put_u32(key_len);
    buf.put_slice(key);
    buf.put_u16(tag_count);
    for tag in entry.tags() {
        let len = u16::try_from(tag.len())
            .map_err(|_| CacheError::Serialization(format!("tag too long: {}", tag.len())))?;
        buf.put_u16(len);
        buf.put_slice(tag.as_bytes());
    }
    buf.put_u32(payload_len);
    buf.put_u64(fx_hash(&payload));
    buf.put_slice(&payload);

    Ok(buf.freeze())
}

/// Decode and verify the header, returning it with the stored payload
pub fn decode_header(record: &[u8]) -> Result<(RecordHeader, &[u8])> {
    let mut reader = Reader { buf: record };

    if reader.take(4, "magic")? != RECORD_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = reader.u16("version")?;
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", version)));
    }
    let flags = reader.u8("flags")?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(corrupt(format!("unknown flags {:#04x}", flags)));
    }

    let created_at = timestamp(reader.i64("created_at")?)?;
    let expires_raw = reader.i64("expires_at")?;
    let expires_at = if flags & FLAG_HAS_EXPIRY != 0 {
        Some(timestamp(expires_raw)?)
    } else {
        None
    };

    let key_len = reader.u32("key length")? as usize;
    let key = reader.string(key_len, "key")?;

    let tag_count = reader.u16("tag count")?;
    let mut tags = BTreeSet::new();
    for _ in 0..tag_count {
        let len = reader.u16("tag length")? as usize;
        tags.insert(reader.string(len, "tag")?);
    }

    let payload_len = reader.u32("payload length")? as usize;
    let checksum = reader.u64("checksum")?;
    let payload = reader.take(payload_len, "payload")?;
    if !reader.buf.is_empty() {
        return Err(corrupt("trailing bytes after payload"));
    }
    if fx_hash(payload) != checksum {
        return Err(corrupt("payload checksum mismatch"));
    }

    let compression = if flags & FLAG_LZ4 != 0 {
        CompressionAlgorithm::Lz4
    } else {
        CompressionAlgorithm::None
    };

    Ok((
        RecordHeader {
            version,
            key,
            created_at,
            expires_at,
            tags,
            compression,
            payload_len,
        },
        payload,
    ))
}

/// Decode a full record into an entry
pub fn decode<V: DeserializeOwned>(record: &[u8]) -> Result<CacheEntry<V>> {
    decode_with(record, &PayloadCompressor::default())
}

/// Decode with `decoder`'s decompression limit
pub fn decode_with<V: DeserializeOwned>(record: &[u8], decoder: &PayloadCompressor) -> Result<CacheEntry<V>> {
    let (header, payload) = decode_header(record)?;
    let raw = decoder.decompress(payload, header.compression)?;
    let value: V = KeyCodec::deserialize(&raw)?;

    Ok(CacheEntry::from_parts(
        header.key,
        value,
        header.created_at,
        header.expires_at,
        header.tags,
        raw.len(),
    ))
}

fn corrupt(reason: impl std::fmt::Display) -> CacheError {
    CacheError::Serialization(format!("corrupt record: {}", reason))
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| corrupt(format!("timestamp out of range: {}", millis)))
}

/// Bounds-checked cursor; `Buf` getters panic on underflow
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(corrupt(format!(
                "truncated {} (need {} bytes, have {})",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, n: usize, what: &str) -> Result<String> {
        let bytes = self.take(n, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt(format!("{} is not UTF-8", what)))
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::time::Duration;

    fn sample() -> CacheEntry<Vec<String>> {
        CacheEntry::new(
            "recipes.search:s4:soup",
            vec!["tomato soup".to_string(), "leek soup".to_string()],
            Some(Duration::from_secs(600)),
            ["recipes", "user:7"],
        )
    }

    #[test]
    fn test_record_preserves_metadata() {
        let entry = sample();
        let bytes = encode(&entry, None).unwrap();
        let back: CacheEntry<Vec<String>> = decode(&bytes).unwrap();

        assert_eq!(back.key(), entry.key());
        assert_eq!(back.value(), entry.value());
        assert_eq!(back.created_at(), entry.created_at());
        assert_eq!(back.expires_at(), entry.expires_at());
        assert_eq!(back.tags(), entry.tags());
    }

    #[test]
    fn test_header_without_expiry() {
        let entry = CacheEntry::new("k", 1u8, None, Vec::<String>::new());
        let bytes = encode(&entry, None).unwrap();
        let (header, payload) = decode_header(&bytes).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert!(header.expires_at.is_none());
        assert!(!header.is_expired());
        assert_eq!(payload, b"1");
    }

    #[test]
    fn test_compressed_payload() {
        let entry = CacheEntry::new("k", "a".repeat(8192), None, Vec::<String>::new());
        let compressor = PayloadCompressor::new(128);
        let bytes = encode(&entry, Some(&compressor)).unwrap();
        assert!(bytes.len() < 8192);

        let (header, _) = decode_header(&bytes).unwrap();
        assert_eq!(header.compression, CompressionAlgorithm::Lz4);

        let back: CacheEntry<String> = decode(&bytes).unwrap();
        assert_eq!(back.value().len(), 8192);
    }

    #[test]
    fn test_decode_with_enforces_payload_limit() {
        let entry = CacheEntry::new("k", "a".repeat(8192), None, Vec::<String>::new());
        let bytes = encode(&entry, Some(&PayloadCompressor::new(128))).unwrap();

        let strict = PayloadCompressor::default().with_max_decompressed_bytes(1024);
        assert_matches!(
            decode_with::<String>(&bytes, &strict),
            Err(CacheError::Serialization(_))
        );
    }

    #[test]
    fn test_payload_garbage_is_detected() {
        let bytes = encode(&sample(), None).unwrap();
        let mut damaged = bytes.to_vec();
        let len = damaged.len();
        for b in &mut damaged[len - 4..] {
            *b ^= 0x5a;
        }
        assert_matches!(
            decode::<Vec<String>>(&damaged),
            Err(CacheError::Serialization(reason)) if reason.contains("checksum")
        );
    }

    #[test]
    fn test_bad_magic_and_version() {
        let bytes = encode(&sample(), None).unwrap();

        let mut bad_magic = bytes.to_vec();
        bad_magic[0] = b'X';
        assert_matches!(decode_header(&bad_magic), Err(CacheError::Serialization(_)));

        let mut bad_version = bytes.to_vec();
        bad_version[5] = 9;
        assert_matches!(decode_header(&bad_version), Err(CacheError::Serialization(_)));
    }

    #[test]
    fn test_wrong_value_type_is_serialization_error() {
        let bytes = encode(&sample(), None).unwrap();
        assert_matches!(decode::<u64>(&bytes), Err(CacheError::Serialization(_)));
    }

    proptest! {
        #[test]
        fn prop_truncated_records_never_panic(cut in 0usize..200) {
            let bytes = encode(&sample(), None).unwrap();
            let cut = cut.min(bytes.len().saturating_sub(1));
            prop_assert!(decode_header(&bytes[..cut]).is_err());
        }

        #[test]
        fn prop_random_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode::<serde_json::Value>(&data);
        }
    }
}
