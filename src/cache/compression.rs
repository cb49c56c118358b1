//! Record Payload Compression
//!
//! LZ4 block compression for large record payloads, with automatic fallback
//! to the raw bytes whenever compression does not pay off.
//!
//! # Example
//!
//! ```
//! use cascache::cache::compression::{CompressionAlgorithm, PayloadCompressor};
//!
//! let compressor = PayloadCompressor::new(16);
//!
//! let data = b"Hello, this is test data that should compress well! well! well!";
//! let (compressed, algorithm) = compressor.compress(data);
//!
//! let decompressed = compressor.decompress(&compressed, algorithm).unwrap();
//! assert_eq!(decompressed.as_ref(), data);
//! ```

use bytes::Bytes;

use crate::error::{CacheError, Result};

/// Default minimum payload size worth compressing (1KB)
pub const DEFAULT_COMPRESSION_MIN_BYTES: usize = 1024;

/// Default ceiling for a decompressed payload (64MB)
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

/// Length of the uncompressed-size prefix written by LZ4 block mode
const LZ4_SIZE_PREFIX: usize = 4;

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// LZ4 payload compressor with a size threshold
#[derive(Debug, Clone, Copy)]
pub struct PayloadCompressor {
    min_size_bytes: usize,
    max_decompressed_bytes: usize,
}

impl PayloadCompressor {
    /// Compress payloads of at least `min_size_bytes`
    pub fn new(min_size_bytes: usize) -> Self {
        Self {
            min_size_bytes,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }

    /// Refuse to inflate payloads that claim more than `max` bytes
    pub fn with_max_decompressed_bytes(mut self, max: usize) -> Self {
        self.max_decompressed_bytes = max;
        self
    }

    /// Compress, falling back to the raw bytes when too small or not smaller
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        if data.len() < self.min_size_bytes {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        match lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), true) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), CompressionAlgorithm::Lz4)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!("LZ4 compression failed, storing uncompressed: {}", e);
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress data written by [`PayloadCompressor::compress`]
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        match algorithm {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => {
                let size = self.declared_size(data)?;
                lz4::block::decompress(&data[LZ4_SIZE_PREFIX..], Some(size))
                    .map(Bytes::from)
                    .map_err(|e| CacheError::Serialization(format!("LZ4 decompression failed: {}", e)))
            }
        }
    }

    /// Uncompressed size from the block prefix, bounded before any allocation
    fn declared_size(&self, data: &[u8]) -> Result<i32> {
        let prefix: [u8; LZ4_SIZE_PREFIX] = data
            .get(..LZ4_SIZE_PREFIX)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| CacheError::Serialization("LZ4 payload shorter than its size prefix".into()))?;
        let declared = u32::from_le_bytes(prefix) as usize;
        if declared > self.max_decompressed_bytes {
            return Err(CacheError::Serialization(format!(
                "LZ4 payload claims {} bytes, limit is {}",
                declared, self.max_decompressed_bytes
            )));
        }
        i32::try_from(declared)
            .map_err(|_| CacheError::Serialization(format!("LZ4 payload size {} out of range", declared)))
    }

    pub fn min_size_bytes(&self) -> usize {
        self.min_size_bytes
    }

    pub fn max_decompressed_bytes(&self) -> usize {
        self.max_decompressed_bytes
    }
}

impl Default for PayloadCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_MIN_BYTES)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_is_not_compressed() {
        let compressor = PayloadCompressor::default();
        let (out, algorithm) = compressor.compress(b"tiny");
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(out.as_ref(), b"tiny");
    }

    #[test]
    fn test_repetitive_payload_compresses() {
        let compressor = PayloadCompressor::new(64);
        let data = vec![b'a'; 4096];
        let (out, algorithm) = compressor.compress(&data);
        assert_eq!(algorithm, CompressionAlgorithm::Lz4);
        assert!(out.len() < data.len());

        let back = compressor.decompress(&out, algorithm).unwrap();
        assert_eq!(back.as_ref(), data.as_slice());
    }

    #[test]
    fn test_corrupt_lz4_is_serialization_error() {
        let compressor = PayloadCompressor::default();
        let result = compressor.decompress(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3], CompressionAlgorithm::Lz4);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let compressor = PayloadCompressor::new(64).with_max_decompressed_bytes(1024);
        let (out, algorithm) = compressor.compress(&vec![b'a'; 4096]);
        assert_eq!(algorithm, CompressionAlgorithm::Lz4);

        let err = compressor.decompress(&out, algorithm).unwrap_err();
        assert!(err.to_string().contains("limit is 1024"));
    }

    #[test]
    fn test_forged_size_prefix_rejected_without_allocating() {
        let compressor = PayloadCompressor::default();
        let mut forged = 0x7fff_ffffu32.to_le_bytes().to_vec();
        forged.extend_from_slice(&[0x10, b'a']);
        let result = compressor.decompress(&forged, CompressionAlgorithm::Lz4);
        assert!(matches!(result, Err(CacheError::Serialization(ref m)) if m.contains("claims")));
    }

    #[test]
    fn test_truncated_prefix_rejected() {
        let compressor = PayloadCompressor::default();
        let result = compressor.decompress(&[1, 2], CompressionAlgorithm::Lz4);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.to_string(), "none");
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }
}
