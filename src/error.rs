//! Error types for the cascading cache

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheTier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Boxed error produced by a caller's compute callback
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the cache engine
///
/// A cache miss is not an error: lookups return `Option` (or
/// [`Lookup::Miss`](crate::cache::Lookup::Miss)) for that case.
///
/// Only [`CacheError::Compute`] and [`CacheError::ComputeTimeout`] are ever
/// returned from `get_or_compute`; tier-level failures are logged and the
/// cascade continues as if the tier missed.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Payload or record could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A tier backend failed or did not answer in time
    #[error("Storage I/O error in {tier}: {reason}")]
    StorageIo { tier: CacheTier, reason: String },

    /// The caller-supplied compute callback failed
    #[error("Compute failed for key {key}: {source}")]
    Compute {
        key: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The computation did not finish within the caller's bound
    #[error("Compute for key {key} did not complete within {waited:?}")]
    ComputeTimeout { key: String, waited: Duration },

    /// Key namespace or arguments could not be encoded
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap a callback error for `key`
    pub fn compute(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CacheError::Compute {
            key: key.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Build a storage error for `tier`
    pub fn storage(tier: CacheTier, reason: impl std::fmt::Display) -> Self {
        CacheError::StorageIo {
            tier,
            reason: reason.to_string(),
        }
    }

    /// True for the two failure kinds surfaced to callers
    pub fn is_compute_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Compute { .. } | CacheError::ComputeTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_error_keeps_source() {
        let err = CacheError::compute("recipes.search:s3:abc", "upstream down");
        assert!(err.to_string().contains("upstream down"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_compute_failure());
    }

    #[test]
    fn test_compute_error_is_cloneable() {
        let err = CacheError::compute("k", "boom");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_storage_error_display() {
        let err = CacheError::storage(CacheTier::L3, "disk full");
        assert_eq!(err.to_string(), "Storage I/O error in L3 (disk): disk full");
        assert!(!err.is_compute_failure());
    }

    #[test]
    fn test_timeout_is_compute_failure() {
        let err = CacheError::ComputeTimeout {
            key: "k".into(),
            waited: Duration::from_millis(5),
        };
        assert!(err.is_compute_failure());
    }
}
