//! Cache Entry Types
//!
//! The unit stored by every tier, plus the TTL and lookup vocabulary shared
//! by the tiers and the orchestrator.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

/// Time-to-live requested for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the orchestrator's configured `default_ttl`
    #[default]
    Default,
    /// Never expire
    Never,
    /// Expire after the given duration
    For(Duration),
}

impl Ttl {
    /// Resolve against a configured default (`None` = never expire)
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self {
            Ttl::Default => default_ttl,
            Ttl::Never => None,
            Ttl::For(ttl) => Some(ttl),
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Ttl::For(ttl)
    }
}

/// Current time at the millisecond precision stored in records
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Compute an absolute expiry; overflow means "never"
pub fn expiry_from(created_at: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    created_at
        .checked_add_signed(ttl)
        .map(|at| at.trunc_subsecs(3))
}

/// A cached value with its lifecycle metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    tags: BTreeSet<String>,
    size_hint: usize,
}

impl<V> CacheEntry<V> {
    /// Create a new entry created now
    ///
    /// The size hint starts as the shallow size of `V`; callers that know
    /// the encoded length set it with [`CacheEntry::with_size_hint`].
    pub fn new<I, T>(key: impl Into<String>, value: V, ttl: Option<Duration>, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let created_at = now_millis();
        Self {
            key: key.into(),
            value,
            created_at,
            expires_at: expiry_from(created_at, ttl),
            tags: tags.into_iter().map(Into::into).collect(),
            size_hint: std::mem::size_of::<V>(),
        }
    }

    /// Rebuild an entry from stored parts (tier transfers, decoding)
    pub fn from_parts(
        key: String,
        value: V,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        tags: BTreeSet<String>,
        size_hint: usize,
    ) -> Self {
        Self {
            key,
            value,
            created_at,
            expires_at,
            tags,
            size_hint,
        }
    }

    /// Override the approximate byte size
    pub fn with_size_hint(mut self, size_hint: usize) -> Self {
        self.size_hint = size_hint;
        self
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[inline]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[inline]
    pub fn size_hint(&self) -> usize {
        self.size_hint
    }

    /// Check if the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a fixed instant
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Time left before expiry (`None` = never expires)
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let at = self.expires_at?;
        Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Check if the entry carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Outcome of a single-tier read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Live entry
    Hit(CacheEntry<V>),
    /// An entry was present but past its expiry; the tier has dropped it
    Expired {
        tags: BTreeSet<String>,
        expires_at: DateTime<Utc>,
    },
    /// Nothing stored (or the tier failed and degraded to a miss)
    Miss,
}

impl<V> Lookup<V> {
    /// Live entry, if any
    pub fn hit(self) -> Option<CacheEntry<V>> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Build the `Expired` variant from an expired entry
    pub(crate) fn expired(entry: CacheEntry<V>) -> Self {
        match entry.expires_at {
            Some(expires_at) => Lookup::Expired {
                tags: entry.tags,
                expires_at,
            },
            None => Lookup::Hit(entry),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("ns:k", 42u32, None, ["a", "b"]);
        assert_eq!(entry.key(), "ns:k");
        assert_eq!(*entry.value(), 42);
        assert!(entry.expires_at().is_none());
        assert!(entry.has_tag("a"));
        assert!(!entry.has_tag("c"));
        assert!(!entry.is_expired());
        assert!(entry.remaining_ttl().is_none());
    }

    #[test]
    fn test_entry_expiry_is_created_plus_ttl() {
        let entry = CacheEntry::new("k", (), Some(Duration::from_secs(60)), Vec::<String>::new());
        let expires = entry.expires_at().unwrap();
        assert_eq!(expires - entry.created_at(), chrono::Duration::seconds(60));
        assert!(!entry.is_expired());
        assert!(entry.is_expired_at(expires));
        assert!(entry.remaining_ttl().unwrap() <= Duration::from_secs(60));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let entry = CacheEntry::new("k", (), Some(Duration::ZERO), Vec::<String>::new());
        assert!(entry.is_expired());
    }

    #[test]
    fn test_huge_ttl_means_never() {
        let entry = CacheEntry::new("k", (), Some(Duration::MAX), Vec::<String>::new());
        assert!(entry.expires_at().is_none());
    }

    #[test]
    fn test_ttl_resolution() {
        let default = Some(Duration::from_secs(300));
        assert_eq!(Ttl::Default.resolve(default), default);
        assert_eq!(Ttl::Never.resolve(default), None);
        assert_eq!(
            Ttl::from(Duration::from_millis(5)).resolve(default),
            Some(Duration::from_millis(5))
        );
        assert_eq!(Ttl::Default.resolve(None), None);
    }

    #[test]
    fn test_lookup_expired_carries_tags() {
        let entry = CacheEntry::new("k", 1, Some(Duration::ZERO), ["t"]);
        match Lookup::expired(entry) {
            Lookup::Expired { tags, .. } => assert!(tags.contains("t")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
