//! L1 Cache - In-Process Memory Tier
//!
//! Bounded, strict-LRU store guarded by a single mutex.
//!
//! # Design
//!
//! - Capacity is a maximum entry count, not a byte budget
//! - Every operation is O(1) except tag scans and expiry sweeps
//! - No I/O ever happens while the lock is held

use std::sync::atomic::{AtomicU64, Ordering};
use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;

use super::entry::{CacheEntry, Lookup};
use super::DEFAULT_L1_MAX_ENTRIES;

/// L1 cache configuration
#[derive(Debug, Clone)]
pub struct L1Config {
    /// Maximum number of live entries
    pub max_entries: usize,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_L1_MAX_ENTRIES,
        }
    }
}

/// L1 cache - memory tier
pub struct MemoryTier<V> {
    /// LRU-ordered storage
    storage: Mutex<LruCache<String, CacheEntry<V>>>,
    /// Configured capacity
    capacity: NonZeroUsize,
    /// Approximate bytes held (sum of size hints)
    current_size: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl<V: Clone> MemoryTier<V> {
    /// Create a new L1 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(L1Config::default())
    }

    /// Create a new L1 cache; a zero capacity is treated as one entry
    pub fn with_config(config: L1Config) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage: Mutex::new(LruCache::new(capacity)),
            capacity,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Read an entry, reporting expiry separately from a plain miss
    pub fn lookup(&self, key: &str) -> Lookup<V> {
        let mut storage = self.storage.lock();

        let expired = match storage.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Hit(entry.clone());
            }
            None => false,
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            if let Some(entry) = storage.pop(key) {
                self.sub_size(&entry);
                return Lookup::expired(entry);
            }
        }
        Lookup::Miss
    }

    /// Get a live entry; a hit becomes most-recently-used
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lookup(key).hit()
    }

    /// Insert or replace an entry
    ///
    /// Returns the least-recently-used entry evicted to make room, if any.
    pub fn set(&self, key: impl Into<String>, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let key = key.into();
        let added = entry.size_hint() as u64;

        let mut storage = self.storage.lock();
        let displaced = storage.push(key.clone(), entry);
        self.current_size.fetch_add(added, Ordering::Relaxed);

        match displaced {
            Some((old_key, old)) if old_key == key => {
                // replaced in place
                self.sub_size(&old);
                None
            }
            Some((_, evicted)) => {
                self.sub_size(&evicted);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Some(evicted)
            }
            None => None,
        }
    }

    /// Remove an entry from the cache
    pub fn delete(&self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.storage.lock().pop(key);
        if let Some(entry) = &removed {
            self.sub_size(entry);
        }
        removed
    }

    /// Remove every entry carrying `tag`, returning their keys
    pub fn delete_by_tag(&self, tag: &str) -> Vec<String> {
        let mut storage = self.storage.lock();
        let keys: Vec<String> = storage
            .iter()
            .filter(|(_, entry)| entry.has_tag(tag))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(entry) = storage.pop(key) {
                self.sub_size(&entry);
            }
        }
        keys
    }

    /// Drop every expired entry, returning them
    pub fn purge_expired(&self) -> Vec<CacheEntry<V>> {
        let now = Utc::now();
        let mut storage = self.storage.lock();
        let keys: Vec<String> = storage
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut purged = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = storage.pop(&key) {
                self.sub_size(&entry);
                purged.push(entry);
            }
        }
        purged
    }

    /// Check if cache holds a live entry, without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .lock()
            .peek(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.storage.lock().clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    fn sub_size(&self, entry: &CacheEntry<V>) {
        let size = entry.size_hint() as u64;
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(size))
            });
    }

    /// Get number of entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity in entries
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Approximate bytes held
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl<V: Clone> Default for MemoryTier<V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
