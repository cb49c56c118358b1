//! L2 Cache - Session-Scoped Tier
//!
//! Stores encoded records inside a caller-supplied per-session key-value
//! store. The orchestrator never manages the session's lifetime; when the
//! session ends the application detaches it and everything in it is gone.
//!
//! # Design
//!
//! - Pluggable [`SessionStore`] backend (cookie store, Redis hash, ...)
//! - Every backend call is bounded by a timeout; a slow or failing store
//!   degrades to a miss instead of stalling the cascade
//! - Corrupt records are deleted on read

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::entry::{CacheEntry, Lookup};
use super::manager::CacheTier;
use super::record::{self, RecordHeader};
use crate::error::{BoxError, CacheError, Result};

/// Opaque identifier of a user session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Per-session key-value store supplied by the application
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read raw bytes stored under `key`
    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, BoxError>;

    /// Store raw bytes under `key`
    async fn put(&self, key: &str, value: Bytes) -> std::result::Result<(), BoxError>;

    /// Remove `key`, returning whether it existed
    async fn remove(&self, key: &str) -> std::result::Result<bool, BoxError>;

    /// List every key currently stored
    async fn keys(&self) -> std::result::Result<Vec<String>, BoxError>;
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    storage: DashMap<String, Bytes>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, BoxError> {
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> std::result::Result<(), BoxError> {
        self.storage.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> std::result::Result<bool, BoxError> {
        Ok(self.storage.remove(key).is_some())
    }

    async fn keys(&self) -> std::result::Result<Vec<String>, BoxError> {
        Ok(self.storage.iter().map(|e| e.key().clone()).collect())
    }
}

/// Prefix for every key this tier writes into a session store
pub const SESSION_KEY_PREFIX: &str = "cascache:";

/// L2 cache - one session's view
pub struct SessionTier<V> {
    session: SessionId,
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    healed: AtomicU64,
    _value: PhantomData<fn() -> V>,
}

impl<V> SessionTier<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Wrap `store`; every call is bounded by `timeout`
    pub fn new(session: SessionId, store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self {
            session,
            store,
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            healed: AtomicU64::new(0),
            _value: PhantomData,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    fn store_key(key: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, key)
    }

    /// Run a store call under the timeout, flattening both failure kinds
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, BoxError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::storage(CacheTier::L2, format!("{} failed: {}", op, e)))
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::storage(
                    CacheTier::L2,
                    format!("{} timed out after {:?}", op, self.timeout),
                ))
            }
        }
    }

    /// Read an entry; failures degrade to a miss
    pub async fn lookup(&self, key: &str) -> Lookup<V> {
        let store_key = Self::store_key(key);
        let raw = match self.bounded("get", self.store.get(&store_key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
            Err(e) => {
                warn!(session = %self.session, key, "L2 lookup degraded to miss: {}", e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
        };

        let entry = match record::decode::<V>(&raw) {
            Ok(entry) if entry.key() == key => entry,
            Ok(entry) => {
                warn!(session = %self.session, key, stored = entry.key(), "L2 record key mismatch, removing");
                self.heal(&store_key).await;
                return Lookup::Miss;
            }
            Err(e) => {
                warn!(session = %self.session, key, "Corrupt L2 record, removing: {}", e);
                self.heal(&store_key).await;
                return Lookup::Miss;
            }
        };

        if entry.is_expired() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(session = %self.session, key, "L2 entry expired");
            let _ = self.bounded("remove", self.store.remove(&store_key)).await;
            return Lookup::expired(entry);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Hit(entry)
    }

    /// Get a live entry
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lookup(key).await.hit()
    }

    /// Store an entry
    pub async fn set(&self, entry: &CacheEntry<V>) -> Result<()> {
        let encoded = record::encode(entry, None)?;
        self.bounded("put", self.store.put(&Self::store_key(entry.key()), encoded))
            .await
    }

    /// Remove an entry
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("remove", self.store.remove(&Self::store_key(key)))
            .await
    }

    /// Remove every cache record carrying `tag`; returns removed keys
    pub async fn delete_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for (store_key, header) in self.headers().await? {
            if header.tags.contains(tag) {
                self.bounded("remove", self.store.remove(&store_key)).await?;
                removed.push(header.key);
            }
        }
        Ok(removed)
    }

    /// Remove expired records; returns the header of each
    pub async fn purge_expired(&self) -> Result<Vec<RecordHeader>> {
        let now = Utc::now();
        let mut purged = Vec::new();
        for (store_key, header) in self.headers().await? {
            if header.is_expired_at(now) {
                self.bounded("remove", self.store.remove(&store_key)).await?;
                purged.push(header);
            }
        }
        Ok(purged)
    }

    /// Remove every record this tier wrote
    pub async fn clear(&self) -> Result<usize> {
        let keys = self.cache_keys().await?;
        let count = keys.len();
        for store_key in keys {
            self.bounded("remove", self.store.remove(&store_key)).await?;
        }
        Ok(count)
    }

    async fn cache_keys(&self) -> Result<Vec<String>> {
        let keys = self.bounded("keys", self.store.keys()).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(SESSION_KEY_PREFIX))
            .collect())
    }

    /// Headers of every cache record in the session, removing corrupt ones
    pub async fn scan(&self) -> Result<Vec<RecordHeader>> {
        Ok(self
            .headers()
            .await?
            .into_iter()
            .map(|(_, header)| header)
            .collect())
    }

    async fn headers(&self) -> Result<Vec<(String, RecordHeader)>> {
        let mut out = Vec::new();
        for store_key in self.cache_keys().await? {
            let Some(raw) = self.bounded("get", self.store.get(&store_key)).await? else {
                continue;
            };
            match record::decode_header(&raw) {
                Ok((header, _)) => out.push((store_key, header)),
                Err(_) => self.heal(&store_key).await,
            }
        }
        Ok(out)
    }

    async fn heal(&self, store_key: &str) {
        self.healed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.bounded("remove", self.store.remove(store_key)).await {
            warn!(session = %self.session, "Failed to remove corrupt L2 record: {}", e);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn healed(&self) -> u64 {
        self.healed.load(Ordering::Relaxed)
    }
}

impl<V> fmt::Debug for SessionTier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTier")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
