//! L3 Cache - Persistent Disk Tier
//!
//! Durable tier surviving process restarts. One record file per key inside
//! a single directory; the file name is the SHA-256 of the key so arbitrary
//! keys never reach the file system.
//!
//! # Design
//!
//! - Writes go to a temp file in the same directory, are fsynced and then
//!   atomically renamed over the target, so readers never observe a partial
//!   record and a crash mid-write leaves the previous record intact
//! - Blocking file I/O runs on the blocking pool, bounded by a timeout
//! - Corrupt records are deleted on read (self-healing)
//! - Tag deletion consults the [`TagIndex`]; the directory is only scanned
//!   at startup and by maintenance commands

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::codec::KeyCodec;
use super::compression::{PayloadCompressor, DEFAULT_MAX_DECOMPRESSED_BYTES};
use super::entry::{CacheEntry, Lookup};
use super::manager::CacheTier;
use super::record::{self, RecordHeader};
use super::tags::TagIndex;
use crate::error::{CacheError, Result};

/// Record file extension
pub const RECORD_EXTENSION: &str = "rec";

const TEMP_PREFIX: &str = ".cascache-";
const TEMP_SUFFIX: &str = ".part";

/// L3 tier options
#[derive(Debug, Clone)]
pub struct L3Options {
    /// Upper bound for every file operation
    pub storage_timeout: Duration,
    /// Compress payloads above the compressor's threshold
    pub compressor: Option<PayloadCompressor>,
    /// Largest payload a record may inflate to when read
    pub max_payload_bytes: usize,
}

impl Default for L3Options {
    fn default() -> Self {
        Self {
            storage_timeout: super::DEFAULT_STORAGE_TIMEOUT,
            compressor: Some(PayloadCompressor::default()),
            max_payload_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }
}

/// Outcome of a maintenance scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Headers of every valid record
    pub records: Vec<RecordHeader>,
    /// Corrupt records that were removed
    pub healed: usize,
    /// Total bytes of the valid records
    pub bytes: u64,
}

/// L3 cache - persistent record files
pub struct PersistentTier<V> {
    dir: Arc<PathBuf>,
    options: L3Options,
    decoder: PayloadCompressor,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    healed: AtomicU64,
    _value: PhantomData<fn() -> V>,
}

enum ReadOutcome {
    Missing,
    Found(Vec<u8>),
}

impl<V> PersistentTier<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open (creating if needed) the record directory
    pub fn open(dir: impl Into<PathBuf>, options: L3Options) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CacheError::storage(CacheTier::L3, format!("cannot create {}: {}", dir.display(), e))
        })?;

        let stale = remove_stale_temp_files(&dir);
        if stale > 0 {
            info!(dir = %dir.display(), stale, "Removed interrupted L3 writes");
        }

        let decoder = PayloadCompressor::default().with_max_decompressed_bytes(options.max_payload_bytes);
        Ok(Self {
            dir: Arc::new(dir),
            options,
            decoder,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            healed: AtomicU64::new(0),
            _value: PhantomData,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `key`
    pub fn record_path(&self, key: &str) -> PathBuf {
        record_path_in(&self.dir, key)
    }

    /// Run blocking file work on the blocking pool under the timeout
    async fn blocking<T, F>(&self, op: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        let dir = self.dir.clone();
        let task = tokio::task::spawn_blocking(move || work(&dir));
        let outcome = match tokio::time::timeout(self.options.storage_timeout, task).await {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(e))) => format!("{} failed: {}", op, e),
            Ok(Err(e)) => format!("{} task failed: {}", op, e),
            Err(_) => format!("{} timed out after {:?}", op, self.options.storage_timeout),
        };
        self.errors.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::storage(CacheTier::L3, outcome))
    }

    /// Read an entry; I/O failures degrade to a miss
    pub async fn lookup(&self, key: &str) -> Lookup<V> {
        let path = self.record_path(key);
        let read = self
            .blocking("read", move |_| match fs::read(&path) {
                Ok(bytes) => Ok(ReadOutcome::Found(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ReadOutcome::Missing),
                Err(e) => Err(e),
            })
            .await;

        let raw = match read {
            Ok(ReadOutcome::Found(raw)) => raw,
            Ok(ReadOutcome::Missing) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
            Err(e) => {
                warn!(key, "L3 lookup degraded to miss: {}", e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
        };

        let entry = match record::decode_with::<V>(&raw, &self.decoder) {
            Ok(entry) if entry.key() == key => entry,
            Ok(entry) => {
                warn!(key, stored = entry.key(), "L3 record key mismatch, removing");
                self.heal(key).await;
                return Lookup::Miss;
            }
            Err(e) => {
                warn!(key, "Corrupt L3 record, removing: {}", e);
                self.heal(key).await;
                return Lookup::Miss;
            }
        };

        if entry.is_expired() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "L3 entry expired");
            if let Err(e) = self.delete(key).await {
                warn!(key, "Failed to remove expired L3 record: {}", e);
            }
            return Lookup::expired(entry);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Hit(entry)
    }

    /// Get a live entry
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lookup(key).await.hit()
    }

    /// Atomically write the record for `entry`
    pub async fn set(&self, entry: &CacheEntry<V>) -> Result<()> {
        let encoded = record::encode(entry, self.options.compressor.as_ref())?;
        let target = self.record_path(entry.key());
        self.blocking("write", move |dir| write_atomic(dir, &target, &encoded))
            .await
    }

    /// Remove the record for `key`
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.record_path(key);
        self.blocking("delete", move |_| remove_if_present(&path)).await
    }

    /// Remove the records of every key `index` lists under `tag`
    pub async fn delete_by_tag(&self, tag: &str, index: &TagIndex) -> Result<Vec<String>> {
        let keys = index.keys_for_tag(tag);
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if self.delete(&key).await? {
                removed.push(key);
            }
        }
        Ok(removed)
    }

    /// Remove every record; returns how many were removed
    pub async fn clear(&self) -> Result<usize> {
        self.blocking("clear", |dir| {
            let mut removed = 0;
            for path in record_files(dir)? {
                if remove_if_present(&path)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }

    /// Read the header of every record, deleting corrupt ones
    pub async fn scan(&self) -> Result<ScanReport> {
        let report = self.blocking("scan", scan_dir).await?;
        if report.healed > 0 {
            self.healed.fetch_add(report.healed as u64, Ordering::Relaxed);
            warn!(dir = %self.dir.display(), healed = report.healed, "Removed corrupt L3 records during scan");
        }
        Ok(report)
    }

    /// Delete expired records; returns their headers
    pub async fn purge_expired(&self) -> Result<Vec<RecordHeader>> {
        let report = self.scan().await?;
        let now = Utc::now();
        let mut purged = Vec::new();
        for header in report.records {
            if header.is_expired_at(now) && self.delete(&header.key).await? {
                purged.push(header);
            }
        }
        Ok(purged)
    }

    async fn heal(&self, key: &str) {
        self.healed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.delete(key).await {
            warn!(key, "Failed to remove corrupt L3 record: {}", e);
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

impl<V> std::fmt::Debug for PersistentTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTier")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish()
    }
}

fn record_path_in(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", KeyCodec::storage_name(key), RECORD_EXTENSION))
}

fn write_atomic(dir: &Path, target: &Path, data: &Bytes) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn record_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn scan_dir(dir: &Path) -> io::Result<ScanReport> {
    let mut report = ScanReport::default();
    for path in record_files(dir)? {
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let valid = match record::decode_header(&raw) {
            Ok((header, _)) if record_path_in(dir, &header.key) == path => Some(header),
            _ => None,
        };
        match valid {
            Some(header) => {
                report.bytes += raw.len() as u64;
                report.records.push(header);
            }
            None => {
                remove_if_present(&path)?;
                report.healed += 1;
            }
        }
    }
    Ok(report)
}

fn remove_stale_temp_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
        })
        .filter(|e| fs::remove_file(e.path()).is_ok())
        .count()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> PersistentTier<String> {
        PersistentTier::open(dir.path(), L3Options::default()).unwrap()
    }

    fn entry(key: &str, value: &str, tags: &[&str]) -> CacheEntry<String> {
        CacheEntry::new(key, value.to_string(), None, tags.iter().copied())
    }

    #[tokio::test]
    async fn test_l3_set_get() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);

        l3.set(&entry("ns:k", "value", &["t"])).await.unwrap();
        let got = l3.get("ns:k").await.unwrap();
        assert_eq!(got.value(), "value");
        assert!(got.has_tag("t"));
        assert!(l3.record_path("ns:k").exists());
        assert_eq!(l3.hits(), 1);
    }

    #[tokio::test]
    async fn test_l3_miss() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        assert!(l3.get("absent").await.is_none());
        assert_eq!(l3.misses(), 1);
        assert_eq!(l3.errors(), 0);
    }

    #[tokio::test]
    async fn test_l3_survives_reopen() {
        let dir = TempDir::new().unwrap();
        open(&dir).set(&entry("k", "durable", &[])).await.unwrap();

        let reopened = open(&dir);
        assert_eq!(reopened.get("k").await.unwrap().value(), "durable");
    }

    #[tokio::test]
    async fn test_l3_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&entry("k", "one", &[])).await.unwrap();
        l3.set(&entry("k", "two", &[])).await.unwrap();

        assert_eq!(l3.get("k").await.unwrap().value(), "two");
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_l3_garbage_record_is_healed() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&entry("k", "value", &[])).await.unwrap();

        let path = l3.record_path("k");
        let mut bytes = fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[len - 3..].copy_from_slice(b"xyz");
        fs::write(&path, bytes).unwrap();

        assert!(l3.get("k").await.is_none());
        assert_eq!(l3.healed(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_l3_oversized_payload_is_healed() {
        let dir = TempDir::new().unwrap();
        let writer = PersistentTier::<String>::open(
            dir.path(),
            L3Options {
                compressor: Some(PayloadCompressor::new(64)),
                ..L3Options::default()
            },
        )
        .unwrap();
        writer.set(&entry("k", &"a".repeat(8192), &[])).await.unwrap();

        let reader = PersistentTier::<String>::open(
            dir.path(),
            L3Options {
                max_payload_bytes: 1024,
                ..L3Options::default()
            },
        )
        .unwrap();
        assert!(reader.get("k").await.is_none());
        assert_eq!(reader.healed(), 1);
        assert!(!reader.record_path("k").exists());
    }

    #[tokio::test]
    async fn test_l3_record_under_wrong_name_is_healed() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&entry("a", "value", &[])).await.unwrap();
        fs::rename(l3.record_path("a"), l3.record_path("b")).unwrap();

        assert!(l3.get("b").await.is_none());
        assert_eq!(l3.healed(), 1);
    }

    #[tokio::test]
    async fn test_l3_expired_record_is_removed() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&CacheEntry::new("k", "v".to_string(), Some(Duration::ZERO), ["t"]))
            .await
            .unwrap();

        assert!(matches!(l3.lookup("k").await, Lookup::Expired { .. }));
        assert!(!l3.record_path("k").exists());
    }

    #[tokio::test]
    async fn test_l3_delete_by_tag_uses_index() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        let index = TagIndex::new();

        for (key, tags) in [("a", vec!["t"]), ("b", vec!["t"]), ("c", vec![])] {
            let e = entry(key, key, &tags);
            index.register(key, e.tags().iter().cloned(), e.expires_at());
            l3.set(&e).await.unwrap();
        }

        let mut removed = l3.delete_by_tag("t", &index).await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert!(l3.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_l3_scan_and_purge() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&entry("live", "1", &["x"])).await.unwrap();
        l3.set(&CacheEntry::new("dead", "2".to_string(), Some(Duration::ZERO), ["y"]))
            .await
            .unwrap();
        fs::write(dir.path().join("deadbeef.rec"), b"junk").unwrap();

        let report = l3.scan().await.unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.healed, 1);

        let purged = l3.purge_expired().await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].key, "dead");

        assert_eq!(l3.clear().await.unwrap(), 1);
        assert!(l3.scan().await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_l3_open_removes_interrupted_writes() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join(format!("{}abc{}", TEMP_PREFIX, TEMP_SUFFIX));
        fs::write(&stale, b"half").unwrap();

        let _l3 = open(&dir);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_l3_large_values_are_compressed() {
        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        let big = "z".repeat(64 * 1024);
        l3.set(&entry("big", &big, &[])).await.unwrap();

        let on_disk = fs::metadata(l3.record_path("big")).unwrap().len();
        assert!(on_disk < big.len() as u64 / 4);
        assert_eq!(l3.get("big").await.unwrap().value().len(), big.len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_l3_unreadable_directory_degrades_to_miss() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let l3 = open(&dir);
        l3.set(&entry("k", "v", &[])).await.unwrap();

        fs::set_permissions(l3.record_path("k"), fs::Permissions::from_mode(0o000)).unwrap();
        // Root ignores permission bits
        if fs::read(l3.record_path("k")).is_ok() {
            return;
        }
        assert!(l3.get("k").await.is_none());
        assert_eq!(l3.errors(), 1);
    }
}
