//! Cache Orchestrator - Unified Three-Tier Cache
//!
//! Cascades reads through L1 (memory), L2 (session) and L3 (disk), writes
//! results through to every enabled tier, promotes lower-tier hits upward
//! and guarantees at most one concurrent computation per key.
//!
//! ```text
//!   get_or_compute(key)
//!        │
//!        ▼
//!   ┌─────────┐ hit   ┌─────────┐ hit   ┌─────────┐ hit
//!   │   L1    │──────▶│   L2    │──────▶│   L3    │──────▶ promote ▲
//!   └─────────┘ miss  └─────────┘ miss  └─────────┘ miss
//!                                            │
//!                                            ▼
//!                               single-flight compute ──▶ write-through
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::codec::KeyCodec;
use super::compression::PayloadCompressor;
use super::entry::{CacheEntry, Lookup, Ttl};
use super::flight::{Claim, FlightGuard, FlightReceiver, FlightTable};
use super::l1::{L1Config, MemoryTier};
use super::l2::{SessionId, SessionStore, SessionTier};
use super::l3::{L3Options, PersistentTier};
use super::metrics::{CacheStats, StatsCollector, StatsGauges};
use super::tags::TagIndex;
use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError, Result};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheTier {
    /// L1 - process memory (hot)
    #[serde(alias = "l1")]
    L1,
    /// L2 - user session (warm)
    #[serde(alias = "l2")]
    L2,
    /// L3 - local disk (durable)
    #[serde(alias = "l3")]
    L3,
}

impl CacheTier {
    /// Every tier, in cascade order
    pub const ALL: [CacheTier; 3] = [CacheTier::L1, CacheTier::L2, CacheTier::L3];

    /// Short lowercase name for metric labels
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (memory)"),
            CacheTier::L2 => write!(f, "L2 (session)"),
            CacheTier::L3 => write!(f, "L3 (disk)"),
        }
    }
}

/// Values the orchestrator can cache
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Per-call options for [`CacheOrchestrator::get_or_compute`] and
/// [`CacheOrchestrator::set`]
#[derive(Debug, Clone, Default)]
pub struct ComputeOptions {
    /// Entry lifetime
    pub ttl: Ttl,
    /// Group invalidation labels
    pub tags: BTreeSet<String>,
    /// How long to wait for the value (`compute_timeout_default` if unset)
    pub timeout: Option<Duration>,
    /// Session whose L2 tier takes part in the cascade
    pub session: Option<SessionId>,
}

impl ComputeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    /// Never expire
    pub fn no_expiry(mut self) -> Self {
        self.ttl = Ttl::Never;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Entries removed by one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
    /// Keys whose tag registrations were released
    pub tags_released: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.l1 + self.l2 + self.l3
    }
}

/// Whether a cascade is the caller's first lookup or the leader's
/// re-check after claiming the in-flight slot; misses count once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    Recheck,
}

struct Inner<V> {
    config: CacheConfig,
    l1: Option<MemoryTier<V>>,
    l3: Option<PersistentTier<V>>,
    sessions: DashMap<SessionId, Arc<SessionTier<V>>>,
    tags: TagIndex,
    flights: FlightTable<V>,
    stats: StatsCollector,
}

/// Multi-level cache orchestrator
///
/// Cheap to clone; every clone shares the same tiers and in-flight table.
pub struct CacheOrchestrator<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheOrchestrator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Cacheable> CacheOrchestrator<V> {
    /// Build the tiers described by `config`
    ///
    /// Opens the L3 directory and rebuilds the tag index from the records
    /// found there.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let l1 = config.tier_enabled(CacheTier::L1).then(|| {
            MemoryTier::with_config(L1Config {
                max_entries: config.l1_max_entries,
            })
        });

        let l3 = match (&config.l3_directory, config.tier_enabled(CacheTier::L3)) {
            (Some(dir), true) => Some(PersistentTier::open(
                dir,
                L3Options {
                    storage_timeout: config.storage_timeout,
                    compressor: config
                        .compress_l3
                        .then(|| PayloadCompressor::new(config.compression_min_bytes)),
                    max_payload_bytes: config.max_payload_bytes,
                },
            )?),
            _ => None,
        };

        let orchestrator = Self {
            inner: Arc::new(Inner {
                config,
                l1,
                l3,
                sessions: DashMap::new(),
                tags: TagIndex::new(),
                flights: FlightTable::new(),
                stats: StatsCollector::new(),
            }),
        };
        orchestrator.rehydrate_tags().await;

        info!(
            l1 = orchestrator.inner.l1.is_some(),
            l2 = orchestrator.inner.config.tier_enabled(CacheTier::L2),
            l3 = orchestrator.inner.l3.is_some(),
            tags = orchestrator.inner.tags.tag_count(),
            "Cache orchestrator ready"
        );
        Ok(orchestrator)
    }

    async fn rehydrate_tags(&self) {
        let Some(l3) = &self.inner.l3 else {
            return;
        };
        match l3.scan().await {
            Ok(report) => {
                for header in report.records.into_iter().filter(|h| !h.is_expired()) {
                    self.inner
                        .tags
                        .register(&header.key, header.tags, header.expires_at);
                }
            }
            Err(e) => warn!("Could not rebuild tag index from L3: {}", e),
        }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Return the cached value for `key`, computing it on a full miss
    ///
    /// Concurrent callers for the same key share one computation. The
    /// computation runs on its own task: a caller that stops waiting gets
    /// [`CacheError::ComputeTimeout`] while the value is still stored once
    /// it arrives. Failures are returned to every waiter and never cached.
    #[instrument(skip(self, options, compute))]
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        options: ComputeOptions,
        compute: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        check_key(key)?;
        let session = self.session_for(options.session.as_ref());

        if let Some(entry) = self.cascade(key, session.as_ref(), Pass::First).await {
            return Ok(entry.into_value());
        }

        let wait = options
            .timeout
            .unwrap_or(self.inner.config.compute_timeout_default);

        let rx = match self.inner.flights.claim(key) {
            Claim::Follower(rx) => {
                debug!(key, "Joining in-flight computation");
                self.inner.stats.record_coalesced();
                rx
            }
            Claim::Leader(guard) => {
                // A previous leader may have stored the value in any tier
                // while our cascade was still reading
                if let Some(entry) = self.cascade(key, session.as_ref(), Pass::Recheck).await {
                    guard.complete(Ok(entry.value().clone()));
                    return Ok(entry.into_value());
                }
                let rx = guard.subscribe();
                self.spawn_compute(guard, options, session, compute());
                rx
            }
        };

        self.await_outcome(key, rx, wait).await
    }

    /// Cascade lookup without computing
    pub async fn get(&self, key: &str, session: Option<&SessionId>) -> Option<V> {
        let session = self.session_for(session);
        self.cascade(key, session.as_ref(), Pass::First)
            .await
            .map(CacheEntry::into_value)
    }

    async fn cascade(
        &self,
        key: &str,
        session: Option<&Arc<SessionTier<V>>>,
        pass: Pass,
    ) -> Option<CacheEntry<V>> {
        let stats = &self.inner.stats;
        let record_miss = |tier| {
            if pass == Pass::First {
                stats.record_miss(tier);
            }
        };

        if let Some(l1) = &self.inner.l1 {
            match l1.lookup(key) {
                Lookup::Hit(entry) => {
                    stats.record_hit(CacheTier::L1);
                    return Some(entry);
                }
                outcome => {
                    record_miss(CacheTier::L1);
                    self.observe_expiry(key, &outcome);
                }
            }
        }

        if let Some(l2) = session {
            match l2.lookup(key).await {
                Lookup::Hit(entry) => {
                    debug!(key, session = %l2.session(), "L2 hit");
                    stats.record_hit(CacheTier::L2);
                    self.promote_to_l1(&entry);
                    return Some(entry);
                }
                outcome => {
                    record_miss(CacheTier::L2);
                    self.observe_expiry(key, &outcome);
                }
            }
        }

        if let Some(l3) = &self.inner.l3 {
            match l3.lookup(key).await {
                Lookup::Hit(entry) => {
                    debug!(key, "L3 hit");
                    stats.record_hit(CacheTier::L3);
                    if let Some(l2) = session {
                        match l2.set(&entry).await {
                            Ok(()) => stats.record_promotion(CacheTier::L2),
                            Err(e) => warn!(key, "L2 promotion failed: {}", e),
                        }
                    }
                    self.promote_to_l1(&entry);
                    return Some(entry);
                }
                outcome => {
                    record_miss(CacheTier::L3);
                    self.observe_expiry(key, &outcome);
                }
            }
        }

        None
    }

    /// Copy a lower-tier hit into L1 with its original expiry and tags
    fn promote_to_l1(&self, entry: &CacheEntry<V>) {
        if let Some(l1) = &self.inner.l1 {
            let evicted = l1.set(entry.key(), entry.clone());
            self.inner.stats.record_promotion(CacheTier::L1);
            if let Some(evicted) = evicted {
                self.on_l1_eviction(evicted);
            }
        }
    }

    fn observe_expiry(&self, key: &str, outcome: &Lookup<V>) {
        if let Lookup::Expired { expires_at, .. } = outcome {
            if self.inner.tags.unregister_if_generation(key, Some(*expires_at)) {
                debug!(key, "Released tags of expired entry");
            }
        }
    }

    fn on_l1_eviction(&self, evicted: CacheEntry<V>) {
        self.inner.stats.record_evictions(CacheTier::L1, 1);
        // Lower tiers may still serve the key and need its tags
        if self.inner.l3.is_none() && self.inner.sessions.is_empty() {
            self.inner
                .tags
                .unregister_if_generation(evicted.key(), evicted.expires_at());
        }
    }

    fn session_for(&self, id: Option<&SessionId>) -> Option<Arc<SessionTier<V>>> {
        let id = id?;
        if !self.inner.config.tier_enabled(CacheTier::L2) {
            return None;
        }
        let tier = self.inner.sessions.get(id).map(|s| Arc::clone(s.value()));
        if tier.is_none() {
            debug!(session = %id, "Session not attached, skipping L2");
        }
        tier
    }

    // =========================================================================
    // Compute path
    // =========================================================================

    fn spawn_compute<Fut, E>(
        &self,
        guard: FlightGuard<V>,
        options: ComputeOptions,
        session: Option<Arc<SessionTier<V>>>,
        fut: Fut,
    ) where
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let key = guard.key().to_string();
            let started = Instant::now();
            let result = fut.await;
            let elapsed = started.elapsed();

            match result {
                Ok(value) => {
                    this.inner.stats.record_compute(elapsed, true);
                    debug!(key = %key, ?elapsed, "Computed value");
                    let entry = this.make_entry(&key, value.clone(), options.ttl, options.tags);
                    this.store(entry, session.as_ref()).await;
                    guard.complete(Ok(value));
                }
                Err(e) => {
                    this.inner.stats.record_compute(elapsed, false);
                    let err = CacheError::compute(key.clone(), e);
                    warn!(key = %key, ?elapsed, "{}", err);
                    guard.complete(Err(err));
                }
            }
        });
    }

    async fn await_outcome(&self, key: &str, mut rx: FlightReceiver<V>, wait: Duration) -> Result<V> {
        match tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome
                .clone()
                .unwrap_or_else(|| Err(CacheError::compute(key, "computation produced no outcome"))),
            Ok(Err(_)) => Err(CacheError::compute(key, "computation abandoned before completing")),
            Err(_) => {
                self.inner.stats.record_compute_timeout();
                warn!(key, ?wait, "Gave up waiting for computation");
                Err(CacheError::ComputeTimeout {
                    key: key.to_string(),
                    waited: wait,
                })
            }
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Store `value` in every enabled tier
    ///
    /// Tier failures are logged and skipped.
    #[instrument(skip(self, value, options))]
    pub async fn set(&self, key: &str, value: V, options: ComputeOptions) -> Result<()> {
        check_key(key)?;
        let session = self.session_for(options.session.as_ref());
        let entry = self.make_entry(key, value, options.ttl, options.tags);
        self.store(entry, session.as_ref()).await;
        Ok(())
    }

    fn make_entry(&self, key: &str, value: V, ttl: Ttl, tags: BTreeSet<String>) -> CacheEntry<V> {
        let entry = CacheEntry::new(key, value, ttl.resolve(self.inner.config.default_ttl), tags);
        match KeyCodec::serialize(entry.value()) {
            Ok(encoded) => entry.with_size_hint(encoded.len()),
            Err(e) => {
                debug!(key, "Size hint left shallow: {}", e);
                entry
            }
        }
    }

    async fn store(&self, entry: CacheEntry<V>, session: Option<&Arc<SessionTier<V>>>) {
        let key = entry.key().to_string();

        if let Some(l1) = &self.inner.l1 {
            if let Some(evicted) = l1.set(key.as_str(), entry.clone()) {
                self.on_l1_eviction(evicted);
            }
        }

        for other in self.other_sessions(session) {
            if let Err(e) = other.delete(&key).await {
                warn!(key = %key, session = %other.session(), "Could not drop stale L2 copy: {}", e);
            }
        }
        if let Some(l2) = session {
            if let Err(e) = l2.set(&entry).await {
                warn!(key = %key, session = %l2.session(), "L2 write skipped: {}", e);
            }
        }

        if let Some(l3) = &self.inner.l3 {
            if let Err(e) = l3.set(&entry).await {
                warn!(key = %key, "L3 write skipped: {}", e);
            }
        }

        self.inner
            .tags
            .register(&key, entry.tags().iter().cloned(), entry.expires_at());
    }

    /// Attached sessions other than `current`
    fn other_sessions(&self, current: Option<&Arc<SessionTier<V>>>) -> Vec<Arc<SessionTier<V>>> {
        self.inner
            .sessions
            .iter()
            .filter(|s| current.map_or(true, |c| c.session() != s.key()))
            .map(|s| Arc::clone(s.value()))
            .collect()
    }

    fn all_sessions(&self) -> Vec<Arc<SessionTier<V>>> {
        self.other_sessions(None)
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove `key` from every tier and from the tag index
    ///
    /// Returns whether any tier held the key.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.remove_everywhere(key).await;
        self.inner.tags.unregister(key);
        removed
    }

    async fn remove_everywhere(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(l1) = &self.inner.l1 {
            removed |= l1.delete(key).is_some();
        }
        for l2 in self.all_sessions() {
            match l2.delete(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => warn!(key, session = %l2.session(), "L2 delete failed: {}", e),
            }
        }
        if let Some(l3) = &self.inner.l3 {
            match l3.delete(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => warn!(key, "L3 delete failed: {}", e),
            }
        }
        removed
    }

    /// Invalidate every key carrying `tag`; returns how many keys were
    /// invalidated
    #[instrument(skip(self))]
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = self.inner.tags.take_tag(tag);
        for key in &keys {
            self.remove_everywhere(key).await;
        }
        info!(tag, keys = keys.len(), "Invalidated tag");
        keys.len()
    }

    /// Drop everything in every tier
    pub async fn clear(&self) {
        if let Some(l1) = &self.inner.l1 {
            l1.clear();
        }
        for l2 in self.all_sessions() {
            if let Err(e) = l2.clear().await {
                warn!(session = %l2.session(), "L2 clear failed: {}", e);
            }
        }
        if let Some(l3) = &self.inner.l3 {
            if let Err(e) = l3.clear().await {
                warn!("L3 clear failed: {}", e);
            }
        }
        self.inner.tags.clear();
        info!("Cache cleared");
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Attach a session's store as its L2 tier
    ///
    /// Tags of records already in the store are added to the index.
    pub async fn attach_session(&self, id: SessionId, store: Arc<dyn SessionStore>) -> Result<()> {
        if !self.inner.config.tier_enabled(CacheTier::L2) {
            return Err(CacheError::Config("L2 is not enabled".into()));
        }

        let tier = Arc::new(SessionTier::new(
            id.clone(),
            store,
            self.inner.config.storage_timeout,
        ));
        match tier.scan().await {
            Ok(headers) => {
                for header in headers.into_iter().filter(|h| !h.is_expired()) {
                    self.inner
                        .tags
                        .merge(&header.key, header.tags, header.expires_at);
                }
            }
            Err(e) => warn!(session = %id, "Could not index existing session records: {}", e),
        }

        debug!(session = %id, "Session attached");
        self.inner.sessions.insert(id, tier);
        Ok(())
    }

    /// Detach a session; its L2 contents stop taking part in the cascade
    pub fn detach_session(&self, id: &SessionId) -> bool {
        match self.inner.sessions.remove(id) {
            Some((_, tier)) => {
                self.inner
                    .stats
                    .record_storage_errors(CacheTier::L2, tier.errors());
                self.inner.stats.record_healed(CacheTier::L2, tier.healed());
                debug!(session = %id, "Session detached");
                true
            }
            None => false,
        }
    }

    /// L2 tier of an attached session
    pub fn session(&self, id: &SessionId) -> Option<Arc<SessionTier<V>>> {
        self.inner.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    // =========================================================================
    // Expiry sweep
    // =========================================================================

    /// Remove expired entries from every tier
    pub async fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let tags = &self.inner.tags;

        if let Some(l1) = &self.inner.l1 {
            for entry in l1.purge_expired() {
                report.l1 += 1;
                if tags.unregister_if_generation(entry.key(), entry.expires_at()) {
                    report.tags_released += 1;
                }
            }
        }

        for l2 in self.all_sessions() {
            match l2.purge_expired().await {
                Ok(headers) => {
                    for header in headers {
                        report.l2 += 1;
                        if tags.unregister_if_generation(&header.key, header.expires_at) {
                            report.tags_released += 1;
                        }
                    }
                }
                Err(e) => warn!(session = %l2.session(), "L2 sweep failed: {}", e),
            }
        }

        if let Some(l3) = &self.inner.l3 {
            match l3.purge_expired().await {
                Ok(headers) => {
                    for header in headers {
                        report.l3 += 1;
                        if tags.unregister_if_generation(&header.key, header.expires_at) {
                            report.tags_released += 1;
                        }
                    }
                }
                Err(e) => warn!("L3 sweep failed: {}", e),
            }
        }

        if report.total() > 0 {
            debug!(?report, "Expired entries swept");
        }
        report
    }

    /// Sweep every `interval` until `shutdown` is cancelled
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!(?interval, "Starting expiry sweeper");
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        this.sweep_expired().await;
                    }
                }
            }
        })
    }

    /// Start the sweeper at the configured `sweep_interval`, if any
    pub fn spawn_configured_sweeper(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.inner
            .config
            .sweep_interval
            .map(|interval| self.spawn_sweeper(interval, shutdown))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Snapshot of all counters
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let mut stats = inner.stats.snapshot(StatsGauges {
            in_flight: inner.flights.in_flight(),
            tag_count: inner.tags.tag_count(),
            l1_entries: inner.l1.as_ref().map_or(0, |l1| l1.len()),
            sessions: inner.sessions.len(),
        });

        for l2 in inner.sessions.iter() {
            stats.l2.storage_errors += l2.errors();
            stats.l2.healed += l2.healed();
        }
        if let Some(l3) = &inner.l3 {
            stats.l3.storage_errors += l3.errors();
            stats.l3.healed += l3.healed();
        }
        stats
    }

    /// Reset all counters
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn l1(&self) -> Option<&MemoryTier<V>> {
        self.inner.l1.as_ref()
    }

    pub fn l3(&self) -> Option<&PersistentTier<V>> {
        self.inner.l3.as_ref()
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.inner.tags
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }
}

impl<V> std::fmt::Debug for CacheOrchestrator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("empty key".into()));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
