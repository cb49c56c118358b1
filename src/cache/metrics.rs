//! Cache Metrics Collection
//!
//! Lock-free counters for every tier and for the compute path, plus a
//! point-in-time [`CacheStats`] snapshot that renders to the Prometheus
//! text exposition format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use super::manager::CacheTier;
use crate::error::{CacheError, Result};

/// Counters of one tier
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    storage_errors: AtomicU64,
    healed: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            healed: self.healed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.promotions,
            &self.storage_errors,
            &self.healed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct StatsCollector {
    l1: TierCounters,
    l2: TierCounters,
    l3: TierCounters,

    computes: AtomicU64,
    compute_failures: AtomicU64,
    compute_timeouts: AtomicU64,
    coalesced: AtomicU64,
    compute_time_us: AtomicU64,
}

impl StatsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::L1 => &self.l1,
            CacheTier::L2 => &self.l2,
            CacheTier::L3 => &self.l3,
        }
    }

    pub fn record_hit(&self, tier: CacheTier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, tier: CacheTier, count: u64) {
        self.tier(tier).evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// A value was copied *into* `tier` from a lower tier
    pub fn record_promotion(&self, tier: CacheTier) {
        self.tier(tier).promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_errors(&self, tier: CacheTier, count: u64) {
        self.tier(tier).storage_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_healed(&self, tier: CacheTier, count: u64) {
        self.tier(tier).healed.fetch_add(count, Ordering::Relaxed);
    }

    /// A compute callback finished after `elapsed`
    pub fn record_compute(&self, elapsed: Duration, succeeded: bool) {
        self.computes.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.compute_failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.compute_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_compute_timeout(&self) {
        self.compute_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined a computation instead of starting one
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::Relaxed)
    }

    /// Snapshot the counters; gauges are supplied by the orchestrator
    pub fn snapshot(&self, gauges: StatsGauges) -> CacheStats {
        CacheStats {
            l1: self.l1.snapshot(),
            l2: self.l2.snapshot(),
            l3: self.l3.snapshot(),
            computes: self.computes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            compute_timeouts: self.compute_timeouts.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            total_compute_time: Duration::from_micros(self.compute_time_us.load(Ordering::Relaxed)),
            in_flight: gauges.in_flight,
            tag_count: gauges.tag_count,
            l1_entries: gauges.l1_entries,
            sessions: gauges.sessions,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.l1.reset();
        self.l2.reset();
        self.l3.reset();
        for counter in [
            &self.computes,
            &self.compute_failures,
            &self.compute_timeouts,
            &self.coalesced,
            &self.compute_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time values that are not counters
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsGauges {
    pub in_flight: usize,
    pub tag_count: usize,
    pub l1_entries: usize,
    pub sessions: usize,
}

/// Statistics of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub storage_errors: u64,
    pub healed: u64,
}

impl TierStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub l1: TierStats,
    pub l2: TierStats,
    pub l3: TierStats,
    pub computes: u64,
    pub compute_failures: u64,
    pub compute_timeouts: u64,
    pub coalesced: u64,
    pub total_compute_time: Duration,
    pub in_flight: usize,
    pub tag_count: usize,
    pub l1_entries: usize,
    pub sessions: usize,
}

impl CacheStats {
    pub fn tier(&self, tier: CacheTier) -> &TierStats {
        match tier {
            CacheTier::L1 => &self.l1,
            CacheTier::L2 => &self.l2,
            CacheTier::L3 => &self.l3,
        }
    }

    /// Fraction of lookups answered by any tier
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.l1.hits + self.l2.hits + self.l3.hits;
        let total = hits + self.computes + self.coalesced;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Mean wall time of one compute callback
    pub fn mean_compute_time(&self) -> Duration {
        match u32::try_from(self.computes) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_compute_time / n,
            Err(_) => Duration::ZERO,
        }
    }

    /// Render in the Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("cascache".to_string()), None).map_err(metrics_error)?;

        let per_tier: [(&str, &str, fn(&TierStats) -> u64); 6] = [
            ("tier_hits_total", "Lookups answered by the tier", |s| s.hits),
            ("tier_misses_total", "Lookups the tier could not answer", |s| s.misses),
            ("tier_evictions_total", "Entries evicted for capacity", |s| s.evictions),
            ("tier_promotions_total", "Entries copied into the tier from below", |s| s.promotions),
            ("tier_storage_errors_total", "Backend failures degraded to a miss", |s| s.storage_errors),
            ("tier_healed_total", "Corrupt records removed", |s| s.healed),
        ];
        for (name, help, read) in per_tier {
            let vec = IntCounterVec::new(Opts::new(name, help), &["tier"]).map_err(metrics_error)?;
            registry.register(Box::new(vec.clone())).map_err(metrics_error)?;
            for tier in CacheTier::ALL {
                vec.with_label_values(&[tier.label()])
                    .inc_by(read(self.tier(tier)));
            }
        }

        let counters = [
            ("computes_total", "Compute callbacks invoked", self.computes),
            ("compute_failures_total", "Compute callbacks that failed", self.compute_failures),
            ("compute_timeouts_total", "Callers that gave up waiting", self.compute_timeouts),
            ("coalesced_total", "Callers that joined an in-flight computation", self.coalesced),
            (
                "compute_time_microseconds_total",
                "Wall time spent in compute callbacks",
                u64::try_from(self.total_compute_time.as_micros()).unwrap_or(u64::MAX),
            ),
        ];
        for (name, help, value) in counters {
            let counter = prometheus::IntCounter::new(name, help).map_err(metrics_error)?;
            registry.register(Box::new(counter.clone())).map_err(metrics_error)?;
            counter.inc_by(value);
        }

        let gauges = [
            ("in_flight", "Computations currently running", self.in_flight),
            ("tags", "Distinct tags in the index", self.tag_count),
            ("l1_entries", "Entries held by the memory tier", self.l1_entries),
            ("sessions", "Attached sessions", self.sessions),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
            registry.register(Box::new(gauge.clone())).map_err(metrics_error)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> CacheError {
    CacheError::Serialization(format!("metrics encoding failed: {}", e))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_counters() {
        let stats = StatsCollector::new();
        stats.record_hit(CacheTier::L1);
        stats.record_hit(CacheTier::L1);
        stats.record_miss(CacheTier::L1);
        stats.record_hit(CacheTier::L3);
        stats.record_promotion(CacheTier::L2);
        stats.record_promotion(CacheTier::L1);
        stats.record_evictions(CacheTier::L1, 3);

        let snap = stats.snapshot(StatsGauges::default());
        assert_eq!(snap.l1.hits, 2);
        assert_eq!(snap.l1.misses, 1);
        assert_eq!(snap.l1.evictions, 3);
        assert_eq!(snap.l1.promotions, 1);
        assert_eq!(snap.l2.promotions, 1);
        assert_eq!(snap.l3.hits, 1);
        assert!((snap.l1.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_counters() {
        let stats = StatsCollector::new();
        stats.record_compute(Duration::from_millis(10), true);
        stats.record_compute(Duration::from_millis(30), false);
        stats.record_compute_timeout();
        stats.record_coalesced();

        let snap = stats.snapshot(StatsGauges {
            in_flight: 1,
            ..Default::default()
        });
        assert_eq!(snap.computes, 2);
        assert_eq!(snap.compute_failures, 1);
        assert_eq!(snap.compute_timeouts, 1);
        assert_eq!(snap.coalesced, 1);
        assert_eq!(snap.total_compute_time, Duration::from_millis(40));
        assert_eq!(snap.mean_compute_time(), Duration::from_millis(20));
        assert_eq!(snap.in_flight, 1);
    }

    #[test]
    fn test_reset() {
        let stats = StatsCollector::new();
        stats.record_hit(CacheTier::L2);
        stats.record_compute(Duration::from_millis(1), true);
        stats.reset();

        let snap = stats.snapshot(StatsGauges::default());
        assert_eq!(snap.l2.hits, 0);
        assert_eq!(snap.computes, 0);
    }

    #[test]
    fn test_empty_ratios() {
        let snap = CacheStats::default();
        assert_eq!(snap.l1.hit_ratio(), 0.0);
        assert_eq!(snap.overall_hit_ratio(), 0.0);
        assert_eq!(snap.mean_compute_time(), Duration::ZERO);
    }

    #[test]
    fn test_prometheus_exposition() {
        let stats = StatsCollector::new();
        stats.record_hit(CacheTier::L1);
        stats.record_healed(CacheTier::L3, 2);
        stats.record_compute(Duration::from_millis(5), true);

        let text = stats
            .snapshot(StatsGauges {
                tag_count: 4,
                ..Default::default()
            })
            .to_prometheus()
            .unwrap();

        assert!(text.contains("cascache_tier_hits_total{tier=\"l1\"} 1"));
        assert!(text.contains("cascache_tier_healed_total{tier=\"l3\"} 2"));
        assert!(text.contains("cascache_computes_total 1"));
        assert!(text.contains("cascache_tags 4"));
    }
}
