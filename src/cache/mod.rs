//! Three-Tiered Cache System
//!
//! Cascading cache with L1 (memory), L2 (session) and L3 (disk) tiers in
//! front of expensive computations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        Cache Orchestrator                                │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 Cache (memory)    │ L2 Cache (session)  │ L3 Cache (disk)           │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────────┐    │
//! │  │ Strict LRU     │   │ │ SessionStore   │  │ │ One record file    │    │
//! │  │ (entry count)  │   │ │ per session    │  │ │ per key, atomic    │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────────┘    │
//! │         │             │         │           │           │               │
//! │         └─────────────┴─────────┴───────────┴───────────┘               │
//! │                              │                                           │
//! │              Tag Index  ·  Single-Flight  ·  Stats                       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - No process-wide state: everything lives in a [`CacheOrchestrator`]
//! - Stored values are JSON inside a checksummed record; decoding never
//!   runs code and never panics
//! - Tier failures degrade to a miss; only compute failures reach callers

mod entry;
mod flight;
mod l1;
mod l2;
mod l3;
mod manager;
mod metrics;
mod tags;
pub mod codec;
pub mod compression;
pub mod record;

use std::time::Duration;

pub use codec::KeyCodec;
pub use compression::{CompressionAlgorithm, PayloadCompressor};
pub use entry::{CacheEntry, Lookup, Ttl};
pub use flight::{Claim, FlightGuard, FlightTable};
pub use l1::{L1Config, MemoryTier};
pub use l2::{InMemorySessionStore, SessionId, SessionStore, SessionTier};
pub use l3::{L3Options, PersistentTier, ScanReport};
pub use manager::{CacheOrchestrator, CacheTier, Cacheable, ComputeOptions, SweepReport};
pub use metrics::{CacheStats, StatsCollector, StatsGauges, TierStats};
pub use record::RecordHeader;
pub use tags::TagIndex;

/// Default L1 capacity (entries)
pub const DEFAULT_L1_MAX_ENTRIES: usize = 1024;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default wait for a computation
pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for one L2/L3 backend call
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default period of the expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Tests
// =============================================================================
