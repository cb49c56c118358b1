//! cascache - Multi-Level Cache Orchestration Engine
//!
//! An embedded cache that shields expensive operations (database
//! aggregation, model calls) from repeated recomputation. Reads cascade
//! through a memory tier, a per-session tier and a durable disk tier;
//! concurrent misses for the same key share a single computation.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ CacheOrchestrator ──▶ L1 (memory) ──▶ L2 (session) ──▶ L3 (disk) ──▶ compute
//!                  │
//!                  ├── TagIndex      (tag → keys, group invalidation)
//!                  ├── FlightTable   (one computation per key)
//!                  └── StatsCollector
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cascache::{CacheConfig, CacheOrchestrator, ComputeOptions, KeyCodec};
//! use std::time::Duration;
//!
//! # async fn run() -> cascache::Result<()> {
//! let cache: CacheOrchestrator<Vec<String>> =
//!     CacheOrchestrator::new(CacheConfig::default().with_l3("/var/cache/app")).await?;
//!
//! let key = KeyCodec::encode("recipes.search", &("pasta", 2))?;
//! let recipes = cache
//!     .get_or_compute(
//!         &key,
//!         ComputeOptions::new().ttl(Duration::from_secs(600)).tag("recipes"),
//!         || async { Ok::<_, std::io::Error>(vec!["carbonara".to_string()]) },
//!     )
//!     .await?;
//!
//! cache.invalidate_tag("recipes").await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, tag index, single-flight and the orchestrator
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheOrchestrator, CacheStats, CacheTier, ComputeOptions, InMemorySessionStore,
    KeyCodec, SessionId, SessionStore, SweepReport, Ttl,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
