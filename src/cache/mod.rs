//! Multi-Tier Client Cache
//!
//! Key/value cache that unifies a volatile in-process map with persisted
//! stores, with TTL expiry, LRU batch eviction, tag invalidation, tier
//! promotion and self-optimizing analytics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         CacheContext / CacheEngine                        │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  get ─▶ tiers[0] ─▶ tiers[1] ─▶ ...   (expired copies purged on sight)   │
//! │           ▲                   │                                          │
//! │           └──── promotion ────┘                                          │
//! │                                                                          │
//! │  set ─▶ compress ─▶ make room (LRU batches) ─▶ replicate to tiers        │
//! ├──────────────────┬──────────────────┬──────────────────┬─────────────────┤
//! │  memory          │  sessionStorage  │  localStorage    │ indexedDB /     │
//! │  (DashMap)       │  (InMemoryStore) │  (FileStore)     │ serviceWorker   │
//! │                  │  cache_<id> JSON │  cache_<id> JSON │ (stubs)         │
//! └──────────────────┴──────────────────┴──────────────────┴─────────────────┘
//!          │
//!   CompressionChannel (worker thread, correlated RPC)   OptimizerTask (tokio)
//! ```
//!
//! # Failure model
//!
//! Engine operations never fail. Tier errors count as a miss for that tier,
//! compression failures store the raw value, and a dead worker degrades the
//! channel to identity.

pub mod analytics;
pub mod channel;
pub mod clock;
pub mod compression;
pub mod config;
pub mod context;
pub mod engine;
pub mod entry;
pub mod metrics;
pub mod policy;
pub mod scheduler;
pub mod tier;

mod proptest;

pub use analytics::{CacheAnalysis, ItemSummary, OptimizeReport};
pub use channel::{CompressionChannel, PendingTable, RpcClient, Transport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionAlgorithm, CompressionConfig, Encoded, PayloadCodec};
pub use config::{CacheConfig, CacheConfigPatch, CacheStrategy, TierKind};
pub use context::CacheContext;
pub use engine::CacheEngine;
pub use entry::{estimate_size, CacheItem, ItemMetadata, SetOptions};
pub use metrics::{CacheMetrics, MetricsCollector};
pub use policy::EvictionPolicy;
pub use scheduler::OptimizerTask;
pub use tier::{TierAdapter, TierSet};

/// Prefix of every key written to a persisted store
pub const PERSISTED_KEY_PREFIX: &str = "cache_";

/// Default byte ceiling for the fastest tier (50MB)
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Default item ceiling for the fastest tier
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default time-to-live (5 minutes)
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default optimizer period (60 seconds)
pub const DEFAULT_OPTIMIZE_INTERVAL_MS: u64 = 60 * 1000;

/// Items closer than this to expiry are reported as expiring soon
pub const EXPIRING_SOON_WINDOW_MS: i64 = 60 * 1000;

pub const DEFAULT_PRIORITY: i32 = 1;

/// Priorities above this mark an item critical
pub const CRITICAL_PRIORITY_THRESHOLD: i32 = 5;

/// `metadata.source` of items written by the engine
pub const ITEM_SOURCE: &str = "cache";

/// `metadata.version` of items written by the engine
pub const ITEM_VERSION: &str = "1.0";

// =============================================================================
// Tests
// =============================================================================
