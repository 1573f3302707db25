//! Haven Cache - Multi-Tier Client Cache Engine
//!
//! The caching subsystem of the Haven support client: a key/value store that
//! unifies a volatile in-memory map with persisted stores, applies TTL
//! expiry, LRU batch eviction under capacity pressure, tag invalidation,
//! tier promotion and self-optimizing analytics, with optional background
//! compression over a message-passing channel.
//!
//! # Architecture
//!
//! ```text
//! consumer ─▶ CacheContext ─▶ CacheEngine ─┬─▶ TierAdapter × N
//!                                          ├─▶ CompressionChannel (worker)
//!                                          ├─▶ EvictionPolicy
//!                                          ├─▶ MetricsCollector
//!                                          └─▶ OptimizerTask (periodic)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use haven_cache::{CacheConfig, CacheContext, SetOptions};
//!
//! # async fn demo() {
//! let cache = CacheContext::new(CacheConfig::default());
//! cache.set("profile:42", &"Ada", SetOptions::tagged(["profile"])).await;
//! let name: Option<String> = cache.get("profile:42").await;
//! assert_eq!(name.as_deref(), Some("Ada"));
//! cache.invalidate(&["profile"]).await;
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Engine, tiers, compression channel, analytics
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheAnalysis, CacheConfig, CacheConfigPatch, CacheContext, CacheEngine, CacheItem,
    CacheMetrics, CacheStrategy, OptimizeReport, SetOptions, TierKind,
};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
