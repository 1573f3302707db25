//! Cache Engine - Multi-Tier Orchestration
//!
//! Walks the configured tiers in order on reads, promotes hits into the
//! fastest tier, evicts LRU batches under capacity pressure, and replicates
//! writes. Every public operation is fail-open: tier and codec errors are
//! logged and resolve to `false`, `None`, `0` or an empty collection.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::analytics::{CacheAnalysis, OptimizeReport};
use super::channel::CompressionChannel;
use super::clock::{Clock, SystemClock};
use super::compression::CompressionConfig;
use super::config::{CacheConfig, CacheConfigPatch, CacheStrategy, TierKind};
use super::entry::{estimate_size, CacheItem, SetOptions};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsCollector};
use super::policy::EvictionPolicy;
use super::scheduler::OptimizerTask;
use super::tier::{TierAdapter, TierSet};

/// Multi-tier cache engine
pub struct CacheEngine {
    config: RwLock<CacheConfig>,
    tiers: TierSet,
    clock: Arc<dyn Clock>,
    channel: RwLock<Arc<CompressionChannel>>,
    metrics: MetricsCollector,
    policy: EvictionPolicy,
    optimizer: Mutex<Option<OptimizerTask>>,
    self_ref: Weak<CacheEngine>,
}

impl CacheEngine {
    /// Engine over in-memory tiers and the wall clock
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let tiers = TierSet::in_memory().with_session_quota(config.session_quota);
        Self::with_parts(config, tiers, Arc::new(SystemClock))
    }

    /// Engine over caller-supplied tiers and clock
    ///
    /// An invalid config is logged and replaced by the defaults. The
    /// optimizer starts when metrics are enabled and a tokio runtime is
    /// available.
    pub fn with_parts(config: CacheConfig, tiers: TierSet, clock: Arc<dyn Clock>) -> Arc<Self> {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("Invalid cache config, using defaults: {}", e);
                CacheConfig::default()
            }
        };
        if config.enable_encryption {
            warn!("enableEncryption is not supported; payloads are stored in plaintext");
        }

        let channel = Arc::new(channel_for(&config));
        let start_optimizer = config.enable_metrics;

        let engine = Arc::new_cyclic(|self_ref| Self {
            config: RwLock::new(config),
            tiers,
            clock,
            channel: RwLock::new(channel),
            metrics: MetricsCollector::new(),
            policy: EvictionPolicy::lru(),
            optimizer: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        if start_optimizer {
            engine.restart_optimizer();
        }
        info!(tiers = ?engine.config().tiers, "Cache engine created");
        engine
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Typed lookup; a value that does not fit `T` is logged and missed
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, "Cached value has unexpected shape: {}", e);
                None
            }
        }
    }

    /// Typed lookup with a fallback
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).await.unwrap_or(default)
    }

    /// Untyped lookup with access bookkeeping, promotion and metrics
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let tracker = LatencyTracker::start();
        let config = self.config();

        let Some((mut item, found_in)) = self.lookup(key, &config).await else {
            if config.enable_metrics {
                self.metrics.record_miss(tracker.elapsed());
            }
            debug!(key, "Cache miss");
            return None;
        };

        item.record_access(self.clock.now_ms());
        if let Err(e) = self.tiers.get(found_in).set(&item).await {
            warn!(key, tier = %found_in, "Failed to record access: {}", e);
        }
        if found_in != config.fastest_tier() {
            self.promote(&item, &config).await;
        }

        let value = self.channel().decompress(item.into_payload()).await;
        if config.enable_metrics {
            self.metrics.record_hit(tracker.elapsed());
        }
        debug!(key, tier = %found_in, "Cache hit");
        Some(value)
    }

    /// Live-entry probe without bookkeeping or request metrics
    pub async fn has(&self, key: &str) -> bool {
        let config = self.config();
        self.lookup(key, &config).await.is_some()
    }

    /// Hits among `keys`, looked up concurrently
    pub async fn get_many<T, K>(&self, keys: &[K]) -> HashMap<String, T>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let lookups = keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.get::<T>(key).await)
        });
        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }

    /// First live copy of `key` in tier order; expired copies seen on the
    /// way are purged
    async fn lookup(&self, key: &str, config: &CacheConfig) -> Option<(CacheItem, TierKind)> {
        let now = self.clock.now_ms();
        let fastest = config.fastest_tier();
        for &kind in &config.tiers {
            let tier = self.tiers.get(kind);
            let item = match tier.get(key).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key, tier = %kind, "Tier read failed, skipping: {}", e);
                    continue;
                }
            };
            if item.is_expired(now) {
                if self.purge_expired(tier.as_ref(), key).await && kind == fastest {
                    self.refresh_resident_stats(config).await;
                }
                continue;
            }
            return Some((item, kind));
        }
        None
    }

    async fn purge_expired(&self, tier: &dyn TierAdapter, key: &str) -> bool {
        match tier.remove(key).await {
            Ok(removed) => {
                if removed {
                    self.metrics.record_expiration();
                    debug!(key, tier = %tier.kind(), "Purged expired entry");
                }
                removed
            }
            Err(e) => {
                warn!(key, tier = %tier.kind(), "Failed to purge expired entry: {}", e);
                false
            }
        }
    }

    /// Copy a hit into the fastest tier, making room first
    async fn promote(&self, item: &CacheItem, config: &CacheConfig) {
        let fastest = config.fastest_tier();
        if !self.make_room(item, config).await {
            debug!(key = %item.id, "Not promoting, item exceeds maxSize");
            return;
        }
        match self.tiers.get(fastest).set(item).await {
            Ok(()) => {
                self.metrics.record_promotion();
                debug!(key = %item.id, tier = %fastest, "Promoted");
            }
            Err(e) => warn!(key = %item.id, tier = %fastest, "Promotion failed: {}", e),
        }
        self.refresh_resident_stats(config).await;
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key`; true if at least one tier accepted it
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) -> bool {
        match serde_json::to_value(value) {
            Ok(data) => self.set_value(key, data, &options).await,
            Err(e) => {
                warn!(key, "Value is not serializable: {}", e);
                false
            }
        }
    }

    /// Untyped [`CacheEngine::set`]
    pub async fn set_value(&self, key: &str, data: Value, options: &SetOptions) -> bool {
        let config = self.config();
        let now = self.clock.now_ms();
        let ttl = options.ttl.unwrap_or(config.default_ttl);
        let size = estimate_size(&data);

        let packed = self.channel().compress(data).await;
        let item = CacheItem::from_payload(key, packed, now, ttl, size).with_options(options);

        let targets = match options.tier {
            Some(tier) => vec![tier],
            None => config.tiers.clone(),
        };
        let fastest = config.fastest_tier();
        let fits_fastest = if targets.contains(&fastest) {
            self.make_room(&item, &config).await
        } else {
            true
        };

        let mut stored = false;
        for kind in targets {
            let tier = self.tiers.get(kind);
            if kind == fastest && !fits_fastest {
                debug!(key, size, "Item exceeds maxSize, skipping {}", kind);
                // An older copy must not shadow the new value
                if let Err(e) = tier.remove(key).await {
                    warn!(key, tier = %kind, "Failed to drop stale copy: {}", e);
                }
                continue;
            }
            match tier.set(&item).await {
                Ok(()) => stored = true,
                Err(e) => warn!(key, tier = %kind, "Tier write failed: {}", e),
            }
        }

        self.refresh_resident_stats(&config).await;
        debug!(key, size, ttl, stored, "Cache set");
        stored
    }

    /// Store every entry with shared options; returns how many were stored
    pub async fn set_many<I, K, V>(&self, entries: I, options: SetOptions) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let mut stored = 0;
        for (key, value) in entries {
            if self.set(key.as_ref(), &value, options.clone()).await {
                stored += 1;
            }
        }
        stored
    }

    /// Load and store the keys that are not already live
    ///
    /// `loader` runs concurrently for every missing key; `None` results are
    /// skipped. Returns how many values were stored.
    pub async fn preload<K, F, Fut, V>(&self, keys: &[K], loader: F, options: SetOptions) -> usize
    where
        K: AsRef<str>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Option<V>>,
        V: Serialize,
    {
        let mut missing = Vec::new();
        for key in keys {
            if !self.has(key.as_ref()).await {
                missing.push(key.as_ref().to_string());
            }
        }

        let loads = missing.into_iter().map(|key| {
            let load = loader(key.clone());
            async move { (key, load.await) }
        });

        let mut stored = 0;
        for (key, value) in join_all(loads).await {
            let Some(value) = value else {
                debug!(key, "Preload loader returned nothing");
                continue;
            };
            if self.set(&key, &value, options.clone()).await {
                stored += 1;
            }
        }
        stored
    }

    /// Evict LRU batches from the fastest tier until `item` fits
    ///
    /// Returns whether `item` may be written there. An item larger than
    /// `maxSize` gets one batch and is then refused.
    async fn make_room(&self, item: &CacheItem, config: &CacheConfig) -> bool {
        let fastest = self.tiers.get(config.fastest_tier());
        let mut resident = match fastest.items().await {
            Ok(items) => items,
            Err(e) => {
                warn!(tier = %fastest.kind(), "Cannot size fastest tier: {}", e);
                return item.size <= config.max_size;
            }
        };
        // Overwriting a key frees its old slot
        resident.retain(|existing| existing.id != item.id);

        let now = self.clock.now_ms();
        let (expired, live): (Vec<_>, Vec<_>) =
            resident.into_iter().partition(|existing| existing.is_expired(now));
        for stale in &expired {
            self.purge_expired(fastest.as_ref(), &stale.id).await;
        }
        resident = live;

        let oversized = item.size > config.max_size;
        loop {
            let used: u64 = resident.iter().map(|existing| existing.size).sum();
            if !oversized
                && used + item.size <= config.max_size
                && resident.len() < config.max_items
            {
                return true;
            }
            if resident.is_empty() {
                return !oversized;
            }

            let evicted = self.evict_batch(&resident, config).await;
            if evicted.is_empty() || oversized {
                return false;
            }
            resident.retain(|existing| !evicted.contains(&existing.id));
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove `key` from every configured tier
    pub async fn remove(&self, key: &str) -> bool {
        let config = self.config();
        let removed = self.remove_everywhere(key, &config).await;
        self.refresh_resident_stats(&config).await;
        removed
    }

    /// Remove several keys; returns how many existed
    pub async fn remove_many<K: AsRef<str>>(&self, keys: &[K]) -> usize {
        let config = self.config();
        let mut removed = 0;
        for key in keys {
            if self.remove_everywhere(key.as_ref(), &config).await {
                removed += 1;
            }
        }
        self.refresh_resident_stats(&config).await;
        removed
    }

    /// Remove every item carrying any of `tags`; returns how many keys went
    pub async fn invalidate<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let config = self.config();
        let mut matching = Vec::new();
        let mut seen = HashSet::new();
        for &kind in &config.tiers {
            let items = match self.tiers.get(kind).items().await {
                Ok(items) => items,
                Err(e) => {
                    warn!(tier = %kind, "Cannot list tier for invalidation: {}", e);
                    continue;
                }
            };
            for item in items {
                if item.has_any_tag(tags) && seen.insert(item.id.clone()) {
                    matching.push(item.id);
                }
            }
        }

        let removed = self.remove_many(&matching).await;
        info!(removed, "Invalidated tagged entries");
        removed
    }

    /// Drop `key` so the next `get` misses
    pub async fn refresh(&self, key: &str) -> bool {
        self.remove(key).await
    }

    /// Clear every configured tier; true if any tier was cleared
    pub async fn clear(&self) -> bool {
        let config = self.config();
        let mut cleared = false;
        for &kind in &config.tiers {
            match self.tiers.get(kind).clear().await {
                Ok(count) => {
                    cleared = true;
                    debug!(tier = %kind, count, "Cleared tier");
                }
                Err(e) => warn!(tier = %kind, "Failed to clear tier: {}", e),
            }
        }
        self.refresh_resident_stats(&config).await;
        cleared
    }

    async fn remove_everywhere(&self, key: &str, config: &CacheConfig) -> bool {
        let mut existed = false;
        for &kind in &config.tiers {
            match self.tiers.get(kind).remove(key).await {
                Ok(removed) => existed |= removed,
                Err(e) => warn!(key, tier = %kind, "Tier remove failed: {}", e),
            }
        }
        existed
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Evict one LRU batch from the fastest tier
    pub async fn evict_lru(&self) -> usize {
        let config = self.config();
        let resident = match self.tiers.get(config.fastest_tier()).items().await {
            Ok(items) => items,
            Err(e) => {
                warn!("Cannot list fastest tier for eviction: {}", e);
                return 0;
            }
        };
        let evicted = self.evict_batch(&resident, &config).await.len();
        self.refresh_resident_stats(&config).await;
        evicted
    }

    async fn evict_batch(&self, resident: &[CacheItem], config: &CacheConfig) -> Vec<String> {
        let victims = self.policy.select_lru(resident);
        for key in &victims {
            self.remove_everywhere(key, config).await;
        }
        self.metrics.record_evictions(victims.len() as u64);
        debug!(count = victims.len(), resident = resident.len(), "Evicted LRU batch");
        victims
    }

    // =========================================================================
    // Analytics
    // =========================================================================

    /// Rankings, expiring entries and tuning advice over live items
    pub async fn analyze(&self) -> CacheAnalysis {
        let config = self.config();
        let items = self.live_items(&config).await;
        CacheAnalysis::from_items(&items, self.metrics.snapshot(), self.clock.now_ms())
    }

    /// Sweep expired entries and trim least-used items above the watermark
    #[instrument(skip(self))]
    pub async fn optimize(&self) -> OptimizeReport {
        let config = self.config();
        let now = self.clock.now_ms();

        let mut expired = HashSet::new();
        for &kind in &config.tiers {
            let tier = self.tiers.get(kind);
            let items = match tier.items().await {
                Ok(items) => items,
                Err(e) => {
                    debug!(tier = %kind, "Skipping tier in sweep: {}", e);
                    continue;
                }
            };
            for item in items.iter().filter(|item| item.is_expired(now)) {
                if self.purge_expired(tier.as_ref(), &item.id).await {
                    expired.insert(item.id.clone());
                }
            }
        }

        let mut least_used_removed = 0;
        if let Ok(resident) = self.tiers.get(config.fastest_tier()).items().await {
            let victims = self.policy.select_least_used(&resident, config.max_items);
            for key in &victims {
                self.remove_everywhere(key, &config).await;
            }
            least_used_removed = victims.len();
        }

        self.refresh_resident_stats(&config).await;
        let report = OptimizeReport {
            expired_removed: expired.len(),
            least_used_removed,
        };
        if report.total() > 0 {
            info!(
                expired = report.expired_removed,
                least_used = report.least_used_removed,
                "Cache optimized"
            );
        }
        report
    }

    /// Live items across configured tiers, first tier wins per key
    async fn live_items(&self, config: &CacheConfig) -> Vec<CacheItem> {
        let now = self.clock.now_ms();
        let mut seen = HashSet::new();
        let mut live = Vec::new();
        for &kind in &config.tiers {
            let items = match self.tiers.get(kind).items().await {
                Ok(items) => items,
                Err(e) => {
                    debug!(tier = %kind, "Skipping tier: {}", e);
                    continue;
                }
            };
            for item in items {
                if !item.is_expired(now) && seen.insert(item.id.clone()) {
                    live.push(item);
                }
            }
        }
        live
    }

    async fn refresh_resident_stats(&self, config: &CacheConfig) {
        match self.tiers.get(config.fastest_tier()).items().await {
            Ok(items) => {
                let size = items.iter().map(|item| item.size).sum();
                self.metrics.update_resident(size, items.len() as u64);
            }
            Err(e) => debug!("Cannot size fastest tier: {}", e),
        }
    }

    // =========================================================================
    // Metrics & Configuration
    // =========================================================================

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    /// Recompute the residency gauges from the fastest tier
    pub async fn refresh_metrics(&self) {
        let config = self.config();
        self.refresh_resident_stats(&config).await;
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Prometheus text exposition of the current metrics
    pub fn render_prometheus(&self) -> crate::error::Result<String> {
        self.metrics.render_prometheus()
    }

    /// Current configuration
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.config.read().strategy
    }

    /// Apply a partial update; an invalid result is rejected and the
    /// current config kept
    pub fn update_config(&self, patch: CacheConfigPatch) -> bool {
        let current = self.config();
        let next = current.merged(&patch);
        if let Err(e) = next.validate() {
            warn!("Rejected config update: {}", e);
            return false;
        }

        if next.enable_encryption && !current.enable_encryption {
            warn!("enableEncryption is not supported; payloads are stored in plaintext");
        }
        if next.enable_compression != current.enable_compression {
            *self.channel.write() = Arc::new(channel_for(&next));
        }
        *self.config.write() = next.clone();

        if !next.enable_metrics {
            self.stop_optimizer();
        } else if !current.enable_metrics || next.optimize_interval != current.optimize_interval {
            self.restart_optimizer();
        }

        info!(?patch, "Cache config updated");
        true
    }

    /// Adapter backing `kind`
    pub fn tier(&self, kind: TierKind) -> Arc<dyn TierAdapter> {
        self.tiers.get(kind)
    }

    /// Current compression channel
    pub fn channel(&self) -> Arc<CompressionChannel> {
        self.channel.read().clone()
    }

    pub fn is_optimizer_running(&self) -> bool {
        self.optimizer
            .lock()
            .as_ref()
            .map(OptimizerTask::is_running)
            .unwrap_or(false)
    }

    /// Stop background work; the engine stays usable
    pub fn shutdown(&self) {
        self.stop_optimizer();
        info!("Cache engine shut down");
    }

    fn restart_optimizer(&self) {
        let period = self.config.read().optimize_period();
        let task = OptimizerTask::start(self.self_ref.clone(), period);
        if task.is_none() {
            debug!("No tokio runtime, periodic optimize disabled");
        }
        // Replacing the slot drops, and so cancels, the previous task
        *self.optimizer.lock() = task;
    }

    fn stop_optimizer(&self) {
        if let Some(task) = self.optimizer.lock().take() {
            task.stop();
        }
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &*self.config.read())
            .field("channel", &*self.channel.read())
            .field("policy", &self.policy)
            .finish()
    }
}

fn channel_for(config: &CacheConfig) -> CompressionChannel {
    if config.enable_compression {
        CompressionChannel::spawn(CompressionConfig::default())
    } else {
        CompressionChannel::identity()
    }
}

// =============================================================================
// Tests
// =============================================================================
