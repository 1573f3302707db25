//! Cache Eviction Policy
//!
//! Selects which items leave the fastest tier under capacity pressure, and
//! which least-used items the optimizer trims above its watermark.

use std::cmp::Ordering;

use super::entry::CacheItem;

/// Eviction policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    /// Name of the policy
    pub name: String,
    /// Fraction of resident items removed per eviction batch
    pub batch_ratio: f64,
    /// Smallest batch ever evicted
    pub min_batch: usize,
    /// Occupancy (fraction of `maxItems`) above which the optimizer trims
    pub high_watermark: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::lru()
    }
}

impl EvictionPolicy {
    /// LRU batch eviction: oldest `lastAccessed` first, 10% per batch
    pub fn lru() -> Self {
        Self {
            name: "LRU".to_string(),
            batch_ratio: 0.10,
            min_batch: 1,
            high_watermark: 0.80,
        }
    }

    /// Items to evict from a tier holding `resident` items
    ///
    /// `max(min_batch, ceil(batch_ratio * resident))`, capped at `resident`.
    pub fn batch_size(&self, resident: usize) -> usize {
        if resident == 0 {
            return 0;
        }
        // Epsilon keeps float noise (0.1 * 70 = 7.000000000000001) from rounding up
        let scaled = (self.batch_ratio * resident as f64 - 1e-9).ceil() as usize;
        scaled.max(self.min_batch).min(resident)
    }

    /// Keys of the least recently used batch
    ///
    /// Ties on `lastAccessed` evict the less accessed item first, then fall
    /// back to creation time and key, so the choice does not depend on tier
    /// iteration order.
    pub fn select_lru(&self, items: &[CacheItem]) -> Vec<String> {
        let mut order: Vec<&CacheItem> = items.iter().collect();
        order.sort_by(|a, b| lru_order(a, b));
        order
            .into_iter()
            .take(self.batch_size(items.len()))
            .map(|item| item.id.clone())
            .collect()
    }

    /// True once `count` is above the optimizer watermark
    pub fn over_watermark(&self, count: usize, max_items: usize) -> bool {
        count as f64 > self.high_watermark * max_items as f64
    }

    /// Least-used keys to drop so `items` falls back to the watermark
    ///
    /// Ordered by `accessCount`, then recency.
    pub fn select_least_used(&self, items: &[CacheItem], max_items: usize) -> Vec<String> {
        if !self.over_watermark(items.len(), max_items) {
            return Vec::new();
        }
        let target = (self.high_watermark * max_items as f64 + 1e-9).floor() as usize;
        let excess = items.len().saturating_sub(target);

        let mut order: Vec<&CacheItem> = items.iter().collect();
        order.sort_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| lru_order(a, b))
        });
        order
            .into_iter()
            .take(excess)
            .map(|item| item.id.clone())
            .collect()
    }
}

fn lru_order(a: &CacheItem, b: &CacheItem) -> Ordering {
    a.last_accessed
        .cmp(&b.last_accessed)
        .then_with(|| a.access_count.cmp(&b.access_count))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

// =============================================================================
// Tests
// =============================================================================
