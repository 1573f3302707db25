//! Cache Analytics
//!
//! Read-only reports over the live item set (`analyze`) and the outcome of
//! an `optimize` sweep.

use serde::{Deserialize, Serialize};

use super::entry::CacheItem;
use super::metrics::CacheMetrics;
use super::EXPIRING_SOON_WINDOW_MS;

/// Number of entries in each ranked list
pub const TOP_N: usize = 10;

/// Suggested when fewer than half of lookups hit
pub const LOW_HIT_RATE_RECOMMENDATION: &str =
    "Hit rate is below 50%: consider a longer defaultTTL or a larger maxSize";

/// Suggested once more than 100 items have been evicted
pub const HIGH_EVICTION_RECOMMENDATION: &str =
    "More than 100 evictions: consider increasing maxSize";

/// Suggested when over 10% of items expire within the next minute
pub const EXPIRING_SOON_RECOMMENDATION: &str =
    "Over 10% of items expire within a minute: consider retuning TTLs";

/// Compact view of one item in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: String,
    pub access_count: u64,
    pub last_accessed: i64,
    pub size: u64,
    pub expires_at: i64,
    pub priority: i32,
    pub tags: Vec<String>,
}

impl From<&CacheItem> for ItemSummary {
    fn from(item: &CacheItem) -> Self {
        Self {
            id: item.id.clone(),
            access_count: item.access_count,
            last_accessed: item.last_accessed,
            size: item.size,
            expires_at: item.expires_at,
            priority: item.priority,
            tags: item.tags.clone(),
        }
    }
}

/// Result of `analyze()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheAnalysis {
    /// Most accessed first
    pub top_items: Vec<ItemSummary>,
    /// Oldest `lastAccessed` first
    pub least_recently_used: Vec<ItemSummary>,
    /// Largest `size` first
    pub largest_items: Vec<ItemSummary>,
    /// Live items with less than a minute left
    pub expiring_soon: Vec<ItemSummary>,
    pub recommendations: Vec<String>,
    pub metrics: CacheMetrics,
}

impl CacheAnalysis {
    /// Build a report from live items
    pub fn from_items(items: &[CacheItem], metrics: CacheMetrics, now: i64) -> Self {
        let top_items = ranked(items, |a, b| {
            b.access_count.cmp(&a.access_count).then_with(|| a.id.cmp(&b.id))
        });
        let least_recently_used = ranked(items, |a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.id.cmp(&b.id))
        });
        let largest_items = ranked(items, |a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));

        let mut soon: Vec<&CacheItem> = items
            .iter()
            .filter(|item| item.remaining_ms(now) < EXPIRING_SOON_WINDOW_MS)
            .collect();
        soon.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        let expiring_soon: Vec<ItemSummary> = soon.into_iter().map(ItemSummary::from).collect();

        let recommendations = recommendations(&metrics, items.len(), expiring_soon.len());

        Self {
            top_items,
            least_recently_used,
            largest_items,
            expiring_soon,
            recommendations,
            metrics,
        }
    }
}

fn ranked<F>(items: &[CacheItem], cmp: F) -> Vec<ItemSummary>
where
    F: Fn(&CacheItem, &CacheItem) -> std::cmp::Ordering,
{
    let mut order: Vec<&CacheItem> = items.iter().collect();
    order.sort_by(|a, b| cmp(a, b));
    order.into_iter().take(TOP_N).map(ItemSummary::from).collect()
}

/// Heuristic tuning advice
///
/// The expiry ratio is taken over the `live` items that were analyzed, not
/// the fastest tier's `itemCount`.
pub fn recommendations(metrics: &CacheMetrics, live: usize, expiring_soon: usize) -> Vec<String> {
    let mut out = Vec::new();
    if metrics.hit_rate < 0.5 {
        out.push(LOW_HIT_RATE_RECOMMENDATION.to_string());
    }
    if metrics.evictions > 100 {
        out.push(HIGH_EVICTION_RECOMMENDATION.to_string());
    }
    if expiring_soon as f64 > 0.10 * live as f64 {
        out.push(EXPIRING_SOON_RECOMMENDATION.to_string());
    }
    out
}

/// Result of `optimize()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    /// Expired entries swept, counted per key
    pub expired_removed: usize,
    /// Least-used entries trimmed above the occupancy watermark
    pub least_used_removed: usize,
}

impl OptimizeReport {
    pub fn total(&self) -> usize {
        self.expired_removed + self.least_used_removed
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(hit_rate: f64, evictions: u64, item_count: u64) -> CacheMetrics {
        CacheMetrics {
            hit_rate,
            miss_rate: 1.0 - hit_rate,
            total_requests: 10,
            total_hits: 0,
            total_misses: 0,
            average_response_time: 0.0,
            cache_size: 0,
            item_count,
            evictions,
            promotions: 0,
            expirations: 0,
        }
    }

    fn item(id: &str, access_count: u64, last_accessed: i64, size: u64, ttl: u64) -> CacheItem {
        let mut item = CacheItem::new(id, json!(null), 0, ttl, size);
        item.access_count = access_count;
        item.last_accessed = last_accessed;
        item
    }

    #[test]
    fn test_low_hit_rate_recommendation() {
        let recs = recommendations(&metrics(0.3, 0, 10), 10, 0);
        assert_eq!(recs, vec![LOW_HIT_RATE_RECOMMENDATION.to_string()]);

        assert!(recommendations(&metrics(0.9, 0, 10), 10, 0).is_empty());
    }

    #[test]
    fn test_eviction_and_expiry_recommendations() {
        let recs = recommendations(&metrics(0.9, 101, 10), 10, 2);
        assert!(recs.contains(&HIGH_EVICTION_RECOMMENDATION.to_string()));
        assert!(recs.contains(&EXPIRING_SOON_RECOMMENDATION.to_string()));

        // Exactly 10% is not "over"
        let recs = recommendations(&metrics(0.9, 100, 10), 10, 1);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_expiry_ratio_uses_analyzed_items() {
        // Items held only in a durable tier: the fastest tier reports none
        let items: Vec<CacheItem> = (0..20)
            .map(|i| item(&format!("k{:02}", i), 0, 0, 1, if i == 0 { 30_000 } else { 600_000 }))
            .collect();
        let analysis = CacheAnalysis::from_items(&items, metrics(0.9, 0, 0), 0);
        assert_eq!(analysis.expiring_soon.len(), 1);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_rankings() {
        let items = vec![
            item("a", 5, 30, 10, 600_000),
            item("b", 9, 10, 300, 600_000),
            item("c", 1, 20, 50, 30_000),
        ];
        let analysis = CacheAnalysis::from_items(&items, metrics(1.0, 0, 3), 0);

        let ids = |list: &[ItemSummary]| list.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&analysis.top_items), vec!["b", "a", "c"]);
        assert_eq!(ids(&analysis.least_recently_used), vec!["b", "c", "a"]);
        assert_eq!(ids(&analysis.largest_items), vec!["b", "c", "a"]);
        assert_eq!(ids(&analysis.expiring_soon), vec!["c"]);
    }

    #[test]
    fn test_rankings_cap_at_top_n() {
        let items: Vec<CacheItem> = (0..25)
            .map(|i| item(&format!("k{:02}", i), i, i as i64, 1, 600_000))
            .collect();
        let analysis = CacheAnalysis::from_items(&items, metrics(1.0, 0, 25), 0);
        assert_eq!(analysis.top_items.len(), TOP_N);
        assert_eq!(analysis.top_items[0].id, "k24");
        assert_eq!(analysis.least_recently_used[0].id, "k00");
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let analysis = CacheAnalysis::from_items(&[], metrics(1.0, 0, 0), 0);
        let json = serde_json::to_value(&analysis).unwrap();
        assert!(json.get("topItems").is_some());
        assert!(json.get("leastRecentlyUsed").is_some());
        assert!(json.get("expiringSoon").is_some());
    }
}
