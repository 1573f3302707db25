//! Cache Item Types
//!
//! [`CacheItem`] is both the in-memory entry and the persisted wire shape:
//! persisted tiers store its JSON serialization under `cache_<id>`, with
//! fields in declaration order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::compression::{CompressionAlgorithm, Encoded};
use super::config::TierKind;
use super::{CRITICAL_PRIORITY_THRESHOLD, DEFAULT_PRIORITY, ITEM_SOURCE, ITEM_VERSION};

/// Descriptive metadata carried with each item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    /// Who produced the value
    pub source: String,
    /// Entry format version
    pub version: String,
    /// Upstream entity tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Upstream content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// priority > 5
    pub is_critical: bool,
    /// Set when `data` holds a compressed payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionAlgorithm>,
}

/// A single cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    /// Cache key
    pub id: String,
    /// Possibly compressed payload
    pub data: Value,
    /// Creation time (epoch ms)
    pub timestamp: i64,
    /// Expiry time (epoch ms), never before `timestamp`
    pub expires_at: i64,
    /// Number of hits while live
    pub access_count: u64,
    /// Last hit (epoch ms)
    pub last_accessed: i64,
    /// Estimated uncompressed byte length
    pub size: u64,
    pub priority: i32,
    pub tags: Vec<String>,
    pub metadata: ItemMetadata,
}

impl CacheItem {
    /// Build a fresh item created at `now`
    pub fn new(id: impl Into<String>, data: Value, now: i64, ttl_ms: u64, size: u64) -> Self {
        let ttl = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
        Self {
            id: id.into(),
            data,
            timestamp: now,
            expires_at: now.saturating_add(ttl),
            access_count: 0,
            last_accessed: now,
            size,
            priority: DEFAULT_PRIORITY,
            tags: Vec::new(),
            metadata: ItemMetadata {
                source: ITEM_SOURCE.to_string(),
                version: ITEM_VERSION.to_string(),
                etag: None,
                content_type: None,
                is_critical: false,
                compression: None,
            },
        }
    }

    /// Build a fresh item around an encoded payload
    pub fn from_payload(id: impl Into<String>, payload: Encoded, now: i64, ttl_ms: u64, size: u64) -> Self {
        let mut item = Self::new(id, payload.data, now, ttl_ms, size);
        item.metadata.compression = payload.compression;
        item
    }

    /// Stored payload together with its compression marker
    pub fn into_payload(self) -> Encoded {
        Encoded::new(self.data, self.metadata.compression)
    }

    /// Apply caller options (priority, tags, metadata)
    pub fn with_options(mut self, options: &SetOptions) -> Self {
        self.priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        self.metadata.is_critical = self.priority > CRITICAL_PRIORITY_THRESHOLD;
        if let Some(tags) = &options.tags {
            self.tags = tags.clone();
        }
        if let Some(source) = &options.source {
            self.metadata.source = source.clone();
        }
        self.metadata.etag = options.etag.clone();
        self.metadata.content_type = options.content_type.clone();
        self
    }

    /// Expired items must be treated as absent
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime in milliseconds (negative once expired)
    #[inline]
    pub fn remaining_ms(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    /// Record a hit
    pub fn record_access(&mut self, now: i64) -> u64 {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now;
        self.access_count
    }

    /// True if any of `tags` is attached to this item
    pub fn has_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter()
            .any(|t| self.tags.iter().any(|own| own == t.as_ref()))
    }
}

/// Per-call options for `set`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOptions {
    /// TTL in milliseconds; defaults to `defaultTTL`
    pub ttl: Option<u64>,
    /// Defaults to 1
    pub priority: Option<i32>,
    pub tags: Option<Vec<String>>,
    /// Write only this tier instead of replicating
    pub tier: Option<TierKind>,
    pub source: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl SetOptions {
    /// Options with an explicit TTL
    pub fn ttl(ttl_ms: u64) -> Self {
        Self {
            ttl: Some(ttl_ms),
            ..Default::default()
        }
    }

    /// Options with tags
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tier(mut self, tier: TierKind) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Best-effort byte length of a value's JSON serialization
///
/// Falls back to twice the character length of its display form when
/// serialization is unavailable.
pub fn estimate_size(value: &Value) -> u64 {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len() as u64,
        Err(_) => (value.to_string().chars().count() as u64).saturating_mul(2),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_item() -> CacheItem {
        CacheItem::new("greeting", json!("hello"), 1_000, 500, 7)
    }

    #[test]
    fn test_new_item_fields() {
        let item = make_item();
        assert_eq!(item.id, "greeting");
        assert_eq!(item.timestamp, 1_000);
        assert_eq!(item.expires_at, 1_500);
        assert_eq!(item.last_accessed, 1_000);
        assert_eq!(item.access_count, 0);
        assert_eq!(item.priority, 1);
        assert!(!item.metadata.is_critical);
        assert!(item.expires_at >= item.timestamp);
    }

    #[test]
    fn test_expiry_boundary() {
        let item = make_item();
        assert!(!item.is_expired(1_499));
        // expiresAt <= now counts as expired
        assert!(item.is_expired(1_500));
        assert_eq!(item.remaining_ms(1_400), 100);
    }

    #[test]
    fn test_record_access() {
        let mut item = make_item();
        assert_eq!(item.record_access(1_100), 1);
        assert_eq!(item.record_access(1_200), 2);
        assert_eq!(item.last_accessed, 1_200);
    }

    #[test]
    fn test_options_mark_critical() {
        let options = SetOptions::tagged(["session", "chat"]).with_priority(6);
        let item = make_item().with_options(&options);
        assert_eq!(item.priority, 6);
        assert!(item.metadata.is_critical);
        assert!(item.has_any_tag(&["chat"]));
        assert!(!item.has_any_tag(&["profile"]));

        let item = make_item().with_options(&SetOptions::default().with_priority(5));
        assert!(!item.metadata.is_critical);
    }

    #[test]
    fn test_wire_shape_field_order() {
        let mut item = make_item();
        item.tags = vec!["x".into()];
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(
            json,
            r#"{"id":"greeting","data":"hello","timestamp":1000,"expiresAt":1500,"accessCount":0,"lastAccessed":1000,"size":7,"priority":1,"tags":["x"],"metadata":{"source":"cache","version":"1.0","isCritical":false}}"#
        );
    }

    #[test]
    fn test_wire_shape_with_optional_metadata() {
        let options = SetOptions {
            etag: Some("W/\"abc\"".into()),
            content_type: Some("application/json".into()),
            ..Default::default()
        };
        let item = make_item().with_options(&options);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["metadata"]["etag"], "W/\"abc\"");
        assert_eq!(value["metadata"]["contentType"], "application/json");

        let parsed: CacheItem = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_compressed_payload_is_marked_in_metadata() {
        let payload = Encoded::new(json!("AAAA"), Some(CompressionAlgorithm::Lz4));
        let item = CacheItem::from_payload("k", payload.clone(), 0, 10, 900);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["data"], "AAAA");
        assert_eq!(value["metadata"]["compression"], "lz4");

        let parsed: CacheItem = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.into_payload(), payload);
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(&json!("hello")), 7);
        assert_eq!(estimate_size(&json!({"a": 1})), 7);
        assert_eq!(estimate_size(&json!(null)), 4);
    }
}
