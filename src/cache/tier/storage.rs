//! Persisted Tiers - session-scoped and durable string stores
//!
//! Items are written as JSON under `cache_<id>` into a [`KeyValueStore`],
//! the same string-to-string shape as browser Web Storage. Keys without the
//! prefix belong to other users of the store and are never touched.
//!
//! Values that fail to parse, or whose `id` disagrees with their key, are
//! deleted on observation so a damaged store heals itself on the next read.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::TierAdapter;
use crate::cache::config::TierKind;
use crate::cache::entry::CacheItem;
use crate::cache::PERSISTED_KEY_PREFIX;
use crate::error::{Error, Result};

/// Storage key for a cache id
pub fn persisted_key(id: &str) -> String {
    format!("{}{}", PERSISTED_KEY_PREFIX, id)
}

/// Synchronous string key/value store
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed
    fn remove_item(&self, key: &str) -> Result<bool>;

    /// Every key in the store, prefixed or not
    fn keys(&self) -> Result<Vec<String>>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Process-lifetime store with an optional byte quota
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
    /// Byte limit over key + value lengths
    quota: Option<usize>,
}

impl InMemoryStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes beyond `quota` bytes
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Bytes currently used
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();

        if let Some(limit) = self.quota {
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = used - replaced + key.len() + value.len();
            if needed > limit {
                return Err(Error::QuotaExceeded {
                    tier: "in-memory store".into(),
                    needed,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Durable store: one file per key inside a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        // Write-then-rename so readers never see a torn file
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name.strip_suffix(".json") else {
                continue;
            };
            match urlencoding::decode(encoded) {
                Ok(key) => keys.push(key.into_owned()),
                Err(e) => debug!("Skipping undecodable store file {}: {}", name, e),
            }
        }
        Ok(keys)
    }
}

// =============================================================================
// Storage Tier
// =============================================================================

/// Tier adapter over a [`KeyValueStore`]
pub struct StorageTier {
    kind: TierKind,
    store: Arc<dyn KeyValueStore>,
}

impl StorageTier {
    /// Create an adapter serving `kind`
    pub fn new(kind: TierKind, store: Arc<dyn KeyValueStore>) -> Self {
        Self { kind, store }
    }

    fn decode(id: &str, raw: &str) -> Result<CacheItem> {
        let item: CacheItem = serde_json::from_str(raw).map_err(|e| Error::CorruptEntry {
            key: id.to_string(),
            reason: e.to_string(),
        })?;
        if item.id != id {
            return Err(Error::CorruptEntry {
                key: id.to_string(),
                reason: format!("stored id '{}' does not match key", item.id),
            });
        }
        Ok(item)
    }

    /// Drop a damaged entry; failure to do so is only logged
    fn discard(&self, storage_key: &str) {
        if let Err(e) = self.store.remove_item(storage_key) {
            warn!(tier = %self.kind, "Failed to discard corrupt entry {}: {}", storage_key, e);
        }
    }
}

#[async_trait]
impl TierAdapter for StorageTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        let storage_key = persisted_key(key);
        let Some(raw) = self.store.get_item(&storage_key)? else {
            return Ok(None);
        };

        match Self::decode(key, &raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                self.discard(&storage_key);
                Err(e)
            }
        }
    }

    async fn set(&self, item: &CacheItem) -> Result<()> {
        let raw = serde_json::to_string(item)?;
        self.store.set_item(&persisted_key(&item.id), &raw)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove_item(&persisted_key(key))
    }

    async fn items(&self) -> Result<Vec<CacheItem>> {
        let mut items = Vec::new();
        for storage_key in self.store.keys()? {
            let Some(id) = storage_key.strip_prefix(PERSISTED_KEY_PREFIX) else {
                continue;
            };
            let Some(raw) = self.store.get_item(&storage_key)? else {
                continue;
            };
            match Self::decode(id, &raw) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(tier = %self.kind, "{}", e);
                    self.discard(&storage_key);
                }
            }
        }
        Ok(items)
    }

    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for storage_key in self.store.keys()? {
            if storage_key.starts_with(PERSISTED_KEY_PREFIX) && self.store.remove_item(&storage_key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn make_item(id: &str) -> CacheItem {
        CacheItem::new(id, json!({"id": id}), 100, 1_000, 12)
    }

    fn session_tier() -> (Arc<InMemoryStore>, StorageTier) {
        let store = Arc::new(InMemoryStore::new());
        let tier = StorageTier::new(TierKind::Session, store.clone());
        (store, tier)
    }

    #[test]
    fn test_persisted_key_format() {
        assert_eq!(persisted_key("user:42"), "cache_user:42");
    }

    #[tokio::test]
    async fn test_storage_roundtrip_uses_wire_format() {
        let (store, tier) = session_tier();
        let item = make_item("a");
        tier.set(&item).await.unwrap();

        let raw = store.get_item("cache_a").unwrap().unwrap();
        assert_eq!(raw, serde_json::to_string(&item).unwrap());
        assert_eq!(tier.get("a").await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_reported_and_discarded() {
        let (store, tier) = session_tier();
        store.set_item("cache_bad", "{not json").unwrap();

        assert_matches!(tier.get("bad").await, Err(Error::CorruptEntry { .. }));
        assert!(store.get_item("cache_bad").unwrap().is_none());
        assert!(tier.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatched_id_is_corrupt() {
        let (store, tier) = session_tier();
        let raw = serde_json::to_string(&make_item("other")).unwrap();
        store.set_item("cache_mine", &raw).unwrap();

        assert_matches!(tier.get("mine").await, Err(Error::CorruptEntry { .. }));
    }

    #[tokio::test]
    async fn test_foreign_keys_are_ignored() {
        let (store, tier) = session_tier();
        store.set_item("theme", "dark").unwrap();
        tier.set(&make_item("a")).await.unwrap();
        tier.set(&make_item("b")).await.unwrap();

        assert_eq!(tier.items().await.unwrap().len(), 2);
        assert_eq!(tier.clear().await.unwrap(), 2);
        assert_eq!(store.get_item("theme").unwrap().as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn test_items_skips_and_heals_corrupt_entries() {
        let (store, tier) = session_tier();
        tier.set(&make_item("good")).await.unwrap();
        store.set_item("cache_bad", "[]").unwrap();

        let items = tier.items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "good");
        assert!(store.get_item("cache_bad").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let store = Arc::new(InMemoryStore::with_quota(64));
        let tier = StorageTier::new(TierKind::Session, store.clone());

        let result = tier.set(&make_item("a")).await;
        assert_matches!(result, Err(Error::QuotaExceeded { limit: 64, .. }));
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_quota_counts_replacement() {
        let store = InMemoryStore::with_quota(10);
        store.set_item("k", "123456789").unwrap();
        // Replacing the value frees the old bytes first
        store.set_item("k", "987654321").unwrap();
        assert!(store.set_item("j", "x").is_err());
    }

    #[test]
    fn test_file_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();

        store.set_item("cache_a/b", "one").unwrap();
        store.set_item("cache_c", "two").unwrap();
        assert_eq!(store.get_item("cache_a/b").unwrap().as_deref(), Some("one"));

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cache_a/b".to_string(), "cache_c".to_string()]);

        assert!(store.remove_item("cache_c").unwrap());
        assert!(!store.remove_item("cache_c").unwrap());
        assert!(store.get_item("cache_c").unwrap().is_none());
    }
}
