//! Memory Tier - volatile in-process map
//!
//! Uses DashMap for sharded concurrent access; contents die with the process.

use async_trait::async_trait;
use dashmap::DashMap;

use super::TierAdapter;
use crate::cache::config::TierKind;
use crate::cache::entry::CacheItem;
use crate::error::Result;

/// Volatile tier
#[derive(Default)]
pub struct MemoryTier {
    items: DashMap<String, CacheItem>,
}

impl MemoryTier {
    /// Create an empty tier
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident items (expired included)
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check residency without touching the item
    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }
}

#[async_trait]
impl TierAdapter for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        Ok(self.items.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, item: &CacheItem) -> Result<()> {
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.items.remove(key).is_some())
    }

    async fn items(&self) -> Result<Vec<CacheItem>> {
        Ok(self
            .items
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn clear(&self) -> Result<usize> {
        let count = self.items.len();
        self.items.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_item(id: &str) -> CacheItem {
        CacheItem::new(id, json!(id), 0, 1_000, 4)
    }

    #[tokio::test]
    async fn test_memory_set_get() {
        let tier = MemoryTier::new();
        tier.set(&make_item("a")).await.unwrap();

        let read = tier.get("a").await.unwrap().unwrap();
        assert_eq!(read.data, json!("a"));
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_remove_is_idempotent() {
        let tier = MemoryTier::new();
        tier.set(&make_item("a")).await.unwrap();

        assert!(tier.remove("a").await.unwrap());
        assert!(!tier.remove("a").await.unwrap());
        assert!(tier.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_items_and_clear() {
        let tier = MemoryTier::new();
        for id in ["a", "b", "c"] {
            tier.set(&make_item(id)).await.unwrap();
        }
        assert_eq!(tier.items().await.unwrap().len(), 3);

        assert_eq!(tier.clear().await.unwrap(), 3);
        assert!(tier.is_empty());
    }
}
