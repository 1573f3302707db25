//! Storage Tiers
//!
//! Each backend implements [`TierAdapter`]; the engine walks an ordered list
//! of them chosen by `CacheConfig::tiers`.
//!
//! ```text
//!   memory ──▶ sessionStorage ──▶ localStorage ──▶ indexedDB / serviceWorker
//!   (DashMap)   (InMemoryStore)    (FileStore)      (stubs, always fail)
//! ```

mod memory;
mod storage;
mod unavailable;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::config::TierKind;
use super::entry::CacheItem;
use crate::error::Result;

pub use memory::MemoryTier;
pub use storage::{persisted_key, FileStore, InMemoryStore, KeyValueStore, StorageTier};
pub use unavailable::UnavailableTier;

/// Read/write/remove capability for one storage backend
#[async_trait]
pub trait TierAdapter: Send + Sync {
    /// Which tier this adapter serves
    fn kind(&self) -> TierKind;

    /// Read an item, expired or not
    async fn get(&self, key: &str) -> Result<Option<CacheItem>>;

    /// Insert or replace an item
    async fn set(&self, item: &CacheItem) -> Result<()>;

    /// Remove an item, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Every readable resident item
    async fn items(&self) -> Result<Vec<CacheItem>>;

    /// Remove every cache item, returning how many were removed
    async fn clear(&self) -> Result<usize>;
}

/// One adapter per declared tier
#[derive(Clone)]
pub struct TierSet {
    adapters: HashMap<TierKind, Arc<dyn TierAdapter>>,
}

impl TierSet {
    /// All tiers in process memory; nothing touches disk
    pub fn in_memory() -> Self {
        let mut set = Self {
            adapters: HashMap::new(),
        };
        set.insert(Arc::new(MemoryTier::new()));
        set.insert(Arc::new(StorageTier::new(
            TierKind::Session,
            Arc::new(InMemoryStore::new()),
        )));
        set.insert(Arc::new(StorageTier::new(
            TierKind::Local,
            Arc::new(InMemoryStore::new()),
        )));
        set.insert(Arc::new(UnavailableTier::new(TierKind::IndexedDb)));
        set.insert(Arc::new(UnavailableTier::new(TierKind::ServiceWorker)));
        set
    }

    /// Like [`TierSet::in_memory`] but `localStorage` persists under `dir`
    pub fn with_store_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut set = Self::in_memory();
        let store = FileStore::open(dir)?;
        set.insert(Arc::new(StorageTier::new(TierKind::Local, Arc::new(store))));
        Ok(set)
    }

    /// Bound the `sessionStorage` store to `quota` bytes, if given
    pub fn with_session_quota(self, quota: Option<usize>) -> Self {
        match quota {
            Some(quota) => self.with_adapter(Arc::new(StorageTier::new(
                TierKind::Session,
                Arc::new(InMemoryStore::with_quota(quota)),
            ))),
            None => self,
        }
    }

    /// Install or replace the adapter for its tier
    pub fn insert(&mut self, adapter: Arc<dyn TierAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Builder-style [`TierSet::insert`]
    pub fn with_adapter(mut self, adapter: Arc<dyn TierAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    /// Adapter for a tier; undeclared tiers resolve to a failing stub
    pub fn get(&self, kind: TierKind) -> Arc<dyn TierAdapter> {
        self.adapters
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(UnavailableTier::new(kind)))
    }
}

impl Default for TierSet {
    fn default() -> Self {
        Self::in_memory()
    }
}

// =============================================================================
// Tests
// =============================================================================
