//! Declared tiers without a working backend (indexedDB, serviceWorker)

use async_trait::async_trait;

use super::TierAdapter;
use crate::cache::config::TierKind;
use crate::cache::entry::CacheItem;
use crate::error::{Error, Result};

/// Adapter whose every operation fails with `TierUnavailable`
pub struct UnavailableTier {
    kind: TierKind,
}

impl UnavailableTier {
    pub fn new(kind: TierKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl TierAdapter for UnavailableTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheItem>> {
        Err(Error::TierUnavailable(self.kind))
    }

    async fn set(&self, _item: &CacheItem) -> Result<()> {
        Err(Error::TierUnavailable(self.kind))
    }

    async fn remove(&self, _key: &str) -> Result<bool> {
        Err(Error::TierUnavailable(self.kind))
    }

    async fn items(&self) -> Result<Vec<CacheItem>> {
        Err(Error::TierUnavailable(self.kind))
    }

    async fn clear(&self) -> Result<usize> {
        Err(Error::TierUnavailable(self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_every_call_fails() {
        let tier = UnavailableTier::new(TierKind::IndexedDb);
        assert_matches!(
            tier.get("k").await,
            Err(Error::TierUnavailable(TierKind::IndexedDb))
        );
        assert!(tier.remove("k").await.is_err());
        assert!(tier.items().await.is_err());
        assert!(tier.clear().await.is_err());
    }
}
