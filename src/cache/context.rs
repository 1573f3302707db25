//! Shared cache handle
//!
//! The application builds one [`CacheContext`] at startup and passes clones
//! to whatever needs the cache. Clones share a single engine.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use super::clock::SystemClock;
use super::config::CacheConfig;
use super::engine::CacheEngine;
use super::tier::TierSet;
use crate::error::Result;

/// Cloneable handle to one engine
#[derive(Debug, Clone)]
pub struct CacheContext {
    engine: Arc<CacheEngine>,
}

impl CacheContext {
    /// Context over in-memory tiers
    pub fn new(config: CacheConfig) -> Self {
        Self {
            engine: CacheEngine::new(config),
        }
    }

    /// Context whose `localStorage` tier persists under `dir`
    pub fn with_store_dir(config: CacheConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let tiers = TierSet::with_store_dir(dir)?.with_session_quota(config.session_quota);
        Ok(Self {
            engine: CacheEngine::with_parts(config, tiers, Arc::new(SystemClock)),
        })
    }

    /// Context configured from a YAML or JSON file
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = CacheConfig::from_file(path)?;
        Ok(Self::new(config))
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }
}

impl Deref for CacheContext {
    type Target = CacheEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
