//! Cache Configuration
//!
//! Construction-time configuration for the engine plus the partial update
//! applied by [`CacheEngine::update_config`](super::CacheEngine::update_config).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{DEFAULT_MAX_ITEMS, DEFAULT_MAX_SIZE, DEFAULT_OPTIMIZE_INTERVAL_MS, DEFAULT_TTL_MS};

/// Storage tier identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// Volatile in-process map
    #[serde(rename = "memory")]
    Memory,
    /// Session-scoped persisted store
    #[serde(rename = "sessionStorage")]
    Session,
    /// Durable persisted store
    #[serde(rename = "localStorage")]
    Local,
    /// Structured database (declared, no adapter)
    #[serde(rename = "indexedDB")]
    IndexedDb,
    /// Network-owned cache (declared, no adapter)
    #[serde(rename = "serviceWorker")]
    ServiceWorker,
}

impl TierKind {
    /// Wire/config name of the tier
    pub fn name(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Session => "sessionStorage",
            TierKind::Local => "localStorage",
            TierKind::IndexedDb => "indexedDB",
            TierKind::ServiceWorker => "serviceWorker",
        }
    }

    /// Every declared tier
    pub fn all() -> [TierKind; 5] {
        [
            TierKind::Memory,
            TierKind::Session,
            TierKind::Local,
            TierKind::IndexedDb,
            TierKind::ServiceWorker,
        ]
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fetch strategy hint for callers. The engine does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    #[default]
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
    CacheOnly,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Byte ceiling for the fastest tier
    pub max_size: u64,
    /// Item count ceiling for the fastest tier
    pub max_items: usize,
    /// Default time-to-live in milliseconds
    #[serde(rename = "defaultTTL")]
    pub default_ttl: u64,
    /// Strategy hint
    pub strategy: CacheStrategy,
    /// Ordered tiers; index 0 is the promotion target
    pub tiers: Vec<TierKind>,
    /// Compress payloads on a background worker
    pub enable_compression: bool,
    /// Declared only; payloads are never encrypted
    pub enable_encryption: bool,
    /// Collect request metrics and run the periodic optimizer
    pub enable_metrics: bool,
    /// Period of the background optimizer in milliseconds
    pub optimize_interval: u64,
    /// Byte quota of the `sessionStorage` store; unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_quota: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_items: DEFAULT_MAX_ITEMS,
            default_ttl: DEFAULT_TTL_MS,
            strategy: CacheStrategy::CacheFirst,
            tiers: vec![TierKind::Memory, TierKind::Local],
            enable_compression: false,
            enable_encryption: false,
            enable_metrics: true,
            optimize_interval: DEFAULT_OPTIMIZE_INTERVAL_MS,
            session_quota: None,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML or JSON document
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from YAML (JSON is accepted as a YAML subset)
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("maxSize must be greater than zero".into()));
        }
        if self.max_items == 0 {
            return Err(Error::Config("maxItems must be greater than zero".into()));
        }
        if self.tiers.is_empty() {
            return Err(Error::Config("at least one tier is required".into()));
        }
        let unique: HashSet<_> = self.tiers.iter().collect();
        if unique.len() != self.tiers.len() {
            return Err(Error::Config("tiers must not repeat".into()));
        }
        if self.optimize_interval == 0 {
            return Err(Error::Config(
                "optimizeInterval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Fastest configured tier
    pub fn fastest_tier(&self) -> TierKind {
        self.tiers.first().copied().unwrap_or(TierKind::Memory)
    }

    /// Optimizer period
    pub fn optimize_period(&self) -> Duration {
        Duration::from_millis(self.optimize_interval)
    }

    /// Merge a partial update into a copy of this config
    pub fn merged(&self, patch: &CacheConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.max_size {
            next.max_size = v;
        }
        if let Some(v) = patch.max_items {
            next.max_items = v;
        }
        if let Some(v) = patch.default_ttl {
            next.default_ttl = v;
        }
        if let Some(v) = patch.strategy {
            next.strategy = v;
        }
        if let Some(v) = &patch.tiers {
            next.tiers = v.clone();
        }
        if let Some(v) = patch.enable_compression {
            next.enable_compression = v;
        }
        if let Some(v) = patch.enable_encryption {
            next.enable_encryption = v;
        }
        if let Some(v) = patch.enable_metrics {
            next.enable_metrics = v;
        }
        if let Some(v) = patch.optimize_interval {
            next.optimize_interval = v;
        }
        next
    }
}

/// Partial configuration update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfigPatch {
    pub max_size: Option<u64>,
    pub max_items: Option<usize>,
    #[serde(rename = "defaultTTL")]
    pub default_ttl: Option<u64>,
    pub strategy: Option<CacheStrategy>,
    pub tiers: Option<Vec<TierKind>>,
    pub enable_compression: Option<bool>,
    pub enable_encryption: Option<bool>,
    pub enable_metrics: Option<bool>,
    pub optimize_interval: Option<u64>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fastest_tier(), TierKind::Memory);
        assert_eq!(config.optimize_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_yaml() {
        let raw = r#"
maxSize: 4096
maxItems: 10
defaultTTL: 1000
strategy: stale-while-revalidate
tiers: [sessionStorage, memory]
enableCompression: true
sessionQuota: 65536
"#;
        let config = CacheConfig::from_yaml_str(raw).unwrap();
        assert_eq!(config.max_size, 4096);
        assert_eq!(config.max_items, 10);
        assert_eq!(config.default_ttl, 1000);
        assert_eq!(config.strategy, CacheStrategy::StaleWhileRevalidate);
        assert_eq!(config.tiers, vec![TierKind::Session, TierKind::Memory]);
        assert!(config.enable_compression);
        assert_eq!(config.session_quota, Some(65536));
        // Unspecified fields fall back to defaults
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_parse_json_document() {
        let raw = r#"{"maxItems": 3, "tiers": ["memory", "indexedDB"]}"#;
        let config = CacheConfig::from_yaml_str(raw).unwrap();
        assert_eq!(config.max_items, 3);
        assert_eq!(config.tiers, vec![TierKind::Memory, TierKind::IndexedDb]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CacheConfig::default();
        config.max_items = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.tiers.clear();
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.tiers = vec![TierKind::Memory, TierKind::Memory];
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.max_size = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_merge_patch() {
        let config = CacheConfig::default();
        let patch = CacheConfigPatch {
            max_items: Some(5),
            enable_metrics: Some(false),
            ..Default::default()
        };
        let merged = config.merged(&patch);
        assert_eq!(merged.max_items, 5);
        assert!(!merged.enable_metrics);
        assert_eq!(merged.max_size, config.max_size);
    }

    #[test]
    fn test_tier_names_roundtrip() {
        for kind in TierKind::all() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }
}
