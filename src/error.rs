//! Error types for the Haven cache engine

use thiserror::Error;

use crate::cache::TierKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache engine
///
/// These are raised at tier, codec and configuration boundaries. The public
/// engine operations catch them, log them and resolve to a safe sentinel.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Storage quota exceeded
    #[error("Storage quota exceeded in {tier}: need {needed} bytes, limit {limit} bytes")]
    QuotaExceeded {
        tier: String,
        needed: usize,
        limit: usize,
    },

    /// JSON serialization or parse failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tier is declared but has no working adapter
    #[error("Cache tier unavailable: {0}")]
    TierUnavailable(TierKind),

    /// Persisted entry could not be trusted
    #[error("Corrupt cache entry '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Compression worker channel closed or dropped a reply
    #[error("Compression channel closed: {0}")]
    ChannelClosed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration document parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    /// Prometheus registry or encoder error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
