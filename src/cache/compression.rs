//! Payload Compression
//!
//! LZ4 compression of JSON payloads with automatic fallback to the raw value.
//! Whether a payload is compressed is recorded beside it, never inside it,
//! so any caller value (including one that looks like a compressed payload)
//! is stored and returned untouched when it is not compressed:
//!
//! ```text
//! plain       data: <caller value>            compression: (absent)
//! compressed  data: "<base64 of LZ4 block>"   compression: "lz4"
//! ```
//!
//! # Example
//!
//! ```
//! use haven_cache::cache::compression::PayloadCodec;
//! use serde_json::json;
//!
//! let codec = PayloadCodec::new();
//! let value = json!({"note": "breathe in, breathe out. ".repeat(100)});
//!
//! let packed = codec.encode(value.clone());
//! assert!(packed.is_compressed());
//! assert_eq!(codec.decode(packed).unwrap(), value);
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Compression applied to a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// LZ4 block, size-prefixed, then base64
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Codec tuning
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Payloads whose JSON is smaller than this stay uncompressed
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

// =============================================================================
// Encoded Payload
// =============================================================================

/// A payload as stored, with the compression it went through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoded {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionAlgorithm>,
}

impl Encoded {
    pub fn new(data: Value, compression: Option<CompressionAlgorithm>) -> Self {
        Self { data, compression }
    }

    /// Uncompressed payload
    pub fn plain(data: Value) -> Self {
        Self::new(data, None)
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }
}

// =============================================================================
// Payload Codec
// =============================================================================

/// JSON-level codec used by the compression worker
#[derive(Debug, Clone, Default)]
pub struct PayloadCodec {
    config: CompressionConfig,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress a value, or keep it plain when compression fails or does not pay
    pub fn encode(&self, value: Value) -> Encoded {
        match self.try_encode(&value) {
            Ok(Some(packed)) => packed,
            Ok(None) => Encoded::plain(value),
            Err(e) => {
                tracing::warn!("Compression failed, storing uncompressed: {}", e);
                Encoded::plain(value)
            }
        }
    }

    /// `Ok(None)` when the value should be stored plain
    pub fn try_encode(&self, value: &Value) -> Result<Option<Encoded>> {
        let raw = serde_json::to_vec(value)?;
        if raw.len() < self.config.min_size_bytes {
            return Ok(None);
        }

        let block = lz4::block::compress(
            &raw,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: CompressionAlgorithm::Lz4.name().into(),
            reason: e.to_string(),
        })?;
        let payload = BASE64.encode(&block);

        // base64 inflates by a third; only keep a payload that still wins
        if payload.len() >= raw.len() {
            return Ok(None);
        }
        Ok(Some(Encoded::new(
            Value::String(payload),
            Some(CompressionAlgorithm::Lz4),
        )))
    }

    /// Recover the caller's value; plain payloads pass through as-is
    pub fn decode(&self, encoded: Encoded) -> Result<Value> {
        let Some(algorithm) = encoded.compression else {
            return Ok(encoded.data);
        };
        let failed = |reason: String| Error::DecompressionFailed {
            algorithm: algorithm.name().into(),
            reason,
        };

        let Value::String(payload) = &encoded.data else {
            return Err(failed("payload is not a string".into()));
        };
        let block = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| failed(e.to_string()))?;
        let raw = match algorithm {
            CompressionAlgorithm::Lz4 => {
                lz4::block::decompress(&block, None).map_err(|e| failed(e.to_string()))?
            }
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn large_value() -> Value {
        json!({
            "journal": "Today I felt calmer after the breathing exercise. ".repeat(60),
            "mood": 7
        })
    }

    #[test]
    fn test_codec_compresses_large_values() {
        let codec = PayloadCodec::new();
        let value = large_value();

        let packed = codec.encode(value.clone());
        assert_eq!(packed.compression, Some(CompressionAlgorithm::Lz4));
        assert!(packed.data.is_string());
        assert!(serde_json::to_vec(&packed.data).unwrap().len() < serde_json::to_vec(&value).unwrap().len());

        assert_eq!(codec.decode(packed).unwrap(), value);
    }

    #[test]
    fn test_codec_skips_small_values() {
        let codec = PayloadCodec::new();
        let value = json!({"mood": 7});
        assert_eq!(codec.encode(value.clone()), Encoded::plain(value));
    }

    #[test]
    fn test_codec_skips_incompressible_values() {
        let codec = PayloadCodec::with_config(CompressionConfig {
            min_size_bytes: 0,
            ..Default::default()
        });
        // Short, non-repetitive: the base64 block cannot win
        let value = json!("q8Zr2");
        assert!(!codec.encode(value).is_compressed());
    }

    #[test]
    fn test_plain_lookalike_is_not_unpacked() {
        let codec = PayloadCodec::new();
        let value = json!({"__compressed": "lz4", "payload": "MQ=="});
        let packed = codec.encode(value.clone());
        assert!(!packed.is_compressed());
        assert_eq!(codec.decode(packed).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_damaged_payload() {
        let codec = PayloadCodec::new();
        let damaged = Encoded::new(json!("!!!not base64!!!"), Some(CompressionAlgorithm::Lz4));
        assert_matches!(codec.decode(damaged), Err(Error::DecompressionFailed { .. }));

        let not_a_string = Encoded::new(json!({"a": 1}), Some(CompressionAlgorithm::Lz4));
        assert_matches!(codec.decode(not_a_string), Err(Error::DecompressionFailed { .. }));
    }

    #[test]
    fn test_encoded_wire_shape() {
        let plain = serde_json::to_value(Encoded::plain(json!(1))).unwrap();
        assert_eq!(plain, json!({"data": 1}));

        let packed = PayloadCodec::new().encode(large_value());
        let wire = serde_json::to_value(&packed).unwrap();
        assert_eq!(wire["compression"], "lz4");
    }
}
