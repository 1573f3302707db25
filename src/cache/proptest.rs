//! Property-Based Tests for the Cache Engine
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: set(k, v) then get(k) before expiry returns v
//! 2. **Codec**: decode(encode(v)) = v for every JSON value, including values
//!    shaped like a compressed payload
//! 3. **Capacity**: the fastest tier never holds more than `maxItems`
//! 4. **Metrics**: hitRate = hits / (hits + misses)
//! 5. **Batch sizing**: max(1, ceil(n / 10)), never more than n

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Value};

use super::clock::ManualClock;
use super::compression::{CompressionConfig, PayloadCodec};
use super::config::{CacheConfig, TierKind};
use super::engine::CacheEngine;
use super::entry::SetOptions;
use super::metrics::MetricsCollector;
use super::policy::EvictionPolicy;
use super::tier::TierSet;

// =============================================================================
// Property Strategies
// =============================================================================

/// Arbitrary JSON without floats (NaN has no JSON form)
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,40}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:/_-]{1,24}"
}

fn engine(config: CacheConfig) -> Arc<CacheEngine> {
    let config = CacheConfig {
        enable_metrics: false,
        ..config
    };
    CacheEngine::with_parts(config, TierSet::in_memory(), Arc::new(ManualClock::new(0)))
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_set_get_roundtrip(key in key_strategy(), value in json_strategy()) {
        let engine = engine(CacheConfig::default());
        let read = tokio_test::block_on(async {
            engine.set(&key, &value, SetOptions::default()).await;
            engine.get::<Value>(&key).await
        });
        prop_assert_eq!(read, Some(value));
    }

    #[test]
    fn prop_roundtrip_from_durable_tier(key in key_strategy(), value in json_strategy()) {
        let engine = engine(CacheConfig::default());
        let read = tokio_test::block_on(async {
            engine.set(&key, &value, SetOptions::default().with_tier(TierKind::Local)).await;
            engine.get::<Value>(&key).await
        });
        prop_assert_eq!(read, Some(value));
    }

    #[test]
    fn prop_codec_roundtrip(value in json_strategy(), min_size in 0usize..256) {
        let codec = PayloadCodec::with_config(CompressionConfig {
            min_size_bytes: min_size,
            ..Default::default()
        });
        let packed = codec.encode(value.clone());
        prop_assert_eq!(codec.decode(packed).unwrap(), value);
    }

    #[test]
    fn prop_payload_shaped_values_roundtrip(
        key in key_strategy(),
        marker in prop_oneof![Just("lz4".to_string()), Just("none".to_string()), "[a-z]{0,6}"],
        payload in "[A-Za-z0-9+/=]{0,64}",
        enable_compression in any::<bool>(),
    ) {
        let value = json!({"__compressed": marker, "payload": payload});
        let engine = engine(CacheConfig {
            enable_compression,
            ..Default::default()
        });
        let read = tokio_test::block_on(async {
            engine.set(&key, &value, SetOptions::default()).await;
            engine.get::<Value>(&key).await
        });
        prop_assert_eq!(read, Some(value));
    }
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_item_count_bounded(
        max_items in 1usize..12,
        keys in prop::collection::vec("[a-f]{1,2}", 1..40),
    ) {
        let engine = engine(CacheConfig { max_items, ..Default::default() });
        let memory = engine.tier(TierKind::Memory);

        for key in keys {
            let resident = tokio_test::block_on(async {
                engine.set(&key, &key, SetOptions::default()).await;
                memory.items().await.unwrap().len()
            });
            prop_assert!(resident <= max_items);
        }
    }

    #[test]
    fn prop_size_bounded(
        max_size in 16u64..256,
        lengths in prop::collection::vec(0usize..300, 1..20),
    ) {
        let engine = engine(CacheConfig { max_size, ..Default::default() });

        for (i, len) in lengths.into_iter().enumerate() {
            let size = tokio_test::block_on(async {
                engine.set(&format!("k{}", i), &"x".repeat(len), SetOptions::default()).await;
                engine.metrics().cache_size
            });
            prop_assert!(size <= max_size);
        }
    }
}

// =============================================================================
// Arithmetic Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_hit_rate(hits in 0u64..500, misses in 0u64..500) {
        let metrics = MetricsCollector::new();
        for _ in 0..hits {
            metrics.record_hit(Duration::ZERO);
        }
        for _ in 0..misses {
            metrics.record_miss(Duration::ZERO);
        }

        let snapshot = metrics.snapshot();
        prop_assert_eq!(snapshot.total_requests, hits + misses);
        if hits + misses == 0 {
            prop_assert_eq!(snapshot.hit_rate, 0.0);
        } else {
            prop_assert_eq!(snapshot.hit_rate, hits as f64 / (hits + misses) as f64);
            prop_assert!((snapshot.hit_rate + snapshot.miss_rate - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_batch_size(resident in 1usize..100_000) {
        let batch = EvictionPolicy::lru().batch_size(resident);
        prop_assert_eq!(batch, std::cmp::max(1, (resident + 9) / 10));
        prop_assert!(batch <= resident);
    }
}
