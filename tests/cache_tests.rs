//! Integration tests for the tiered KV cache.

use std::sync::Arc;

use kv_tier_engine::cache::{CacheError, Tier, TieredCache};
use kv_tier_engine::config::{Config, SoaConfig, TierSpec};
use kv_tier_engine::soa::SoaLayout;

fn config_with_capacities(capacities: [usize; 4]) -> Config {
    let mut cfg = Config::default();
    for tier in Tier::ALL {
        *cfg.tiers.spec_mut(tier) = TierSpec {
            capacity: capacities[tier.index()],
            slot_size: 256,
            latency_class_ns: 100 * 10u64.pow(tier.level() as u32),
        };
    }
    cfg
}

#[test]
fn test_warmup_placement_then_promotion() {
    let config = Arc::new(config_with_capacities([4, 16, 16, 16]));
    let mut cache = TieredCache::new(config).unwrap();

    // Five keys under light load all land in the second tier.
    for i in 0..5 {
        let tier = cache
            .put(format!("key-{i}").as_bytes(), b"value", false)
            .unwrap();
        assert_eq!(tier, Tier::Fast);
    }
    assert_eq!(cache.tier_len(Tier::Fast), 5);
    assert_eq!(cache.tier_len(Tier::Fastest), 0);

    // A read succeeds and promotes into the (empty) fastest tier.
    assert_eq!(cache.get(b"key-2").as_deref(), Some(&b"value"[..]));
    assert_eq!(cache.tier_of(b"key-2"), Some(Tier::Fastest));
    assert_eq!(cache.tier_len(Tier::Fast), 4);

    let stats = cache.stats();
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.demotions, 0);
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.entries, 5);
}

#[test]
fn test_put_get_roundtrip_counts_access() {
    let mut cache = TieredCache::new(Arc::new(config_with_capacities([8, 8, 8, 8]))).unwrap();

    cache.set(b"prompt-prefix", b"kv-bytes").unwrap();
    assert_eq!(cache.get(b"prompt-prefix").as_deref(), Some(&b"kv-bytes"[..]));

    let info = cache.entry_info(b"prompt-prefix").unwrap();
    assert!(info.access_count >= 2);
    assert!(info.valid);
    assert_eq!(info.key_len, b"prompt-prefix".len());
    assert_eq!(info.value_len, b"kv-bytes".len());
}

#[test]
fn test_absent_key_and_hit_rate() {
    let mut cache = TieredCache::new(Arc::new(config_with_capacities([8, 8, 8, 8]))).unwrap();
    assert_eq!(cache.stats().hit_rate, 0.0);

    cache.set(b"a", b"1").unwrap();
    assert!(cache.get(b"a").is_some());
    assert!(cache.get(b"b").is_none());
    assert!(cache.get(b"c").is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert!((stats.hit_rate - 1.0 / 3.0).abs() < 1e-10);
    for t in &stats.tiers {
        assert!((0.0..=1.0).contains(&t.hit_rate));
    }
}

#[test]
fn test_oversized_rejected_and_small_tier_skipped() {
    let mut cfg = config_with_capacities([0, 0, 0, 0]);
    cfg.tiers.fast = TierSpec {
        capacity: 1,
        slot_size: 4,
        latency_class_ns: 1,
    };
    cfg.tiers.slowest = TierSpec {
        capacity: 1,
        slot_size: 64,
        latency_class_ns: 1,
    };
    let mut cache = TieredCache::new(Arc::new(cfg)).unwrap();

    assert_eq!(
        cache.set(b"k", &[0u8; 64]),
        Err(CacheError::KeyOrValueTooLarge { size: 65, limit: 64 })
    );
    assert!(cache.set(b"k", &[0u8; 16]).is_ok());
    assert_eq!(cache.tier_of(b"k"), Some(Tier::Slowest));
}

#[test]
fn test_delete_frees_slot_for_reuse() {
    let mut cache = TieredCache::new(Arc::new(config_with_capacities([1, 1, 1, 1]))).unwrap();
    cache.put(b"a", b"1", true).unwrap();
    assert!(cache.delete(b"a"));
    assert!(cache.get(b"a").is_none());

    cache.put(b"b", b"2", true).unwrap();
    assert_eq!(cache.tier_of(b"b"), Some(Tier::Fastest));
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_entries_cover_every_tier() {
    let mut cache = TieredCache::new(Arc::new(config_with_capacities([4, 4, 4, 4]))).unwrap();
    cache.put(b"hot", b"1", true).unwrap();
    cache.set(b"warm", b"2").unwrap();
    cache.restore_entry(Tier::Slowest, b"cold", b"3", 1).unwrap();

    let tiers: Vec<Tier> = cache.entries().map(|(info, _, _)| info.tier).collect();
    assert_eq!(tiers, vec![Tier::Fastest, Tier::Fast, Tier::Slowest]);
}

#[test]
fn test_soa_batch_search_finds_assigned_rows() {
    let mut layout = SoaLayout::new(&SoaConfig::default()).unwrap();
    let keys: Vec<String> = (0..37).map(|i| format!("seq-{i}")).collect();
    let mut assigned = Vec::new();
    for key in &keys {
        assigned.push(layout.add_key(key.as_bytes(), Tier::Fast).unwrap());
    }

    let search: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
    let mut results = vec![usize::MAX; search.len()];
    assert_eq!(layout.find_keys_simd(&search, &mut results), keys.len());
    assert_eq!(results, assigned);

    let absent: Vec<&[u8]> = vec![b"seq-37".as_slice(), b"other".as_slice()];
    let mut none = [0usize; 2];
    assert_eq!(layout.find_keys_simd(&absent, &mut none), 0);
}
