//! Eviction and demotion behaviour across tiers.

use std::sync::Arc;

use kv_tier_engine::cache::{Tier, TieredCache};
use kv_tier_engine::config::{Config, TierSpec};

fn cache(capacities: [usize; 4]) -> TieredCache {
    let mut cfg = Config::default();
    for tier in Tier::ALL {
        *cfg.tiers.spec_mut(tier) = TierSpec {
            capacity: capacities[tier.index()],
            slot_size: 128,
            latency_class_ns: 10,
        };
    }
    TieredCache::new(Arc::new(cfg)).unwrap()
}

#[test]
fn test_valuable_entry_demoted_not_discarded() {
    let mut cache = cache([1, 4, 4, 4]);

    cache.put(b"A", b"a-value", true).unwrap();
    cache.get(b"A").unwrap();
    cache.get(b"A").unwrap();
    assert_eq!(cache.entry_info(b"A").unwrap().access_count, 3);

    cache.put(b"B", b"b-value", true).unwrap();

    assert_eq!(cache.tier_of(b"A"), Some(Tier::Fast));
    assert_eq!(cache.tier_of(b"B"), Some(Tier::Fastest));
    assert_eq!(cache.get(b"A").as_deref(), Some(&b"a-value"[..]));

    let stats = cache.stats();
    assert_eq!(stats.tier(Tier::Fast).demotions_in, 1);
    assert_eq!(stats.tier(Tier::Fastest).evictions, 0);
}

#[test]
fn test_cold_entry_discarded() {
    let mut cache = cache([1, 4, 4, 4]);

    cache.put(b"A", b"1", true).unwrap();
    cache.get(b"A").unwrap();
    assert_eq!(cache.entry_info(b"A").unwrap().access_count, 2);

    cache.put(b"B", b"2", true).unwrap();
    assert!(!cache.contains(b"A"));
    assert_eq!(cache.stats().tier(Tier::Fastest).evictions, 1);
}

#[test]
fn test_lru_victim_is_least_recently_used() {
    let mut cache = cache([2, 4, 4, 4]);

    cache.put(b"old", b"1", true).unwrap();
    cache.put(b"new", b"2", true).unwrap();
    // Touch "old" so "new" becomes the LRU entry.
    cache.get(b"old").unwrap();

    cache.put(b"third", b"3", true).unwrap();
    assert!(cache.contains(b"old"));
    assert!(!cache.contains(b"new"));
}

#[test]
fn test_demotion_cascades_down_the_hierarchy() {
    let mut cache = cache([1, 1, 1, 1]);

    for key in [b"k1", b"k2", b"k3", b"k4", b"k5"] {
        cache.put(key, b"v", true).unwrap();
        // Three accesses make every entry worth keeping.
        cache.get(key).unwrap();
        cache.get(key).unwrap();
    }

    assert_eq!(cache.tier_of(b"k5"), Some(Tier::Fastest));
    assert_eq!(cache.tier_of(b"k4"), Some(Tier::Fast));
    assert_eq!(cache.tier_of(b"k3"), Some(Tier::Slow));
    assert_eq!(cache.tier_of(b"k2"), Some(Tier::Slowest));
    // Nothing below the slowest tier: the oldest entry is gone.
    assert!(!cache.contains(b"k1"));
    assert_eq!(cache.len(), 4);

    let stats = cache.stats();
    assert_eq!(stats.tier(Tier::Slowest).evictions, 1);
}

#[test]
fn test_no_entry_in_two_tiers() {
    let mut cache = cache([2, 2, 2, 2]);
    for i in 0..40u32 {
        let key = format!("k{}", i % 10);
        if cache.get(key.as_bytes()).is_none() {
            cache.put(key.as_bytes(), &i.to_le_bytes(), i % 3 == 0).unwrap();
        }
    }

    let mut seen = std::collections::HashSet::new();
    for (info, key, _) in cache.entries() {
        assert!(seen.insert(key.to_vec()), "duplicate entry in {}", info.tier);
    }
    assert_eq!(seen.len(), cache.len());
    for tier in Tier::ALL {
        assert!(cache.tier_len(tier) <= 2);
    }
}
