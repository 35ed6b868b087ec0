//! Statistics aggregation for the tiered cache.
//!
//! Counters are plain integers: the cache is single threaded and every
//! mutation already holds `&mut`. [`CacheStats`] is the read-only snapshot
//! handed to callers and exporters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::tier::Tier;
use crate::config::StatsConfig;

/// `num / den`, defined as 0.0 when `den == 0`.
pub fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        return 0.0;
    }
    (num as f64 / den as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
struct TierCounters {
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
    demotions_in: u64,
    promotions_in: u64,
    last_latency_ns: u64,
    ema_latency_ns: f64,
    total_latency_ns: u64,
}

/// Occupancy of one tier at snapshot time.
#[derive(Debug, Clone, Copy)]
pub struct TierOccupancy {
    pub entries: usize,
    pub capacity: usize,
    pub latency_class_ns: u64,
}

/// Running counters for the whole cache.
#[derive(Debug)]
pub struct StatsAggregator {
    tiers: [TierCounters; 4],
    gets: u64,
    puts: u64,
    misses: u64,
    promotion_failures: u64,
    miss_latency_ns: u64,
    ema_decay: f64,
}

impl StatsAggregator {
    pub fn new(config: &StatsConfig) -> Self {
        Self {
            tiers: Default::default(),
            gets: 0,
            puts: 0,
            misses: 0,
            promotion_failures: 0,
            miss_latency_ns: 0,
            ema_decay: config.latency_ema_decay.clamp(0.0, 1.0),
        }
    }

    pub fn record_get(&mut self) {
        self.gets += 1;
    }

    pub fn record_put(&mut self) {
        self.puts += 1;
    }

    /// A lookup was served by `tier`.
    pub fn record_hit(&mut self, tier: Tier, latency: Duration) {
        let decay = self.ema_decay;
        let ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        let c = &mut self.tiers[tier.index()];
        c.hits += 1;
        c.last_latency_ns = ns;
        c.total_latency_ns = c.total_latency_ns.saturating_add(ns);
        c.ema_latency_ns = if c.hits == 1 {
            ns as f64
        } else {
            decay * c.ema_latency_ns + (1.0 - decay) * ns as f64
        };
    }

    /// `tier` was probed and did not hold the key.
    pub fn record_tier_miss(&mut self, tier: Tier) {
        self.tiers[tier.index()].misses += 1;
    }

    /// No tier held the key.
    pub fn record_miss(&mut self, latency: Duration) {
        self.misses += 1;
        self.miss_latency_ns = self
            .miss_latency_ns
            .saturating_add(latency.as_nanos().min(u64::MAX as u128) as u64);
    }

    pub fn record_insertion(&mut self, tier: Tier) {
        self.tiers[tier.index()].insertions += 1;
    }

    /// An entry was discarded from `tier`.
    pub fn record_eviction(&mut self, tier: Tier) {
        self.tiers[tier.index()].evictions += 1;
    }

    /// An entry was demoted into `tier`.
    pub fn record_demotion(&mut self, tier: Tier) {
        self.tiers[tier.index()].demotions_in += 1;
    }

    /// An entry was promoted into `tier`.
    pub fn record_promotion(&mut self, tier: Tier) {
        self.tiers[tier.index()].promotions_in += 1;
    }

    pub fn record_promotion_failure(&mut self) {
        self.promotion_failures += 1;
    }

    /// Gets plus puts.
    pub fn total_requests(&self) -> u64 {
        self.gets + self.puts
    }

    pub fn hits(&self) -> u64 {
        self.tiers.iter().map(|c| c.hits).sum()
    }

    /// Fraction of gets served by some tier.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        ratio(hits, hits + self.misses)
    }

    /// Forget all counters.
    pub fn reset(&mut self) {
        let decay = self.ema_decay;
        *self = Self {
            tiers: Default::default(),
            gets: 0,
            puts: 0,
            misses: 0,
            promotion_failures: 0,
            miss_latency_ns: 0,
            ema_decay: decay,
        };
    }

    /// Build a snapshot, combining counters with current tier occupancy.
    pub fn snapshot(&self, occupancy: &[TierOccupancy; 4]) -> CacheStats {
        let tiers: Vec<TierStats> = Tier::ALL
            .iter()
            .map(|&tier| {
                let c = &self.tiers[tier.index()];
                let occ = occupancy[tier.index()];
                TierStats {
                    tier,
                    entries: occ.entries,
                    capacity: occ.capacity,
                    utilization: if occ.capacity == 0 {
                        0.0
                    } else {
                        occ.entries as f64 / occ.capacity as f64
                    },
                    hits: c.hits,
                    misses: c.misses,
                    hit_rate: ratio(c.hits, c.hits + c.misses),
                    insertions: c.insertions,
                    evictions: c.evictions,
                    demotions_in: c.demotions_in,
                    promotions_in: c.promotions_in,
                    last_latency_ns: c.last_latency_ns,
                    avg_latency_ns: c.ema_latency_ns,
                    total_latency_ns: c.total_latency_ns,
                    latency_class_ns: occ.latency_class_ns,
                }
            })
            .collect();

        let hits = self.hits();
        CacheStats {
            gets: self.gets,
            puts: self.puts,
            hits,
            misses: self.misses,
            hit_rate: ratio(hits, hits + self.misses),
            avg_miss_latency_ns: if self.misses == 0 {
                0.0
            } else {
                self.miss_latency_ns as f64 / self.misses as f64
            },
            promotions: tiers.iter().map(|t| t.promotions_in).sum(),
            promotion_failures: self.promotion_failures,
            demotions: tiers.iter().map(|t| t.demotions_in).sum(),
            evictions: tiers.iter().map(|t| t.evictions).sum(),
            entries: tiers.iter().map(|t| t.entries).sum(),
            tiers,
        }
    }
}

/// Per-tier view in a [`CacheStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: Tier,
    pub entries: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub hits: u64,
    /// Lookups that probed this tier without finding the key.
    pub misses: u64,
    pub hit_rate: f64,
    pub insertions: u64,
    /// Entries discarded from this tier.
    pub evictions: u64,
    pub demotions_in: u64,
    pub promotions_in: u64,
    pub last_latency_ns: u64,
    /// Exponential moving average of hit latency.
    pub avg_latency_ns: f64,
    pub total_latency_ns: u64,
    pub latency_class_ns: u64,
}

/// Read-only snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub gets: u64,
    pub puts: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Mean latency of gets no tier could serve.
    pub avg_miss_latency_ns: f64,
    pub promotions: u64,
    pub promotion_failures: u64,
    pub demotions: u64,
    pub evictions: u64,
    pub entries: usize,
    pub tiers: Vec<TierStats>,
}

impl CacheStats {
    /// Statistics for one tier.
    pub fn tier(&self, tier: Tier) -> &TierStats {
        &self.tiers[tier.index()]
    }

    /// Fold another cache's snapshot into this one (used by sharded caches).
    ///
    /// Counters add up; rates are recomputed from the summed counters and
    /// latencies are averaged weighted by hits.
    pub fn merge(&mut self, other: &CacheStats) {
        let total_misses = self.misses + other.misses;
        self.avg_miss_latency_ns = if total_misses == 0 {
            0.0
        } else {
            (self.avg_miss_latency_ns * self.misses as f64
                + other.avg_miss_latency_ns * other.misses as f64)
                / total_misses as f64
        };
        self.gets += other.gets;
        self.puts += other.puts;
        self.hits += other.hits;
        self.misses = total_misses;
        self.hit_rate = ratio(self.hits, self.hits + self.misses);
        self.promotions += other.promotions;
        self.promotion_failures += other.promotion_failures;
        self.demotions += other.demotions;
        self.evictions += other.evictions;
        self.entries += other.entries;

        for (mine, theirs) in self.tiers.iter_mut().zip(&other.tiers) {
            let total_hits = mine.hits + theirs.hits;
            mine.avg_latency_ns = if total_hits == 0 {
                0.0
            } else {
                (mine.avg_latency_ns * mine.hits as f64 + theirs.avg_latency_ns * theirs.hits as f64)
                    / total_hits as f64
            };
            mine.entries += theirs.entries;
            mine.capacity += theirs.capacity;
            mine.utilization = if mine.capacity == 0 {
                0.0
            } else {
                mine.entries as f64 / mine.capacity as f64
            };
            mine.hits = total_hits;
            mine.misses += theirs.misses;
            mine.hit_rate = ratio(mine.hits, mine.hits + mine.misses);
            mine.insertions += theirs.insertions;
            mine.evictions += theirs.evictions;
            mine.demotions_in += theirs.demotions_in;
            mine.promotions_in += theirs.promotions_in;
            mine.last_latency_ns = mine.last_latency_ns.max(theirs.last_latency_ns);
            mine.total_latency_ns = mine.total_latency_ns.saturating_add(theirs.total_latency_ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupancy() -> [TierOccupancy; 4] {
        [TierOccupancy {
            entries: 1,
            capacity: 4,
            latency_class_ns: 10,
        }; 4]
    }

    #[test]
    fn test_ratio_zero_over_zero() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 4), 0.75);
    }

    #[test]
    fn test_hit_rate_bounds() {
        let mut stats = StatsAggregator::new(&StatsConfig::default());
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit(Tier::Fast, Duration::from_nanos(100));
        stats.record_miss(Duration::from_nanos(50));
        stats.record_miss(Duration::from_nanos(50));
        stats.record_miss(Duration::from_nanos(50));
        let rate = stats.hit_rate();
        assert!((0.0..=1.0).contains(&rate));
        assert!((rate - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_latency_totals_in_snapshot() {
        let mut stats = StatsAggregator::new(&StatsConfig::default());
        stats.record_hit(Tier::Slow, Duration::from_nanos(100));
        stats.record_hit(Tier::Slow, Duration::from_nanos(50));
        stats.record_miss(Duration::from_nanos(30));
        stats.record_miss(Duration::from_nanos(90));

        let snap = stats.snapshot(&occupancy());
        assert_eq!(snap.tier(Tier::Slow).total_latency_ns, 150);
        assert!((snap.avg_miss_latency_ns - 60.0).abs() < 1e-10);
    }

    #[test]
    fn test_latency_ema() {
        let mut stats = StatsAggregator::new(&StatsConfig {
            latency_ema_decay: 0.5,
        });
        stats.record_hit(Tier::Fastest, Duration::from_nanos(100));
        stats.record_hit(Tier::Fastest, Duration::from_nanos(300));

        let snap = stats.snapshot(&occupancy());
        let t = snap.tier(Tier::Fastest);
        assert_eq!(t.hits, 2);
        assert_eq!(t.last_latency_ns, 300);
        assert!((t.avg_latency_ns - 200.0).abs() < 1e-10);
    }

    #[test]
    fn test_snapshot_totals() {
        let mut stats = StatsAggregator::new(&StatsConfig::default());
        stats.record_put();
        stats.record_get();
        stats.record_insertion(Tier::Fast);
        stats.record_promotion(Tier::Fastest);
        stats.record_demotion(Tier::Slow);
        stats.record_eviction(Tier::Slowest);
        stats.record_tier_miss(Tier::Fastest);

        let snap = stats.snapshot(&occupancy());
        assert_eq!(snap.entries, 4);
        assert_eq!(snap.promotions, 1);
        assert_eq!(snap.demotions, 1);
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.tier(Tier::Fastest).misses, 1);
        assert_eq!(snap.tier(Tier::Fastest).utilization, 0.25);
        assert_eq!(stats.total_requests(), 2);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut a = StatsAggregator::new(&StatsConfig::default());
        a.record_hit(Tier::Fast, Duration::from_nanos(100));
        a.record_miss(Duration::from_nanos(10));
        let mut b = StatsAggregator::new(&StatsConfig::default());
        b.record_hit(Tier::Fast, Duration::from_nanos(300));
        b.record_miss(Duration::from_nanos(40));

        let mut merged = a.snapshot(&occupancy());
        merged.merge(&b.snapshot(&occupancy()));
        assert_eq!(merged.hits, 2);
        assert_eq!(merged.misses, 2);
        assert!((merged.hit_rate - 0.5).abs() < 1e-10);
        assert!((merged.avg_miss_latency_ns - 25.0).abs() < 1e-10);
        assert_eq!(merged.tier(Tier::Fast).total_latency_ns, 400);
        assert_eq!(merged.tier(Tier::Fast).capacity, 8);
        assert!((merged.tier(Tier::Fast).avg_latency_ns - 200.0).abs() < 1e-10);
    }

    #[test]
    fn test_reset_keeps_decay() {
        let mut stats = StatsAggregator::new(&StatsConfig {
            latency_ema_decay: 0.5,
        });
        stats.record_get();
        stats.reset();
        assert_eq!(stats.total_requests(), 0);
        assert_eq!(stats.ema_decay, 0.5);
    }
}
