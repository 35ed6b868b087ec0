//! Prometheus metrics for the tiered cache.
//!
//! Metric naming conventions:
//! - All metrics are prefixed with `kv_tier_`.
//! - Per-tier metrics carry a `tier` label (`fastest`, `fast`, `slow`, `slowest`).
//! - Values mirror a [`CacheStats`] snapshot, so every metric is a gauge set
//!   from the latest observation.

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::stats::CacheStats;

/// Gauges exported for one cache (or one merged sharded cache).
pub struct CacheMetrics {
    registry: Registry,

    entries: IntGaugeVec,
    capacity: IntGaugeVec,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    hit_rate: GaugeVec,
    latency_ns: GaugeVec,
    evictions: IntGaugeVec,

    gets: IntGauge,
    puts: IntGauge,
    total_hit_rate: Gauge,
    miss_latency_ns: Gauge,
    promotions: IntGauge,
    promotion_failures: IntGauge,
    demotions: IntGauge,
}

fn tier_int(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn tier_float(registry: &Registry, name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn int(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl CacheMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let total_hit_rate = Gauge::new("kv_tier_hit_rate", "Fraction of gets served by any tier.")?;
        registry.register(Box::new(total_hit_rate.clone()))?;
        let miss_latency_ns = Gauge::new("kv_tier_miss_latency_ns", "Mean latency of gets that missed every tier.")?;
        registry.register(Box::new(miss_latency_ns.clone()))?;

        Ok(Self {
            entries: tier_int(&registry, "kv_tier_entries", "Resident entries per tier.")?,
            capacity: tier_int(&registry, "kv_tier_capacity_slots", "Slot capacity per tier.")?,
            hits: tier_int(&registry, "kv_tier_hits", "Gets served by the tier.")?,
            misses: tier_int(&registry, "kv_tier_misses", "Gets that probed the tier without a match.")?,
            hit_rate: tier_float(&registry, "kv_tier_tier_hit_rate", "Hit rate of lookups probing the tier.")?,
            latency_ns: tier_float(&registry, "kv_tier_latency_ns", "Moving average of hit latency in nanoseconds.")?,
            evictions: tier_int(&registry, "kv_tier_evictions", "Entries discarded from the tier.")?,

            gets: int(&registry, "kv_tier_gets", "Total get operations.")?,
            puts: int(&registry, "kv_tier_puts", "Total put operations.")?,
            total_hit_rate,
            miss_latency_ns,
            promotions: int(&registry, "kv_tier_promotions", "Entries promoted to the fastest tier.")?,
            promotion_failures: int(&registry, "kv_tier_promotion_failures", "Promotions skipped or failed.")?,
            demotions: int(&registry, "kv_tier_demotions", "Entries demoted to a slower tier.")?,

            registry,
        })
    }

    /// Update every gauge from a stats snapshot.
    pub fn observe(&self, stats: &CacheStats) {
        for t in &stats.tiers {
            let label = t.tier.to_string();
            let labels: &[&str] = &[label.as_str()];
            self.entries.with_label_values(labels).set(t.entries as i64);
            self.capacity.with_label_values(labels).set(t.capacity as i64);
            self.hits.with_label_values(labels).set(t.hits as i64);
            self.misses.with_label_values(labels).set(t.misses as i64);
            self.hit_rate.with_label_values(labels).set(t.hit_rate);
            self.latency_ns.with_label_values(labels).set(t.avg_latency_ns);
            self.evictions.with_label_values(labels).set(t.evictions as i64);
        }

        self.gets.set(stats.gets as i64);
        self.puts.set(stats.puts as i64);
        self.total_hit_rate.set(stats.hit_rate);
        self.miss_latency_ns.set(stats.avg_miss_latency_ns);
        self.promotions.set(stats.promotions as i64);
        self.promotion_failures.set(stats.promotion_failures as i64);
        self.demotions.set(stats.demotions as i64);
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
