//! Prefetching: accepts batches of SoA key rows plus an access-pattern hint
//! and marks them for proactive loading into a tier.
//!
//! The actual hardware prefetch is a hook that does nothing yet. What the
//! prefetcher does track is how many rows were requested, per target tier and
//! per pattern, and how effective those requests were (hits reported back by
//! the caller over total prefetches).
//!
//! Pattern entry points:
//! 1. Sequential: rows following a position
//! 2. Random: caller-chosen rows
//! 3. Temporal: most recently touched rows
//! 4. Spatial: rows around a center
//! 5. Tier-based: every active row assigned to a tier
//! 6. Compression-based: rows whose value is stored compressed
//! 7. P2P-based: rows shared with a peer

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::stats::ratio;
use crate::cache::tier::Tier;
use crate::config::PrefetchConfig;
use crate::soa::layout::{AccessPattern, SoaLayout};

/// Prefetch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchStats {
    /// Rows accepted across all calls.
    pub total_prefetches: u64,
    /// Rows accepted per target tier, fastest first.
    pub per_tier: [u64; 4],
    pub tier_prefetches: u64,
    pub compression_prefetches: u64,
    pub p2p_prefetches: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
}

impl PrefetchStats {
    /// Hits over total prefetches; 0.0 when nothing was prefetched.
    ///
    /// Hits are not attributed to a specific earlier prefetch, so this is an
    /// approximation.
    pub fn effectiveness(&self) -> f64 {
        ratio(self.prefetch_hits, self.total_prefetches)
    }
}

/// The prefetcher issues prefetch requests against an SoA layout.
pub struct Prefetcher {
    config: PrefetchConfig,
    stats: PrefetchStats,
    /// Reused index buffer for the pattern entry points.
    scratch: Vec<usize>,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        let scratch = Vec::with_capacity(config.max_batch);
        Self {
            config,
            stats: PrefetchStats::default(),
            scratch,
        }
    }

    pub fn stats(&self) -> &PrefetchStats {
        &self.stats
    }

    pub fn effectiveness(&self) -> f64 {
        self.stats.effectiveness()
    }

    /// A previously prefetched row was used.
    pub fn record_hit(&mut self) {
        self.stats.prefetch_hits += 1;
    }

    /// A lookup missed what was prefetched.
    pub fn record_miss(&mut self) {
        self.stats.prefetch_misses += 1;
    }

    pub fn reset_stats(&mut self) {
        self.stats = PrefetchStats::default();
    }

    pub fn prefetch_gpu_data(&mut self, layout: &mut SoaLayout, indices: &[usize], hint: AccessPattern) -> usize {
        self.prefetch_into(layout, indices, hint, Tier::Fastest)
    }

    pub fn prefetch_cpu_data(&mut self, layout: &mut SoaLayout, indices: &[usize], hint: AccessPattern) -> usize {
        self.prefetch_into(layout, indices, hint, Tier::Fast)
    }

    pub fn prefetch_nvme_data(&mut self, layout: &mut SoaLayout, indices: &[usize], hint: AccessPattern) -> usize {
        self.prefetch_into(layout, indices, hint, Tier::Slow)
    }

    pub fn prefetch_disk_data(&mut self, layout: &mut SoaLayout, indices: &[usize], hint: AccessPattern) -> usize {
        self.prefetch_into(layout, indices, hint, Tier::Slowest)
    }

    /// Prefetch `count` rows starting at `start`, plus `prefetch_ahead` more.
    pub fn sequential(&mut self, layout: &mut SoaLayout, start: usize, count: usize) -> usize {
        let end = start
            .saturating_add(count)
            .saturating_add(self.config.prefetch_ahead)
            .min(layout.key_count());
        self.with_scratch(layout, AccessPattern::Sequential, Tier::Fast, |_, rows| {
            rows.extend(start..end);
        })
    }

    /// Prefetch arbitrary rows.
    pub fn random(&mut self, layout: &mut SoaLayout, indices: &[usize]) -> usize {
        self.prefetch_into(layout, indices, AccessPattern::Random, Tier::Fast)
    }

    /// Prefetch the most recently touched active rows into the fastest tier.
    pub fn temporal(&mut self, layout: &mut SoaLayout) -> usize {
        let take = self.config.prefetch_ahead;
        self.with_scratch(layout, AccessPattern::Temporal, Tier::Fastest, |layout, rows| {
            rows.extend((0..layout.key_count()).filter(|&i| layout.is_key_active(i)));
            rows.sort_by_key(|&i| std::cmp::Reverse(layout.key_timestamp(i).unwrap_or(0)));
            rows.truncate(take);
        })
    }

    /// Prefetch rows within `spatial_radius` of `center`.
    pub fn spatial(&mut self, layout: &mut SoaLayout, center: usize) -> usize {
        let radius = self.config.spatial_radius;
        let start = center.saturating_sub(radius);
        let end = center.saturating_add(radius).saturating_add(1).min(layout.key_count());
        self.with_scratch(layout, AccessPattern::Spatial, Tier::Fast, |_, rows| {
            rows.extend(start..end);
        })
    }

    /// Prefetch every active row currently assigned to `from` into the tier above it.
    pub fn tier_based(&mut self, layout: &mut SoaLayout, from: Tier) -> usize {
        let target = from.promote().unwrap_or(Tier::Fastest);
        let accepted = self.with_scratch(layout, AccessPattern::TierBased, target, |layout, rows| {
            rows.extend(layout.keys_in_tier(from));
        });
        self.stats.tier_prefetches += accepted as u64;
        accepted
    }

    /// Prefetch the rows among `indices` whose linked value is compressed.
    pub fn compression_based(&mut self, layout: &mut SoaLayout, indices: &[usize]) -> usize {
        let accepted = self.with_scratch(layout, AccessPattern::CompressionBased, Tier::Fast, |layout, rows| {
            rows.extend(indices.iter().copied().filter(|&i| {
                layout
                    .value_for_key(i)
                    .is_some_and(|v| layout.is_value_compressed(v))
            }));
        });
        self.stats.compression_prefetches += accepted as u64;
        accepted
    }

    /// Prefetch rows requested by a peer.
    pub fn p2p_based(&mut self, layout: &mut SoaLayout, indices: &[usize]) -> usize {
        let accepted = self.prefetch_into(layout, indices, AccessPattern::P2pBased, Tier::Fast);
        self.stats.p2p_prefetches += accepted as u64;
        accepted
    }

    /// Fill the scratch buffer with `select`, then prefetch what it chose.
    fn with_scratch(
        &mut self,
        layout: &mut SoaLayout,
        pattern: AccessPattern,
        target: Tier,
        select: impl FnOnce(&SoaLayout, &mut Vec<usize>),
    ) -> usize {
        let mut rows = mem::take(&mut self.scratch);
        rows.clear();
        select(&*layout, &mut rows);
        let accepted = self.prefetch_into(layout, &rows, pattern, target);
        self.scratch = rows;
        accepted
    }

    /// Validate each row, count it, record a request row and call the hook.
    fn prefetch_into(
        &mut self,
        layout: &mut SoaLayout,
        indices: &[usize],
        pattern: AccessPattern,
        target: Tier,
    ) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut accepted = 0;
        for &index in indices.iter().take(self.config.max_batch) {
            if !layout.is_key_active(index) {
                continue;
            }
            self.hint(layout, index, target);
            accepted += 1;

            // Closer rows in the batch get higher priority.
            let priority = 100.0 - accepted as f32;
            if let Ok(row) = layout.add_prefetch(index, pattern, target, priority) {
                layout.mark_prefetch_issued(row);
            }
        }

        self.stats.total_prefetches += accepted as u64;
        self.stats.per_tier[target.index()] += accepted as u64;
        debug!(pattern = %pattern, tier = %target, requested = indices.len(), accepted, "Prefetch issued");
        accepted
    }

    /// Per-row prefetch hook. Hardware prefetch instructions would go here.
    #[inline]
    fn hint(&self, _layout: &SoaLayout, _index: usize, _target: Tier) {}
}
