//! Placement policy: picks the tier a new entry is written to.
//!
//! - High-value entries (shared prefixes, reused computations) go straight
//!   to the fastest tier.
//! - During warm-up, placement is conservative: the second tier.
//! - Afterward, the running average access count of resident entries
//!   decides between the fastest, second, and slowest tier.

use crate::cache::tier::Tier;
use crate::config::PlacementConfig;

pub struct PlacementPolicy {
    config: PlacementConfig,
}

impl PlacementPolicy {
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    /// Select the preferred tier for a new entry.
    ///
    /// `total_requests` counts gets and puts seen so far; `average_access` is
    /// the mean access count over all resident entries.
    pub fn select(&self, high_value: bool, total_requests: u64, average_access: f64) -> Tier {
        if high_value {
            return Tier::Fastest;
        }
        if self.in_warmup(total_requests) {
            return Tier::Fast;
        }
        if average_access > self.config.high_frequency_threshold {
            Tier::Fastest
        } else if average_access > self.config.low_frequency_threshold {
            Tier::Fast
        } else {
            Tier::Slowest
        }
    }

    /// Whether placement is still in its warm-up window.
    pub fn in_warmup(&self, total_requests: u64) -> bool {
        total_requests < self.config.warmup_requests
    }
}
