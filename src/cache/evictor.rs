//! Eviction policy: decides what happens to an entry pushed out of a full tier.
//!
//! Victims are chosen least-recently-used by the tier store. The evictor only
//! decides their fate: entries that have proven valuable (access count above
//! the threshold) are demoted into the next slower tier, the rest are
//! discarded. Nothing below the slowest tier exists, so it always discards.

use crate::cache::store::Victim;
use crate::cache::tier::Tier;
use crate::config::EvictionConfig;

/// What to do with an evicted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Re-insert into the given slower tier.
    Demote(Tier),
    /// Drop the entry.
    Discard,
}

/// The eviction policy engine.
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    /// Whether an entry with this access count is worth keeping.
    pub fn is_valuable(&self, access_count: u32) -> bool {
        access_count > self.config.valuable_access_threshold
    }

    /// Decide the fate of a victim evicted from `tier`.
    pub fn disposition(&self, tier: Tier, victim: &Victim) -> Disposition {
        match tier.demote() {
            Some(next) if self.is_valuable(victim.access_count) => Disposition::Demote(next),
            _ => Disposition::Discard,
        }
    }

    /// Whether a promotion may evict from a full fastest tier.
    pub fn evict_on_promote(&self) -> bool {
        self.config.evict_on_promote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::allocator::PoolAllocator;

    fn victim(access_count: u32) -> Victim {
        let mut pool = PoolAllocator::new(1, 8).unwrap();
        Victim {
            slot: pool.allocate().unwrap(),
            key_hash: 1,
            access_count,
            timestamp: 0,
            payload_len: 2,
        }
    }

    #[test]
    fn test_valuable_entries_are_demoted() {
        let evictor = Evictor::new(EvictionConfig::default());
        assert_eq!(
            evictor.disposition(Tier::Fastest, &victim(3)),
            Disposition::Demote(Tier::Fast)
        );
        assert_eq!(
            evictor.disposition(Tier::Slow, &victim(10)),
            Disposition::Demote(Tier::Slowest)
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let evictor = Evictor::new(EvictionConfig::default());
        assert!(!evictor.is_valuable(2));
        assert_eq!(evictor.disposition(Tier::Fastest, &victim(2)), Disposition::Discard);
    }

    #[test]
    fn test_slowest_tier_always_discards() {
        let evictor = Evictor::new(EvictionConfig::default());
        assert_eq!(
            evictor.disposition(Tier::Slowest, &victim(1_000)),
            Disposition::Discard
        );
    }
}
