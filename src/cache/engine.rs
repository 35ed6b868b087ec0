//! Tiered cache engine: orchestrates entry movement between tiers.
//!
//! The engine is the central coordinator for the tiered KV cache. It:
//! - Owns one [`TierStore`] per tier, each backed by its own slot pool
//! - Probes tiers fastest to slowest on `get` and promotes hits to the fastest tier
//! - Places new entries according to the placement policy
//! - Evicts the LRU entry of a full tier, demoting it when still valuable
//!
//! Entries are addressed by `(Tier, SlotHandle)`. A move between tiers copies
//! the payload into a freshly allocated slot and only then frees the source
//! slot, so an entry is never resident in two tiers and never lost mid-move.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::cache::error::CacheError;
use crate::cache::evictor::{Disposition, Evictor};
use crate::cache::placement::PlacementPolicy;
use crate::cache::stats::{CacheStats, StatsAggregator, TierOccupancy};
use crate::cache::store::{hash_key, EntryInfo, TierStore, Victim};
use crate::cache::tier::Tier;
use crate::config::Config;
use crate::pool::allocator::SlotHandle;

/// The multi-tier cache.
pub struct TieredCache {
    /// One store per tier, indexed by [`Tier::index`].
    tiers: Vec<TierStore>,

    /// Where new entries go.
    placement: PlacementPolicy,

    /// What happens to evicted entries.
    evictor: Evictor,

    /// Hit/miss/latency counters.
    stats: StatsAggregator,

    /// Logical clock for entry timestamps.
    clock: i64,

    /// Largest payload any enabled tier accepts.
    max_payload: usize,

    /// Configuration.
    config: Arc<Config>,
}

impl TieredCache {
    /// Build a cache, reserving every tier's pool up front.
    pub fn new(config: Arc<Config>) -> Result<Self, CacheError> {
        let tiers = Tier::ALL
            .iter()
            .map(|&tier| TierStore::new(tier, config.tiers.spec(tier)))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            fastest = config.tiers.fastest.capacity,
            fast = config.tiers.fast.capacity,
            slow = config.tiers.slow.capacity,
            slowest = config.tiers.slowest.capacity,
            reserved_bytes = config.tiers.reserved_bytes(),
            "Tiered cache initialized"
        );

        Ok(Self {
            tiers,
            placement: PlacementPolicy::new(config.placement.clone()),
            evictor: Evictor::new(config.eviction.clone()),
            stats: StatsAggregator::new(&config.stats),
            clock: 0,
            max_payload: config.tiers.max_slot_size(),
            config,
        })
    }

    /// Store `key -> value` with default (not high-value) placement.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.put(key, value, false).map(|_| ())
    }

    /// Store `key -> value` and return the tier it now lives in.
    ///
    /// `high_value` entries (e.g. a shared prompt prefix) are placed in the
    /// fastest tier regardless of load. An existing entry is updated in place
    /// when the new payload fits its slot, otherwise it is re-placed and keeps
    /// its access history.
    pub fn put(&mut self, key: &[u8], value: &[u8], high_value: bool) -> Result<Tier, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let size = key.len() + value.len();
        if size > self.max_payload {
            return Err(CacheError::KeyOrValueTooLarge {
                size,
                limit: self.max_payload,
            });
        }

        let key_hash = hash_key(key);
        let now = self.tick();
        self.stats.record_put();

        let mut access_count = 1;
        if let Some(tier) = self.resident_tier(key_hash) {
            let store = &mut self.tiers[tier.index()];
            if store.accepts(size) {
                if let Some(count) = store.overwrite(key_hash, key, value, now)? {
                    debug!(key_hash, tier = %tier, access_count = count, "Updated entry in place");
                    return Ok(tier);
                }
            }
            if let Some(old) = store.remove(key_hash) {
                access_count = old.access_count.saturating_add(1);
            }
        }

        let preferred = self.placement.select(
            high_value,
            self.stats.total_requests(),
            self.average_access(),
        );
        let accepts = |t: &Tier| self.tiers[t.index()].accepts(size);
        let tier = preferred
            .and_slower()
            .find(accepts)
            .or_else(|| Tier::ALL.into_iter().rev().find(accepts))
            .ok_or(CacheError::PoolExhausted { tier: preferred })?;

        self.insert_with_eviction(tier, key_hash, key, value, access_count, now)?;
        debug!(key_hash, tier = %tier, size, "Stored entry");
        Ok(tier)
    }

    /// Look up `key`, probing tiers fastest first.
    ///
    /// A hit below the fastest tier is promoted on a best-effort basis;
    /// a failed promotion never fails the read.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let start = Instant::now();
        let key_hash = hash_key(key);
        let now = self.tick();
        self.stats.record_get();

        for tier in Tier::ALL {
            let store = &mut self.tiers[tier.index()];
            let Some(slot) = store.lookup(key_hash, key) else {
                self.stats.record_tier_miss(tier);
                continue;
            };

            store.touch(key_hash, now);
            let value = store
                .read(slot)
                .map(|(_, v)| Bytes::copy_from_slice(v))?;
            self.stats.record_hit(tier, start.elapsed());

            if tier != Tier::Fastest {
                self.promote(tier, key_hash, now);
            }
            return Some(value);
        }

        self.stats.record_miss(start.elapsed());
        None
    }

    /// Remove `key` from whichever tier holds it.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let key_hash = hash_key(key);
        for store in &mut self.tiers {
            if store.lookup(key_hash, key).is_some() {
                store.remove(key_hash);
                debug!(key_hash, tier = %store.tier(), "Deleted entry");
                return true;
            }
        }
        false
    }

    /// Whether `key` is resident, without counting an access.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.tier_of(key).is_some()
    }

    /// Tier currently holding `key`.
    pub fn tier_of(&self, key: &[u8]) -> Option<Tier> {
        let key_hash = hash_key(key);
        self.tiers
            .iter()
            .find(|s| s.lookup(key_hash, key).is_some())
            .map(|s| s.tier())
    }

    /// Metadata of the entry holding `key`.
    pub fn entry_info(&self, key: &[u8]) -> Option<EntryInfo> {
        let key_hash = hash_key(key);
        self.tiers
            .iter()
            .find(|s| s.lookup(key_hash, key).is_some())
            .and_then(|s| s.info(key_hash))
    }

    /// Total number of entries across all tiers.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|s| s.is_empty())
    }

    /// Number of entries in one tier.
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.tiers[tier.index()].len()
    }

    /// Read-only access to one tier's store.
    pub fn store(&self, tier: Tier) -> &TierStore {
        &self.tiers[tier.index()]
    }

    /// Largest `key.len() + value.len()` accepted by any tier.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        for store in &mut self.tiers {
            store.clear();
        }
        info!("Cache cleared");
    }

    /// Snapshot of hit/miss/latency counters and tier occupancy.
    pub fn stats(&self) -> CacheStats {
        let occupancy = [0, 1, 2, 3].map(|i| {
            let store = &self.tiers[i];
            TierOccupancy {
                entries: store.len(),
                capacity: store.capacity(),
                latency_class_ns: store.latency_class_ns(),
            }
        });
        self.stats.snapshot(&occupancy)
    }

    /// Forget all counters, keeping the entries.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Every resident entry with its payload, tier by tier (fastest first),
    /// least recently used first within a tier.
    pub fn entries(&self) -> impl Iterator<Item = (EntryInfo, &[u8], &[u8])> + '_ {
        self.tiers.iter().flat_map(|s| s.entries())
    }

    /// Place an entry directly into `tier`, evicting there if needed.
    ///
    /// Used when rebuilding a cache from a snapshot or log, where the tier
    /// decision was already made.
    pub fn restore_entry(
        &mut self,
        tier: Tier,
        key: &[u8],
        value: &[u8],
        access_count: u32,
    ) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let key_hash = hash_key(key);
        for store in &mut self.tiers {
            store.remove(key_hash);
        }
        let now = self.tick();
        self.insert_with_eviction(tier, key_hash, key, value, access_count.max(1), now)?;
        Ok(())
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn resident_tier(&self, key_hash: u64) -> Option<Tier> {
        self.tiers
            .iter()
            .find(|s| s.contains_hash(key_hash))
            .map(|s| s.tier())
    }

    /// Mean access count over all resident entries (0.0 when empty).
    fn average_access(&self) -> f64 {
        let entries = self.len();
        if entries == 0 {
            return 0.0;
        }
        let total: u64 = self.tiers.iter().map(|s| s.access_sum()).sum();
        total as f64 / entries as f64
    }

    /// Insert into `tier`; if its pool is exhausted, evict once and retry once.
    fn insert_with_eviction(
        &mut self,
        tier: Tier,
        key_hash: u64,
        key: &[u8],
        value: &[u8],
        access_count: u32,
        now: i64,
    ) -> Result<SlotHandle, CacheError> {
        let idx = tier.index();
        let slot = match self.tiers[idx].insert(key_hash, key, value, access_count, now) {
            Ok(slot) => slot,
            Err(CacheError::PoolExhausted { .. }) => {
                debug!(tier = %tier, "Pool exhausted, evicting LRU entry");
                self.evict_one(tier);
                self.tiers[idx].insert(key_hash, key, value, access_count, now)?
            }
            Err(e) => return Err(e),
        };
        self.stats.record_insertion(tier);
        Ok(slot)
    }

    /// Evict the LRU entry of `tier`, demoting or discarding it.
    ///
    /// Returns false if the tier was empty.
    fn evict_one(&mut self, tier: Tier) -> bool {
        let idx = tier.index();
        let Some(victim) = self.tiers[idx].pop_lru() else {
            return false;
        };

        let kept = match self.evictor.disposition(tier, &victim) {
            Disposition::Demote(next) => {
                // Skip tiers that are disabled or whose slots are too small.
                let target = next
                    .and_slower()
                    .find(|t| self.tiers[t.index()].accepts(victim.payload_len));
                match target {
                    Some(to) => self.demote(tier, to, &victim),
                    None => false,
                }
            }
            Disposition::Discard => false,
        };
        if !kept {
            self.stats.record_eviction(tier);
            debug!(
                tier = %tier,
                key_hash = victim.key_hash,
                access_count = victim.access_count,
                "Discarded evicted entry"
            );
        }

        self.tiers[idx].release(victim.slot);
        true
    }

    /// Copy a popped victim from `from` into the slower tier `to`.
    ///
    /// The destination may itself evict (and cascade further down). The
    /// victim's slot in `from` stays allocated throughout, so its bytes are
    /// intact while the copy happens.
    fn demote(&mut self, from: Tier, to: Tier, victim: &Victim) -> bool {
        debug_assert!(to > from);
        let to_idx = to.index();
        if self.tiers[to_idx].is_full() {
            self.evict_one(to);
        }

        let now = self.tick();
        let (head, tail) = self.tiers.split_at_mut(to_idx);
        let src = &head[from.index()];
        let dst = &mut tail[0];
        let Some((key, value)) = src.read(victim.slot) else {
            return false;
        };

        match dst.insert(victim.key_hash, key, value, victim.access_count, now) {
            Ok(_) => {
                self.stats.record_demotion(to);
                debug!(
                    key_hash = victim.key_hash,
                    from = %from,
                    to = %to,
                    access_count = victim.access_count,
                    "Demoted entry"
                );
                true
            }
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "Demotion failed");
                false
            }
        }
    }

    /// Move a hit from `from` into the fastest tier.
    fn promote(&mut self, from: Tier, key_hash: u64, now: i64) -> bool {
        let dst_tier = Tier::Fastest;
        let Some(info) = self.tiers[from.index()].info(key_hash) else {
            return false;
        };
        let size = info.key_len + info.value_len;

        if !self.tiers[dst_tier.index()].accepts(size) {
            return self.promotion_failed(from, key_hash, "fastest tier cannot hold entry");
        }
        if self.tiers[dst_tier.index()].is_full() {
            if !self.evictor.evict_on_promote() {
                return self.promotion_failed(from, key_hash, "fastest tier full");
            }
            self.evict_one(dst_tier);
            // Eviction may have cascaded into the source tier and moved the entry.
            if !self.tiers[from.index()].contains_hash(key_hash) {
                return self.promotion_failed(from, key_hash, "entry moved during eviction");
            }
        }

        let (head, tail) = self.tiers.split_at_mut(from.index());
        let dst = &mut head[dst_tier.index()];
        let src = &mut tail[0];
        let Some(slot) = src.info(key_hash).map(|i| i.slot) else {
            return false;
        };
        let Some((key, value)) = src.read(slot) else {
            return false;
        };

        match dst.insert(key_hash, key, value, info.access_count, now) {
            Ok(_) => {
                src.remove(key_hash);
                self.stats.record_promotion(dst_tier);
                debug!(key_hash, from = %from, to = %dst_tier, "Promoted entry");
                true
            }
            Err(e) => {
                warn!(from = %from, error = %e, "Promotion failed");
                self.stats.record_promotion_failure();
                false
            }
        }
    }

    fn promotion_failed(&mut self, from: Tier, key_hash: u64, reason: &str) -> bool {
        debug!(key_hash, from = %from, reason, "Promotion skipped");
        self.stats.record_promotion_failure();
        false
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("entries", &self.len())
            .field("clock", &self.clock)
            .field("max_payload", &self.max_payload)
            .finish()
    }
}
