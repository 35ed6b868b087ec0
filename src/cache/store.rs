//! Tier store: one pool, a hash index into it, and the tier's LRU order.
//!
//! Invariants kept by every method:
//! - every hash in `index` points at an in-use slot holding that hash,
//! - every in-use slot's hash appears exactly once in `lru`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::Hasher;

use tracing::debug;

use crate::cache::error::CacheError;
use crate::cache::tier::Tier;
use crate::config::TierSpec;
use crate::pool::allocator::{PoolAllocator, SlotHandle};

/// Hash used to index keys in every tier and in the SoA layout.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(key);
    hasher.finish()
}

/// Read-only view of a resident entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub key_hash: u64,
    pub tier: Tier,
    pub slot: SlotHandle,
    pub access_count: u32,
    pub timestamp: i64,
    pub key_len: usize,
    pub value_len: usize,
    pub valid: bool,
}

/// An entry taken off the LRU queue. Its slot stays allocated until
/// [`TierStore::release`] so the payload can be copied elsewhere first.
#[derive(Debug, Clone, Copy)]
pub struct Victim {
    pub slot: SlotHandle,
    pub key_hash: u64,
    pub access_count: u32,
    pub timestamp: i64,
    pub payload_len: usize,
}

/// Hash-indexed entries of a single tier.
#[derive(Debug)]
pub struct TierStore {
    tier: Tier,
    latency_class_ns: u64,
    pool: PoolAllocator,
    index: HashMap<u64, SlotHandle>,
    /// Oldest first.
    lru: VecDeque<u64>,
    /// Sum of access counts of resident entries.
    access_sum: u64,
}

impl TierStore {
    pub fn new(tier: Tier, spec: &TierSpec) -> Result<Self, CacheError> {
        let pool = PoolAllocator::new(spec.capacity, spec.slot_size)?;
        Ok(Self {
            tier,
            latency_class_ns: spec.latency_class_ns,
            pool,
            index: HashMap::with_capacity(spec.capacity),
            lru: VecDeque::with_capacity(spec.capacity),
            access_sum: 0,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn latency_class_ns(&self) -> u64 {
        self.latency_class_ns
    }

    pub fn pool(&self) -> &PoolAllocator {
        &self.pool
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn slot_size(&self) -> usize {
        self.pool.slot_size()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pool.is_exhausted()
    }

    /// Whether a payload of `size` bytes can ever live in this tier.
    pub fn accepts(&self, size: usize) -> bool {
        self.capacity() > 0 && size <= self.slot_size()
    }

    pub fn access_sum(&self) -> u64 {
        self.access_sum
    }

    /// Slot holding `key`, checking the stored key bytes against hash collisions.
    pub fn lookup(&self, key_hash: u64, key: &[u8]) -> Option<SlotHandle> {
        let slot = *self.index.get(&key_hash)?;
        let (stored, _) = self.pool.read(slot)?;
        (stored == key).then_some(slot)
    }

    pub fn contains_hash(&self, key_hash: u64) -> bool {
        self.index.contains_key(&key_hash)
    }

    pub fn read(&self, slot: SlotHandle) -> Option<(&[u8], &[u8])> {
        self.pool.read(slot)
    }

    pub fn info(&self, key_hash: u64) -> Option<EntryInfo> {
        let slot = *self.index.get(&key_hash)?;
        self.info_for_slot(slot)
    }

    fn info_for_slot(&self, slot: SlotHandle) -> Option<EntryInfo> {
        let meta = self.pool.slot(slot).filter(|s| s.is_in_use())?;
        Some(EntryInfo {
            key_hash: meta.key_hash,
            tier: self.tier,
            slot,
            access_count: meta.access_count,
            timestamp: meta.timestamp,
            key_len: meta.key_len(),
            value_len: meta.value_len(),
            valid: true,
        })
    }

    /// Store a new entry as most recently used.
    ///
    /// Fails with `PoolExhausted` when no slot is free; the caller decides
    /// whether to evict and retry.
    pub fn insert(
        &mut self,
        key_hash: u64,
        key: &[u8],
        value: &[u8],
        access_count: u32,
        now: i64,
    ) -> Result<SlotHandle, CacheError> {
        let size = key.len() + value.len();
        if size > self.slot_size() {
            return Err(CacheError::KeyOrValueTooLarge {
                size,
                limit: self.slot_size(),
            });
        }
        debug_assert!(!self.index.contains_key(&key_hash));

        let slot = self
            .pool
            .allocate()
            .ok_or(CacheError::PoolExhausted { tier: self.tier })?;
        if let Err(e) = self.pool.write(slot, key, value) {
            self.pool.free(slot);
            return Err(e.into());
        }
        if let Some(meta) = self.pool.slot_mut(slot) {
            meta.key_hash = key_hash;
            meta.access_count = access_count;
            meta.timestamp = now;
        }

        self.index.insert(key_hash, slot);
        self.lru.push_back(key_hash);
        self.access_sum += access_count as u64;
        Ok(slot)
    }

    /// Replace the payload of a resident entry in place and touch it.
    ///
    /// Returns the new access count, or `None` if the hash is not resident.
    pub fn overwrite(
        &mut self,
        key_hash: u64,
        key: &[u8],
        value: &[u8],
        now: i64,
    ) -> Result<Option<u32>, CacheError> {
        let Some(&slot) = self.index.get(&key_hash) else {
            return Ok(None);
        };
        self.pool.write(slot, key, value)?;
        Ok(self.touch(key_hash, now))
    }

    /// Record an access: bump the count, refresh the timestamp, move to MRU.
    pub fn touch(&mut self, key_hash: u64, now: i64) -> Option<u32> {
        let slot = *self.index.get(&key_hash)?;
        let meta = self.pool.slot_mut(slot)?;
        meta.access_count = meta.access_count.saturating_add(1);
        meta.timestamp = now;
        let count = meta.access_count;
        self.access_sum += 1;

        if let Some(pos) = self.lru.iter().position(|h| *h == key_hash) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key_hash);
        Some(count)
    }

    /// Remove an entry and free its slot.
    pub fn remove(&mut self, key_hash: u64) -> Option<Victim> {
        let slot = self.index.remove(&key_hash)?;
        if let Some(pos) = self.lru.iter().position(|h| *h == key_hash) {
            self.lru.remove(pos);
        }
        let victim = self.detach(slot, key_hash);
        self.pool.free(slot);
        Some(victim)
    }

    /// Take the least recently used entry off the index and LRU queue.
    ///
    /// The slot stays allocated; call [`TierStore::release`] once its payload
    /// has been copied or discarded.
    pub fn pop_lru(&mut self) -> Option<Victim> {
        while let Some(key_hash) = self.lru.pop_front() {
            let Some(slot) = self.index.remove(&key_hash) else {
                continue;
            };
            let victim = self.detach(slot, key_hash);
            debug!(
                tier = %self.tier,
                key_hash,
                slot = slot.index(),
                access_count = victim.access_count,
                "Popped LRU entry"
            );
            return Some(victim);
        }
        None
    }

    /// Return a popped victim's slot to the pool.
    pub fn release(&mut self, slot: SlotHandle) {
        self.pool.free(slot);
    }

    fn detach(&mut self, slot: SlotHandle, key_hash: u64) -> Victim {
        let (access_count, timestamp, payload_len) = self
            .pool
            .slot(slot)
            .map(|m| (m.access_count, m.timestamp, m.payload_len()))
            .unwrap_or_default();
        self.access_sum = self.access_sum.saturating_sub(access_count as u64);
        Victim {
            slot,
            key_hash,
            access_count,
            timestamp,
            payload_len,
        }
    }

    /// Resident entries with their payloads, least recently used first.
    pub fn entries(&self) -> impl Iterator<Item = (EntryInfo, &[u8], &[u8])> + '_ {
        self.lru.iter().filter_map(move |hash| {
            let slot = *self.index.get(hash)?;
            let info = self.info_for_slot(slot)?;
            let (key, value) = self.pool.read(slot)?;
            Some((info, key, value))
        })
    }

    /// Free every entry.
    pub fn clear(&mut self) {
        for (_, slot) in self.index.drain() {
            self.pool.free(slot);
        }
        self.lru.clear();
        self.access_sum = 0;
    }

    #[cfg(test)]
    pub(crate) fn lru_order(&self) -> Vec<u64> {
        self.lru.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> TierStore {
        TierStore::new(
            Tier::Fast,
            &TierSpec {
                capacity,
                slot_size: 32,
                latency_class_ns: 10,
            },
        )
        .unwrap()
    }

    fn put(store: &mut TierStore, key: &[u8], now: i64) -> SlotHandle {
        store.insert(hash_key(key), key, b"v", 1, now).unwrap()
    }

    #[test]
    fn test_hash_key_is_deterministic() {
        assert_eq!(hash_key(b"abc"), hash_key(b"abc"));
        assert_ne!(hash_key(b"abc"), hash_key(b"abd"));
    }

    #[test]
    fn test_insert_lookup_and_lru_order() {
        let mut s = store(4);
        put(&mut s, b"a", 1);
        put(&mut s, b"b", 2);
        put(&mut s, b"c", 3);

        assert!(s.lookup(hash_key(b"b"), b"b").is_some());
        assert!(s.lookup(hash_key(b"b"), b"x").is_none());
        assert_eq!(
            s.lru_order(),
            vec![hash_key(b"a"), hash_key(b"b"), hash_key(b"c")]
        );

        s.touch(hash_key(b"a"), 4);
        assert_eq!(
            s.lru_order(),
            vec![hash_key(b"b"), hash_key(b"c"), hash_key(b"a")]
        );
        assert_eq!(s.info(hash_key(b"a")).unwrap().access_count, 2);
        assert_eq!(s.access_sum(), 4);
    }

    #[test]
    fn test_insert_into_full_store_reports_exhaustion() {
        let mut s = store(1);
        put(&mut s, b"a", 1);
        let err = s.insert(hash_key(b"b"), b"b", b"v", 1, 2).unwrap_err();
        assert_eq!(err, CacheError::PoolExhausted { tier: Tier::Fast });
    }

    #[test]
    fn test_insert_rejects_oversized_payload() {
        let mut s = store(1);
        let err = s.insert(hash_key(b"k"), b"k", &[0u8; 40], 1, 1).unwrap_err();
        assert_eq!(err, CacheError::KeyOrValueTooLarge { size: 41, limit: 32 });
        assert_eq!(s.pool().used_count(), 0);
    }

    #[test]
    fn test_pop_lru_keeps_slot_until_release() {
        let mut s = store(2);
        put(&mut s, b"a", 1);
        put(&mut s, b"b", 2);

        let victim = s.pop_lru().unwrap();
        assert_eq!(victim.key_hash, hash_key(b"a"));
        assert_eq!(s.len(), 1);
        assert_eq!(s.pool().used_count(), 2);
        assert_eq!(s.read(victim.slot).unwrap().0, b"a");

        s.release(victim.slot);
        assert_eq!(s.pool().used_count(), 1);
        assert_eq!(s.access_sum(), 1);
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut s = store(2);
        put(&mut s, b"a", 1);
        let victim = s.remove(hash_key(b"a")).unwrap();
        assert_eq!(victim.access_count, 1);
        assert!(s.is_empty());
        assert_eq!(s.pool().used_count(), 0);
        assert!(s.lru_order().is_empty());
        assert!(s.remove(hash_key(b"a")).is_none());
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut s = store(1);
        let slot = put(&mut s, b"a", 1);
        let count = s.overwrite(hash_key(b"a"), b"a", b"new", 2).unwrap();
        assert_eq!(count, Some(2));
        assert_eq!(s.overwrite(hash_key(b"z"), b"z", b"v", 3).unwrap(), None);
        assert_eq!(s.read(slot).unwrap().1, b"new");
    }

    #[test]
    fn test_entries_in_lru_order_and_clear() {
        let mut s = store(3);
        put(&mut s, b"a", 1);
        put(&mut s, b"b", 2);
        s.touch(hash_key(b"a"), 3);

        let keys: Vec<Vec<u8>> = s.entries().map(|(_, k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);

        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.pool().used_count(), 0);
        assert_eq!(s.access_sum(), 0);
    }
}
