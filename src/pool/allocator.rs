//! Fixed-capacity slot pool backing a single cache tier.
//!
//! Every slot is carved out of one contiguous slab reserved at construction.
//! Free slots are threaded through an intrusive free list (`next_free`), so
//! allocate and free are O(1) and never go back to the global allocator.

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("Failed to reserve {bytes} bytes for a pool of {capacity} slots")]
    ReservationFailed { capacity: usize, bytes: usize },

    #[error("Payload of {size} bytes does not fit a {slot_size}-byte slot")]
    PayloadTooLarge { size: usize, slot_size: usize },

    #[error("Slot {0} is not allocated")]
    SlotNotInUse(usize),
}

/// Stable index of a slot within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotHandle(usize);

impl SlotHandle {
    /// Position of the slot in the pool.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Metadata of one pool slot. The bytes live in the pool's slab.
#[derive(Debug, Clone, Default)]
pub struct PoolSlot {
    /// Hash of the key stored in this slot.
    pub key_hash: u64,

    /// Logical time of the last access.
    pub timestamp: i64,

    /// Number of accesses since the entry was stored.
    pub access_count: u32,

    in_use: bool,
    next_free: Option<usize>,
    key_len: u32,
    value_len: u32,
}

impl PoolSlot {
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn key_len(&self) -> usize {
        self.key_len as usize
    }

    pub fn value_len(&self) -> usize {
        self.value_len as usize
    }

    /// Populated bytes (key followed by value).
    pub fn payload_len(&self) -> usize {
        self.key_len() + self.value_len()
    }

    fn reset(&mut self) {
        self.key_hash = 0;
        self.timestamp = 0;
        self.access_count = 0;
        self.in_use = false;
        self.key_len = 0;
        self.value_len = 0;
    }
}

/// A pool of equally sized slots with an intrusive free list.
#[derive(Debug)]
pub struct PoolAllocator {
    /// Bytes per slot.
    slot_size: usize,

    /// Slot metadata, one per slot.
    slots: Vec<PoolSlot>,

    /// Backing slab of `slots.len() * slot_size` bytes.
    data: Vec<u8>,

    /// Head of the free list.
    free_head: Option<usize>,

    /// Number of slots handed out.
    used: usize,

    /// Number of slots on the free list.
    free: usize,
}

impl PoolAllocator {
    /// Reserve a pool of `capacity` slots of `slot_size` bytes each.
    ///
    /// All memory is reserved here; later operations never allocate.
    pub fn new(capacity: usize, slot_size: usize) -> Result<Self, AllocatorError> {
        let bytes = capacity
            .checked_mul(slot_size)
            .ok_or(AllocatorError::ReservationFailed {
                capacity,
                bytes: usize::MAX,
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| AllocatorError::ReservationFailed { capacity, bytes })?;
        data.resize(bytes, 0);

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| AllocatorError::ReservationFailed { capacity, bytes })?;
        slots.extend((0..capacity).map(|i| PoolSlot {
            next_free: (i + 1 < capacity).then_some(i + 1),
            ..Default::default()
        }));

        debug!(capacity, slot_size, bytes, "Reserved slot pool");

        Ok(Self {
            slot_size,
            slots,
            data,
            free_head: (capacity > 0).then_some(0),
            used: 0,
            free: capacity,
        })
    }

    /// Pop the free-list head, or `None` when every slot is in use.
    pub fn allocate(&mut self) -> Option<SlotHandle> {
        let idx = self.free_head?;
        let slot = &mut self.slots[idx];
        self.free_head = slot.next_free.take();
        slot.reset();
        slot.in_use = true;
        self.used += 1;
        self.free -= 1;
        Some(SlotHandle(idx))
    }

    /// Return a slot to the free list. Freeing a free or unknown slot does nothing.
    pub fn free(&mut self, handle: SlotHandle) {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            return;
        };
        if !slot.in_use {
            return;
        }
        slot.reset();
        slot.next_free = self.free_head;
        self.free_head = Some(handle.0);
        self.used -= 1;
        self.free += 1;
    }

    /// Linear scan for the in-use slot holding `key_hash`.
    pub fn find(&self, key_hash: u64) -> Option<SlotHandle> {
        self.slots
            .iter()
            .position(|s| s.in_use && s.key_hash == key_hash)
            .map(SlotHandle)
    }

    /// Free the in-use slot with the oldest timestamp and return it.
    ///
    /// Ties go to the lowest slot index. The slot bytes are left in place
    /// until the next `allocate()` hands the slot out again.
    pub fn evict_lru(&mut self) -> Option<SlotHandle> {
        let mut victim: Option<(usize, i64)> = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.in_use {
                continue;
            }
            if victim.map_or(true, |(_, ts)| slot.timestamp < ts) {
                victim = Some((idx, slot.timestamp));
            }
        }

        let (idx, timestamp) = victim?;
        debug!(slot = idx, timestamp, "Evicting oldest slot");
        let handle = SlotHandle(idx);
        self.free(handle);
        Some(handle)
    }

    /// Copy `key` and `value` into an allocated slot.
    pub fn write(
        &mut self,
        handle: SlotHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), AllocatorError> {
        let size = key.len() + value.len();
        if size > self.slot_size {
            return Err(AllocatorError::PayloadTooLarge {
                size,
                slot_size: self.slot_size,
            });
        }
        let slot = self
            .slots
            .get_mut(handle.0)
            .filter(|s| s.in_use)
            .ok_or(AllocatorError::SlotNotInUse(handle.0))?;
        slot.key_len = key.len() as u32;
        slot.value_len = value.len() as u32;

        let base = handle.0 * self.slot_size;
        self.data[base..base + key.len()].copy_from_slice(key);
        self.data[base + key.len()..base + size].copy_from_slice(value);
        Ok(())
    }

    /// Key and value bytes of an allocated slot.
    pub fn read(&self, handle: SlotHandle) -> Option<(&[u8], &[u8])> {
        let slot = self.slots.get(handle.0).filter(|s| s.in_use)?;
        let base = handle.0 * self.slot_size;
        let key_end = base + slot.key_len();
        let value_end = key_end + slot.value_len();
        Some((&self.data[base..key_end], &self.data[key_end..value_end]))
    }

    /// Metadata of a slot, in use or not.
    pub fn slot(&self, handle: SlotHandle) -> Option<&PoolSlot> {
        self.slots.get(handle.0)
    }

    /// Mutable metadata of an allocated slot.
    pub fn slot_mut(&mut self, handle: SlotHandle) -> Option<&mut PoolSlot> {
        self.slots.get_mut(handle.0).filter(|s| s.in_use)
    }

    /// Iterate over allocated slots in index order.
    pub fn iter_in_use(&self) -> impl Iterator<Item = (SlotHandle, &PoolSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.in_use)
            .map(|(i, s)| (SlotHandle(i), s))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn used_count(&self) -> usize {
        self.used
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn is_exhausted(&self) -> bool {
        self.free_head.is_none()
    }

    /// Fraction of slots in use (0.0 for an empty pool).
    pub fn utilization(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        self.used as f64 / self.slots.len() as f64
    }

    #[cfg(test)]
    pub(crate) fn walk_free_list(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.free_head;
        while let Some(idx) = cursor {
            assert!(!self.slots[idx].in_use, "in-use slot {idx} on free list");
            len += 1;
            cursor = self.slots[idx].next_free;
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocate_and_free() {
        let mut pool = PoolAllocator::new(4, 64).unwrap();

        // Allocate 4 slots (fills it).
        let handles: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.used_count(), 4);
        assert!(pool.is_exhausted());

        // Pool should be full.
        assert!(pool.allocate().is_none());

        // Free one.
        pool.free(handles[0]);
        assert_eq!(pool.used_count(), 3);

        // Can allocate again, and gets the freed slot back.
        assert_eq!(pool.allocate(), Some(handles[0]));
    }

    #[test]
    fn test_double_free_is_noop() {
        let mut pool = PoolAllocator::new(2, 16).unwrap();
        let h = pool.allocate().unwrap();
        pool.free(h);
        assert_eq!(pool.used_count(), 0);
        pool.free(h);
        assert_eq!(pool.used_count(), 0);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.walk_free_list(), 2);
    }

    #[test]
    fn test_free_out_of_range_is_noop() {
        let mut pool = PoolAllocator::new(2, 16).unwrap();
        pool.allocate().unwrap();
        pool.free(SlotHandle(99));
        assert_eq!(pool.used_count(), 1);
    }

    #[test]
    fn test_zero_capacity_pool() {
        let mut pool = PoolAllocator::new(0, 16).unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.utilization(), 0.0);
    }

    #[test]
    fn test_write_and_read() {
        let mut pool = PoolAllocator::new(2, 16).unwrap();
        let h = pool.allocate().unwrap();
        pool.write(h, b"key", b"value").unwrap();

        let (k, v) = pool.read(h).unwrap();
        assert_eq!(k, b"key");
        assert_eq!(v, b"value");
        assert_eq!(pool.slot(h).unwrap().payload_len(), 8);
    }

    #[test]
    fn test_write_rejects_oversized_payload() {
        let mut pool = PoolAllocator::new(1, 8).unwrap();
        let h = pool.allocate().unwrap();
        let err = pool.write(h, b"abcd", b"efghi").unwrap_err();
        assert_eq!(
            err,
            AllocatorError::PayloadTooLarge {
                size: 9,
                slot_size: 8
            }
        );
    }

    #[test]
    fn test_write_to_free_slot_fails() {
        let mut pool = PoolAllocator::new(1, 8).unwrap();
        let h = pool.allocate().unwrap();
        pool.free(h);
        assert_eq!(pool.write(h, b"k", b"v"), Err(AllocatorError::SlotNotInUse(0)));
        assert!(pool.read(h).is_none());
    }

    #[test]
    fn test_free_resets_metadata() {
        let mut pool = PoolAllocator::new(1, 8).unwrap();
        let h = pool.allocate().unwrap();
        {
            let slot = pool.slot_mut(h).unwrap();
            slot.key_hash = 7;
            slot.timestamp = 11;
            slot.access_count = 3;
        }
        pool.free(h);
        let slot = pool.slot(h).unwrap();
        assert_eq!(slot.key_hash, 0);
        assert_eq!(slot.timestamp, 0);
        assert_eq!(slot.access_count, 0);
        assert!(!slot.is_in_use());
    }

    #[test]
    fn test_find_by_hash() {
        let mut pool = PoolAllocator::new(3, 8).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.slot_mut(a).unwrap().key_hash = 10;
        pool.slot_mut(b).unwrap().key_hash = 20;

        assert_eq!(pool.find(20), Some(b));
        assert_eq!(pool.find(30), None);

        pool.free(b);
        assert_eq!(pool.find(20), None);
    }

    #[test]
    fn test_evict_lru_picks_oldest_with_stable_ties() {
        let mut pool = PoolAllocator::new(3, 8).unwrap();
        let handles: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        pool.slot_mut(handles[0]).unwrap().timestamp = 5;
        pool.slot_mut(handles[1]).unwrap().timestamp = 2;
        pool.slot_mut(handles[2]).unwrap().timestamp = 2;

        assert_eq!(pool.evict_lru(), Some(handles[1]));
        assert_eq!(pool.evict_lru(), Some(handles[2]));
        assert_eq!(pool.evict_lru(), Some(handles[0]));
        assert_eq!(pool.evict_lru(), None);
        assert_eq!(pool.used_count(), 0);
    }

    #[test]
    fn test_utilization() {
        let mut pool = PoolAllocator::new(4, 8).unwrap();
        assert_eq!(pool.utilization(), 0.0);

        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert!((pool.utilization() - 0.5).abs() < 1e-10);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Free(usize),
        EvictLru,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Allocate),
            2 => (0usize..32).prop_map(Op::Free),
            1 => Just(Op::EvictLru),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_capacity_invariant_and_no_double_allocation(
            capacity in 0usize..16,
            ops in prop::collection::vec(op_strategy(), 0..128),
        ) {
            let mut pool = PoolAllocator::new(capacity, 8).unwrap();
            let mut live: Vec<SlotHandle> = Vec::new();
            let mut clock = 0i64;

            for op in ops {
                match op {
                    Op::Allocate => {
                        if let Some(h) = pool.allocate() {
                            prop_assert!(!live.contains(&h), "slot {:?} handed out twice", h);
                            clock += 1;
                            pool.slot_mut(h).unwrap().timestamp = clock;
                            live.push(h);
                        } else {
                            prop_assert_eq!(live.len(), capacity);
                        }
                    }
                    Op::Free(i) => {
                        if !live.is_empty() {
                            let h = live.remove(i % live.len());
                            pool.free(h);
                            // Second free must not change anything.
                            let used = pool.used_count();
                            pool.free(h);
                            prop_assert_eq!(pool.used_count(), used);
                        }
                    }
                    Op::EvictLru => {
                        if let Some(h) = pool.evict_lru() {
                            prop_assert!(live.contains(&h));
                            live.retain(|l| *l != h);
                        }
                    }
                }

                prop_assert_eq!(pool.used_count() + pool.free_count(), capacity);
                prop_assert_eq!(pool.used_count(), live.len());
                prop_assert_eq!(pool.walk_free_list(), pool.free_count());
            }
        }
    }
}
