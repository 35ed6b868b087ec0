//! Struct-of-arrays cache layout.
//!
//! Each category (keys, values, metadata, stats rows, prefetch requests) is a
//! set of parallel columns with its own append cursor. Row `i` of a category
//! is described by index `i` of every column in that category. Rows are never
//! reclaimed: the layout is filled by a batch ingest, queried, then `reset`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::error::CacheError;
use crate::cache::store::hash_key;
use crate::cache::tier::Tier;
use crate::config::SoaConfig;
use crate::pool::allocator::AllocatorError;

/// Access-pattern hint attached to a prefetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    Sequential,
    Random,
    Temporal,
    Spatial,
    TierBased,
    CompressionBased,
    P2pBased,
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessPattern::Sequential => "sequential",
            AccessPattern::Random => "random",
            AccessPattern::Temporal => "temporal",
            AccessPattern::Spatial => "spatial",
            AccessPattern::TierBased => "tier_based",
            AccessPattern::CompressionBased => "compression_based",
            AccessPattern::P2pBased => "p2p_based",
        };
        f.write_str(name)
    }
}

/// One metadata row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataRow {
    pub key_index: usize,
    pub value_index: usize,
    pub flags: u32,
    pub created: i64,
    pub priority: f32,
}

/// One stats row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsRow {
    pub hits: u64,
    pub misses: u64,
    pub latency_ns: u64,
}

/// One prefetch request row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefetchRequest {
    pub key_index: usize,
    pub pattern: AccessPattern,
    pub tier: Tier,
    pub priority: f32,
    pub issued: bool,
}

/// Zeroed byte slab of `rows * row_size`, reserved without aborting on failure.
fn reserve_slab(rows: usize, row_size: usize) -> Result<Vec<u8>, CacheError> {
    let bytes = rows.saturating_mul(row_size);
    let mut slab = Vec::new();
    slab.try_reserve_exact(bytes)
        .map_err(|_| AllocatorError::ReservationFailed {
            capacity: rows,
            bytes,
        })?;
    slab.resize(bytes, 0);
    Ok(slab)
}

fn full(category: &'static str, capacity: usize) -> CacheError {
    CacheError::CapacityExceeded { category, capacity }
}

/// Column-oriented cache layout with fixed per-category capacities.
pub struct SoaLayout {
    max_key_size: usize,
    max_value_size: usize,
    clock: i64,

    // keys
    max_keys: usize,
    key_bytes: Vec<u8>,
    key_sizes: Vec<u32>,
    pub(super) key_hashes: Vec<u64>,
    pub(super) key_active: Vec<bool>,
    key_tiers: Vec<Tier>,
    key_timestamps: Vec<i64>,
    key_access_counts: Vec<u32>,

    // values
    max_values: usize,
    value_bytes: Vec<u8>,
    value_sizes: Vec<u32>,
    value_active: Vec<bool>,
    value_tiers: Vec<Tier>,
    value_compressed: Vec<bool>,

    // metadata
    max_metadata: usize,
    meta_key_index: Vec<u32>,
    meta_value_index: Vec<u32>,
    meta_flags: Vec<u32>,
    meta_created: Vec<i64>,
    meta_priority: Vec<f32>,

    // stats rows
    max_stats: usize,
    stat_hits: Vec<u64>,
    stat_misses: Vec<u64>,
    stat_latency_ns: Vec<u64>,

    // prefetch requests
    max_prefetch: usize,
    prefetch_key_index: Vec<u32>,
    prefetch_pattern: Vec<AccessPattern>,
    prefetch_tier: Vec<Tier>,
    prefetch_priority: Vec<f32>,
    prefetch_issued: Vec<bool>,

    // tier bookkeeping
    tier_usage: [f64; 4],
    tier_latency_ns: [u64; 4],
    tier_hit_rate: [f64; 4],
}

impl SoaLayout {
    pub fn new(config: &SoaConfig) -> Result<Self, CacheError> {
        let key_bytes = reserve_slab(config.max_keys, config.max_key_size)?;
        let value_bytes = reserve_slab(config.max_values, config.max_value_size)?;

        debug!(
            max_keys = config.max_keys,
            max_values = config.max_values,
            bytes = key_bytes.len() + value_bytes.len(),
            "SoA layout reserved"
        );

        Ok(Self {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
            clock: 0,

            max_keys: config.max_keys,
            key_bytes,
            key_sizes: Vec::with_capacity(config.max_keys),
            key_hashes: Vec::with_capacity(config.max_keys),
            key_active: Vec::with_capacity(config.max_keys),
            key_tiers: Vec::with_capacity(config.max_keys),
            key_timestamps: Vec::with_capacity(config.max_keys),
            key_access_counts: Vec::with_capacity(config.max_keys),

            max_values: config.max_values,
            value_bytes,
            value_sizes: Vec::with_capacity(config.max_values),
            value_active: Vec::with_capacity(config.max_values),
            value_tiers: Vec::with_capacity(config.max_values),
            value_compressed: Vec::with_capacity(config.max_values),

            max_metadata: config.max_metadata,
            meta_key_index: Vec::with_capacity(config.max_metadata),
            meta_value_index: Vec::with_capacity(config.max_metadata),
            meta_flags: Vec::with_capacity(config.max_metadata),
            meta_created: Vec::with_capacity(config.max_metadata),
            meta_priority: Vec::with_capacity(config.max_metadata),

            max_stats: config.max_stats,
            stat_hits: Vec::with_capacity(config.max_stats),
            stat_misses: Vec::with_capacity(config.max_stats),
            stat_latency_ns: Vec::with_capacity(config.max_stats),

            max_prefetch: config.max_prefetch,
            prefetch_key_index: Vec::with_capacity(config.max_prefetch),
            prefetch_pattern: Vec::with_capacity(config.max_prefetch),
            prefetch_tier: Vec::with_capacity(config.max_prefetch),
            prefetch_priority: Vec::with_capacity(config.max_prefetch),
            prefetch_issued: Vec::with_capacity(config.max_prefetch),

            tier_usage: [0.0; 4],
            tier_latency_ns: [0; 4],
            tier_hit_rate: [0.0; 4],
        })
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    // -- appends ------------------------------------------------------------

    /// Append a key row and return its index.
    pub fn add_key(&mut self, key: &[u8], tier: Tier) -> Result<usize, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if key.len() > self.max_key_size {
            return Err(CacheError::KeyOrValueTooLarge {
                size: key.len(),
                limit: self.max_key_size,
            });
        }
        let row = self.key_count();
        if row >= self.max_keys {
            return Err(full("keys", self.max_keys));
        }

        let start = row * self.max_key_size;
        self.key_bytes[start..start + key.len()].copy_from_slice(key);
        let now = self.tick();
        self.key_sizes.push(key.len() as u32);
        self.key_hashes.push(hash_key(key));
        self.key_active.push(true);
        self.key_tiers.push(tier);
        self.key_timestamps.push(now);
        self.key_access_counts.push(0);
        Ok(row)
    }

    /// Append a value row and return its index.
    pub fn add_value(&mut self, value: &[u8], tier: Tier, compressed: bool) -> Result<usize, CacheError> {
        if value.len() > self.max_value_size {
            return Err(CacheError::KeyOrValueTooLarge {
                size: value.len(),
                limit: self.max_value_size,
            });
        }
        let row = self.value_count();
        if row >= self.max_values {
            return Err(full("values", self.max_values));
        }

        let start = row * self.max_value_size;
        self.value_bytes[start..start + value.len()].copy_from_slice(value);
        self.value_sizes.push(value.len() as u32);
        self.value_active.push(true);
        self.value_tiers.push(tier);
        self.value_compressed.push(compressed);
        Ok(row)
    }

    /// Append a metadata row linking a key row to a value row.
    pub fn add_metadata(
        &mut self,
        key_index: usize,
        value_index: usize,
        flags: u32,
        priority: f32,
    ) -> Result<usize, CacheError> {
        let row = self.metadata_count();
        if row >= self.max_metadata {
            return Err(full("metadata", self.max_metadata));
        }
        let now = self.tick();
        self.meta_key_index.push(key_index as u32);
        self.meta_value_index.push(value_index as u32);
        self.meta_flags.push(flags);
        self.meta_created.push(now);
        self.meta_priority.push(priority);
        Ok(row)
    }

    pub fn add_stats(&mut self, hits: u64, misses: u64, latency_ns: u64) -> Result<usize, CacheError> {
        let row = self.stats_count();
        if row >= self.max_stats {
            return Err(full("stats", self.max_stats));
        }
        self.stat_hits.push(hits);
        self.stat_misses.push(misses);
        self.stat_latency_ns.push(latency_ns);
        Ok(row)
    }

    pub fn add_prefetch(
        &mut self,
        key_index: usize,
        pattern: AccessPattern,
        tier: Tier,
        priority: f32,
    ) -> Result<usize, CacheError> {
        let row = self.prefetch_count();
        if row >= self.max_prefetch {
            return Err(full("prefetch", self.max_prefetch));
        }
        self.prefetch_key_index.push(key_index as u32);
        self.prefetch_pattern.push(pattern);
        self.prefetch_tier.push(tier);
        self.prefetch_priority.push(priority);
        self.prefetch_issued.push(false);
        Ok(row)
    }

    /// Combined append of a key, its value and the metadata row tying them.
    ///
    /// Returns the key row index. Nothing is appended unless all three fit.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8], tier: Tier) -> Result<usize, CacheError> {
        if self.key_count() >= self.max_keys {
            return Err(full("keys", self.max_keys));
        }
        if self.value_count() >= self.max_values {
            return Err(full("values", self.max_values));
        }
        if self.metadata_count() >= self.max_metadata {
            return Err(full("metadata", self.max_metadata));
        }
        if value.len() > self.max_value_size {
            return Err(CacheError::KeyOrValueTooLarge {
                size: value.len(),
                limit: self.max_value_size,
            });
        }
        let key_index = self.add_key(key, tier)?;
        let value_index = self.add_value(value, tier, false)?;
        self.add_metadata(key_index, value_index, 0, 0.0)?;
        Ok(key_index)
    }

    // -- row access ---------------------------------------------------------

    pub fn key_count(&self) -> usize {
        self.key_hashes.len()
    }

    pub fn value_count(&self) -> usize {
        self.value_sizes.len()
    }

    pub fn metadata_count(&self) -> usize {
        self.meta_key_index.len()
    }

    pub fn stats_count(&self) -> usize {
        self.stat_hits.len()
    }

    pub fn prefetch_count(&self) -> usize {
        self.prefetch_key_index.len()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn key(&self, index: usize) -> Option<&[u8]> {
        let len = *self.key_sizes.get(index)? as usize;
        let start = index * self.max_key_size;
        Some(&self.key_bytes[start..start + len])
    }

    pub fn key_hash(&self, index: usize) -> Option<u64> {
        self.key_hashes.get(index).copied()
    }

    pub fn key_tier(&self, index: usize) -> Option<Tier> {
        self.key_tiers.get(index).copied()
    }

    pub fn key_timestamp(&self, index: usize) -> Option<i64> {
        self.key_timestamps.get(index).copied()
    }

    pub fn key_access_count(&self, index: usize) -> Option<u32> {
        self.key_access_counts.get(index).copied()
    }

    pub fn is_key_active(&self, index: usize) -> bool {
        self.key_active.get(index).copied().unwrap_or(false)
    }

    /// Record an access to a key row.
    pub fn touch_key(&mut self, index: usize) -> bool {
        if !self.is_key_active(index) {
            return false;
        }
        let now = self.tick();
        self.key_timestamps[index] = now;
        self.key_access_counts[index] = self.key_access_counts[index].saturating_add(1);
        true
    }

    /// Soft-delete a key row. Its slot is not reused until `reset`.
    pub fn deactivate_key(&mut self, index: usize) -> bool {
        match self.key_active.get_mut(index) {
            Some(active) if *active => {
                *active = false;
                true
            }
            _ => false,
        }
    }

    pub fn value(&self, index: usize) -> Option<&[u8]> {
        let len = *self.value_sizes.get(index)? as usize;
        let start = index * self.max_value_size;
        Some(&self.value_bytes[start..start + len])
    }

    pub fn value_size(&self, index: usize) -> Option<usize> {
        self.value_sizes.get(index).map(|&s| s as usize)
    }

    pub fn value_tier(&self, index: usize) -> Option<Tier> {
        self.value_tiers.get(index).copied()
    }

    pub fn is_value_active(&self, index: usize) -> bool {
        self.value_active.get(index).copied().unwrap_or(false)
    }

    pub fn is_value_compressed(&self, index: usize) -> bool {
        self.value_compressed.get(index).copied().unwrap_or(false)
    }

    pub fn metadata(&self, index: usize) -> Option<MetadataRow> {
        Some(MetadataRow {
            key_index: *self.meta_key_index.get(index)? as usize,
            value_index: self.meta_value_index[index] as usize,
            flags: self.meta_flags[index],
            created: self.meta_created[index],
            priority: self.meta_priority[index],
        })
    }

    /// Value row linked to a key row through metadata, first link wins.
    pub fn value_for_key(&self, key_index: usize) -> Option<usize> {
        self.meta_key_index
            .iter()
            .position(|&k| k as usize == key_index)
            .map(|row| self.meta_value_index[row] as usize)
    }

    pub fn stats_row(&self, index: usize) -> Option<StatsRow> {
        Some(StatsRow {
            hits: *self.stat_hits.get(index)?,
            misses: self.stat_misses[index],
            latency_ns: self.stat_latency_ns[index],
        })
    }

    pub fn prefetch_request(&self, index: usize) -> Option<PrefetchRequest> {
        Some(PrefetchRequest {
            key_index: *self.prefetch_key_index.get(index)? as usize,
            pattern: self.prefetch_pattern[index],
            tier: self.prefetch_tier[index],
            priority: self.prefetch_priority[index],
            issued: self.prefetch_issued[index],
        })
    }

    pub fn mark_prefetch_issued(&mut self, index: usize) -> bool {
        match self.prefetch_issued.get_mut(index) {
            Some(issued) => {
                *issued = true;
                true
            }
            None => false,
        }
    }

    /// Active key rows currently assigned to `tier`.
    pub fn keys_in_tier(&self, tier: Tier) -> impl Iterator<Item = usize> + '_ {
        (0..self.key_count()).filter(move |&i| self.key_active[i] && self.key_tiers[i] == tier)
    }

    // -- tier bookkeeping ---------------------------------------------------

    pub fn update_tier_usage(&mut self, tier: usize, usage: f64) {
        if let Some(slot) = self.tier_usage.get_mut(tier) {
            *slot = usage;
        }
    }

    pub fn update_tier_latency(&mut self, tier: usize, latency_ns: u64) {
        if let Some(slot) = self.tier_latency_ns.get_mut(tier) {
            *slot = latency_ns;
        }
    }

    pub fn update_tier_hit_rate(&mut self, tier: usize, hit_rate: f64) {
        if let Some(slot) = self.tier_hit_rate.get_mut(tier) {
            *slot = hit_rate;
        }
    }

    pub fn tier_usage(&self, tier: Tier) -> f64 {
        self.tier_usage[tier.index()]
    }

    pub fn tier_latency_ns(&self, tier: Tier) -> u64 {
        self.tier_latency_ns[tier.index()]
    }

    pub fn tier_hit_rate(&self, tier: Tier) -> f64 {
        self.tier_hit_rate[tier.index()]
    }

    // -- batch support ------------------------------------------------------

    pub(super) fn value_row_bytes(&self, index: usize) -> Option<&[u8]> {
        if !self.is_value_active(index) {
            return None;
        }
        self.value(index)
    }

    /// Start a new ingest batch. Reserved storage is kept.
    pub fn reset(&mut self) {
        self.key_sizes.clear();
        self.key_hashes.clear();
        self.key_active.clear();
        self.key_tiers.clear();
        self.key_timestamps.clear();
        self.key_access_counts.clear();

        self.value_sizes.clear();
        self.value_active.clear();
        self.value_tiers.clear();
        self.value_compressed.clear();

        self.meta_key_index.clear();
        self.meta_value_index.clear();
        self.meta_flags.clear();
        self.meta_created.clear();
        self.meta_priority.clear();

        self.stat_hits.clear();
        self.stat_misses.clear();
        self.stat_latency_ns.clear();

        self.prefetch_key_index.clear();
        self.prefetch_pattern.clear();
        self.prefetch_tier.clear();
        self.prefetch_priority.clear();
        self.prefetch_issued.clear();

        self.tier_usage = [0.0; 4];
        self.tier_latency_ns = [0; 4];
        self.tier_hit_rate = [0.0; 4];
        debug!("SoA layout reset");
    }
}

impl fmt::Debug for SoaLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoaLayout")
            .field("keys", &self.key_count())
            .field("values", &self.value_count())
            .field("metadata", &self.metadata_count())
            .field("stats", &self.stats_count())
            .field("prefetch", &self.prefetch_count())
            .finish()
    }
}
