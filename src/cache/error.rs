//! Errors surfaced by the tiered cache and the SoA layout.

use thiserror::Error;

use crate::cache::tier::Tier;
use crate::pool::allocator::AllocatorError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Pool exhausted in {tier} tier: eviction could not free a slot")]
    PoolExhausted { tier: Tier },

    #[error("SoA {category} capacity of {capacity} rows exceeded")]
    CapacityExceeded {
        category: &'static str,
        capacity: usize,
    },

    #[error("Invalid tier ordinal {0} (expected 0..=3)")]
    InvalidTier(u8),

    #[error("Key or value too large: {size} bytes exceeds limit of {limit}")]
    KeyOrValueTooLarge { size: usize, limit: usize },

    #[error("Empty keys cannot be stored")]
    EmptyKey,

    #[error("Slot allocation failed: {0}")]
    Allocation(#[from] AllocatorError),
}
