//! Tiered KV cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`tier`]: the four storage tiers, fastest to slowest
//! - [`store`]: one tier's slot pool, hash index and LRU queue
//! - [`engine`]: the tiered cache that orchestrates promotion/demotion
//! - [`placement`]: where new entries go
//! - [`evictor`]: what happens to entries pushed out of a full tier
//! - [`stats`]: hit/miss/latency aggregation and snapshots
//! - [`shared`]: lock-based wrappers for concurrent callers

pub mod engine;
pub mod error;
pub mod evictor;
pub mod placement;
pub mod shared;
pub mod stats;
pub mod store;
pub mod tier;

pub use engine::TieredCache;
pub use error::CacheError;
pub use stats::CacheStats;
pub use tier::Tier;
