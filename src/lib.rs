//! kv-tier-engine: a multi-tier key/value cache engine.
//!
//! Entries live in one of four tiers (fastest → fast → slow → slowest), each
//! backed by a fixed-capacity slot pool. Hits are promoted to the fastest
//! tier; entries evicted from a full tier are demoted to the next slower one
//! while they are still valuable, and discarded otherwise.
//!
//! Alongside the engine sits a column-oriented (SoA) layout for batch ingest
//! and search, a prefetch-hint subsystem, Prometheus metrics, and snapshot +
//! write-ahead-log persistence.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod persist;
pub mod pool;
pub mod soa;

pub use cache::{CacheError, CacheStats, Tier, TieredCache};
pub use config::Config;
