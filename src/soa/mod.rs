//! Column-oriented batch path, independent of the tiered engine.
//!
//! - [`layout`]: parallel arrays for keys, values, metadata, stats and prefetch rows
//! - [`batch`]: batched key search and value copy
//! - [`prefetcher`]: pattern-hinted prefetch bookkeeping

pub mod batch;
pub mod layout;
pub mod prefetcher;

pub use layout::{AccessPattern, SoaLayout};
pub use prefetcher::{PrefetchStats, Prefetcher};
