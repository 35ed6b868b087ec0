//! Fixed-capacity memory pools.
//!
//! - [`allocator`]: slot pool with an intrusive free list, one per cache tier

pub mod allocator;
