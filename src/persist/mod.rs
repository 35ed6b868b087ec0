//! Persistence for the tiered cache.
//!
//! - [`snapshot`]: full flat-file dump of every resident entry
//! - [`wal`]: append-only log of puts and deletes since the last snapshot
//! - [`record`]: the fixed-size record format both use
//!
//! Both are stop-the-world: they borrow the cache for their whole duration.
//! Recovery is `load_snapshot` followed by `Wal::replay`.

pub mod record;
pub mod snapshot;
pub mod wal;

use thiserror::Error;

use crate::cache::error::CacheError;

pub use snapshot::{load_snapshot, save_snapshot};
pub use wal::Wal;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("Truncated data: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Log holds {found}-byte payloads, opened for {expected}")]
    PayloadMismatch { expected: usize, found: u64 },

    #[error("Record payload of {size} bytes exceeds {limit}")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}
