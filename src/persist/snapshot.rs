//! Flat binary snapshots of the whole cache.
//!
//! Layout: one [`FileHeader`], then `record_count` fixed-size records in
//! tier order (fastest first) and LRU order within a tier, so reloading
//! reproduces each tier's recency order.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::cache::engine::TieredCache;
use crate::cache::error::CacheError;
use crate::cache::tier::Tier;
use crate::persist::record::{self, FileHeader, Record, RecordHeader, OP_PUT};
use crate::persist::PersistError;

/// Write every resident entry to `path`.
///
/// The file is written next to `path` and renamed into place, so a crash
/// leaves either the old snapshot or the new one. Returns the record count.
pub async fn save_snapshot(cache: &TieredCache, path: &Path) -> Result<usize, PersistError> {
    let payload_size = cache.max_payload();
    let count = cache.len();

    let mut buf = Vec::with_capacity(FileHeader::SIZE + count * record::record_size(payload_size));
    buf.extend_from_slice(bytemuck::bytes_of(&FileHeader::new(payload_size, count)));

    for (info, key, value) in cache.entries() {
        let header = RecordHeader {
            key_hash: info.key_hash,
            timestamp: info.timestamp,
            access_count: info.access_count,
            key_len: key.len() as u32,
            value_len: value.len() as u32,
            tier: info.tier.level(),
            op: OP_PUT,
            _pad: [0; 2],
        };
        record::encode(&mut buf, header, key, value, payload_size)?;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &buf).await?;
    fs::rename(&tmp, path).await?;

    info!(
        path = %path.display(),
        records = count,
        size = buf.len(),
        "Saved cache snapshot"
    );
    Ok(count)
}

/// Replace the contents of `cache` with the snapshot at `path`.
///
/// Every record is decoded and checked against the tier it names before the
/// cache is touched, so a rejected snapshot leaves the cache as it was. Each
/// record goes back into the tier it was saved from. Returns the number of
/// records loaded.
pub async fn load_snapshot(path: &Path, cache: &mut TieredCache) -> Result<usize, PersistError> {
    let data = fs::read(path).await?;
    let header = FileHeader::parse(&data)?;
    let (payload_size, expected) = header.layout(cache.max_payload())?;
    if data.len() < expected {
        return Err(PersistError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let body = &data[FileHeader::SIZE..expected];
    let records = body
        .chunks_exact(record::record_size(payload_size))
        .map(|chunk| validate(cache, chunk, payload_size))
        .collect::<Result<Vec<_>, _>>()?;

    cache.clear();
    for (tier, rec) in &records {
        cache.restore_entry(*tier, rec.key, rec.value, rec.header.access_count)?;
        debug!(key_hash = rec.header.key_hash, tier = %tier, "Restored entry");
    }

    info!(path = %path.display(), records = records.len(), "Loaded cache snapshot");
    Ok(records.len())
}

/// Decode one record and check that its recorded tier can hold it.
fn validate<'a>(
    cache: &TieredCache,
    chunk: &'a [u8],
    payload_size: usize,
) -> Result<(Tier, Record<'a>), PersistError> {
    let rec = record::decode(chunk, payload_size)?;
    let tier = rec.tier()?;
    if rec.key.is_empty() {
        return Err(CacheError::EmptyKey.into());
    }
    let size = rec.key.len() + rec.value.len();
    let store = cache.store(tier);
    if !store.accepts(size) {
        return Err(CacheError::KeyOrValueTooLarge {
            size,
            limit: store.slot_size(),
        }
        .into());
    }
    Ok((tier, rec))
}
