//! Append-only write-ahead log of cache mutations.
//!
//! The log starts with the same [`FileHeader`] as a snapshot, recording the
//! payload size its records were written with (`record_count` is unused).
//! Records use the snapshot record format with `op` set to put or delete.
//! Replay applies them in order. A trailing partial record (torn write) is
//! ignored with a warning.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::cache::engine::TieredCache;
use crate::cache::store::hash_key;
use crate::cache::tier::Tier;
use crate::persist::record::{self, FileHeader, RecordHeader, OP_DELETE, OP_PUT};
use crate::persist::PersistError;

/// Write-ahead log.
pub struct Wal {
    path: PathBuf,
    file: File,
    payload_size: usize,
    seq: i64,
    stats: WalStats,
}

#[derive(Debug, Default, Clone)]
pub struct WalStats {
    pub records_written: u64,
    pub bytes_written: u64,
    pub records_replayed: u64,
}

impl Wal {
    /// Open (or create) the log at `path` for records of `payload_size` bytes.
    ///
    /// A new log gets a header; an existing one must have been written with
    /// the same payload size.
    pub async fn open(path: &Path, payload_size: usize) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await?;

        let len = file.metadata().await?.len();
        if len == 0 {
            file.write_all(bytemuck::bytes_of(&FileHeader::new(payload_size, 0)))
                .await?;
            file.flush().await?;
        } else {
            if len < FileHeader::SIZE as u64 {
                return Err(PersistError::Truncated {
                    expected: FileHeader::SIZE,
                    actual: len as usize,
                });
            }
            let mut raw = [0u8; FileHeader::SIZE];
            file.read_exact(&mut raw).await?;
            check_header(&raw, payload_size)?;
        }

        debug!(path = %path.display(), payload_size, "Opened write-ahead log");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            payload_size,
            seq: 0,
            stats: WalStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Log a put of `key -> value` into `tier`.
    pub async fn append_put(
        &mut self,
        key: &[u8],
        value: &[u8],
        tier: Tier,
        access_count: u32,
    ) -> Result<(), PersistError> {
        self.append(OP_PUT, key, value, tier, access_count).await
    }

    /// Log a delete of `key`.
    pub async fn append_delete(&mut self, key: &[u8]) -> Result<(), PersistError> {
        self.append(OP_DELETE, key, &[], Tier::Fastest, 0).await
    }

    async fn append(
        &mut self,
        op: u8,
        key: &[u8],
        value: &[u8],
        tier: Tier,
        access_count: u32,
    ) -> Result<(), PersistError> {
        self.seq += 1;
        let header = RecordHeader {
            key_hash: hash_key(key),
            timestamp: self.seq,
            access_count,
            key_len: key.len() as u32,
            value_len: value.len() as u32,
            tier: tier.level(),
            op,
            _pad: [0; 2],
        };
        let mut buf = Vec::with_capacity(record::record_size(self.payload_size));
        record::encode(&mut buf, header, key, value, self.payload_size)?;

        self.file.write_all(&buf).await?;
        self.file.flush().await?;

        self.stats.records_written += 1;
        self.stats.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Force logged records to stable storage.
    pub async fn sync(&mut self) -> Result<(), PersistError> {
        self.file.sync_data().await?;
        Ok(())
    }

    /// Apply every logged record to `cache` in order. Returns the count applied.
    pub async fn replay(&mut self, cache: &mut TieredCache) -> Result<usize, PersistError> {
        let data = fs::read(&self.path).await?;
        check_header(&data, self.payload_size)?;
        let size = record::record_size(self.payload_size);

        let chunks = data[FileHeader::SIZE..].chunks_exact(size);
        if !chunks.remainder().is_empty() {
            warn!(
                path = %self.path.display(),
                trailing = chunks.remainder().len(),
                "Ignoring partial record at end of log"
            );
        }

        let mut applied = 0;
        for chunk in chunks {
            let rec = record::decode(chunk, self.payload_size)?;
            match rec.header.op {
                OP_PUT => {
                    cache.restore_entry(rec.tier()?, rec.key, rec.value, rec.header.access_count)?;
                }
                OP_DELETE => {
                    cache.delete(rec.key);
                }
                op => {
                    warn!(op, "Skipping record with unknown op");
                    continue;
                }
            }
            applied += 1;
        }

        self.stats.records_replayed += applied as u64;
        info!(path = %self.path.display(), records = applied, "Replayed write-ahead log");
        Ok(applied)
    }

    /// Drop every logged record, typically right after a snapshot.
    pub async fn truncate(&mut self) -> Result<(), PersistError> {
        self.file.set_len(FileHeader::SIZE as u64).await?;
        self.seq = 0;
        debug!(path = %self.path.display(), "Truncated write-ahead log");
        Ok(())
    }
}

fn check_header(bytes: &[u8], payload_size: usize) -> Result<(), PersistError> {
    let header = FileHeader::parse(bytes)?;
    if header.payload_size != payload_size as u64 {
        return Err(PersistError::PayloadMismatch {
            expected: payload_size,
            found: header.payload_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::config::Config;
    use crate::persist::snapshot::{load_snapshot, save_snapshot};

    fn cache() -> TieredCache {
        let mut config = Config::default();
        for tier in Tier::ALL {
            let spec = config.tiers.spec_mut(tier);
            spec.capacity = 8;
            spec.slot_size = 32;
        }
        TieredCache::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_replay_applies_in_order() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(&dir.path().join("cache.wal"), 32).await.unwrap();

        wal.append_put(b"a", b"1", Tier::Fast, 1).await.unwrap();
        wal.append_put(b"b", b"2", Tier::Slow, 3).await.unwrap();
        wal.append_put(b"a", b"updated", Tier::Fastest, 2).await.unwrap();
        wal.append_delete(b"b").await.unwrap();
        assert_eq!(wal.stats().records_written, 4);

        let mut target = cache();
        assert_eq!(wal.replay(&mut target).await.unwrap(), 4);
        assert_eq!(target.len(), 1);
        assert_eq!(target.tier_of(b"a"), Some(Tier::Fastest));
        assert_eq!(target.get(b"a").as_deref(), Some(&b"updated"[..]));
    }

    #[tokio::test]
    async fn test_torn_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.wal");
        let mut wal = Wal::open(&path, 32).await.unwrap();
        wal.append_put(b"a", b"1", Tier::Fast, 1).await.unwrap();
        wal.sync().await.unwrap();

        let mut raw = OpenOptions::new().append(true).open(&path).await.unwrap();
        raw.write_all(&[0xAB; 5]).await.unwrap();
        raw.flush().await.unwrap();

        let mut target = cache();
        assert_eq!(wal.replay(&mut target).await.unwrap(), 1);
        assert!(target.contains(b"a"));
    }

    #[tokio::test]
    async fn test_snapshot_then_wal_recovery() {
        let dir = TempDir::new().unwrap();
        let snap = dir.path().join("cache.bin");
        let mut source = cache();
        let mut wal = Wal::open(&dir.path().join("cache.wal"), source.max_payload())
            .await
            .unwrap();

        source.set(b"x", b"1").unwrap();
        save_snapshot(&source, &snap).await.unwrap();
        wal.truncate().await.unwrap();

        let tier = source.put(b"y", b"2", false).unwrap();
        wal.append_put(b"y", b"2", tier, 1).await.unwrap();

        let mut recovered = cache();
        load_snapshot(&snap, &mut recovered).await.unwrap();
        wal.replay(&mut recovered).await.unwrap();

        assert!(recovered.contains(b"x"));
        assert!(recovered.contains(b"y"));
        assert_eq!(recovered.len(), 2);
    }

    #[tokio::test]
    async fn test_truncate_empties_log() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(&dir.path().join("cache.wal"), 32).await.unwrap();
        wal.append_put(b"a", b"1", Tier::Fast, 1).await.unwrap();
        wal.truncate().await.unwrap();

        let mut target = cache();
        assert_eq!(wal.replay(&mut target).await.unwrap(), 0);
        assert!(target.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_checks_payload_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.wal");
        let mut wal = Wal::open(&path, 32).await.unwrap();
        wal.append_put(b"a", b"1", Tier::Fast, 1).await.unwrap();
        drop(wal);

        let err = Wal::open(&path, 64).await.err().unwrap();
        assert!(matches!(
            err,
            PersistError::PayloadMismatch {
                expected: 64,
                found: 32
            }
        ));

        let mut wal = Wal::open(&path, 32).await.unwrap();
        let mut target = cache();
        assert_eq!(wal.replay(&mut target).await.unwrap(), 1);
        assert!(target.contains(b"a"));
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.wal");
        tokio::fs::write(&path, [0u8; 64]).await.unwrap();
        assert!(matches!(
            Wal::open(&path, 32).await.err().unwrap(),
            PersistError::BadMagic(0)
        ));

        tokio::fs::write(&path, [0u8; 5]).await.unwrap();
        assert!(matches!(
            Wal::open(&path, 32).await.err().unwrap(),
            PersistError::Truncated { actual: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_put_rejected() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(&dir.path().join("cache.wal"), 4).await.unwrap();
        let err = wal.append_put(b"key", b"value", Tier::Fast, 1).await.unwrap_err();
        assert!(matches!(err, PersistError::RecordTooLarge { size: 8, limit: 4 }));
    }
}
