//! Thread-safe handles around [`TieredCache`].
//!
//! `TieredCache` itself is single threaded. Two wrappers let callers share it:
//! - [`SharedCache`]: one cache behind an async `RwLock`, for tokio tasks.
//! - [`ShardedCache`]: N independent caches, keys routed by hash, each
//!   behind a blocking mutex. Lower contention for many OS threads.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::engine::TieredCache;
use crate::cache::error::CacheError;
use crate::cache::stats::CacheStats;
use crate::cache::store::hash_key;
use crate::cache::tier::Tier;
use crate::config::Config;

/// A cache shared between async tasks.
///
/// `get` mutates recency and may promote, so it takes the write lock too.
pub type SharedCache = Arc<RwLock<TieredCache>>;

pub fn new_shared_cache(config: Arc<Config>) -> Result<SharedCache, CacheError> {
    Ok(Arc::new(RwLock::new(TieredCache::new(config)?)))
}

/// A cache split into independently locked shards.
pub struct ShardedCache {
    shards: Vec<Mutex<TieredCache>>,
}

impl ShardedCache {
    /// Build `shards` caches, each with the full per-tier capacity of `config`.
    pub fn new(config: Arc<Config>, shards: usize) -> Result<Self, CacheError> {
        let shards = shards.max(1);
        let shards = (0..shards)
            .map(|_| TieredCache::new(config.clone()).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        info!(shards = shards.len(), "Sharded cache initialized");
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &[u8]) -> &Mutex<TieredCache> {
        let idx = (hash_key(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn put(&self, key: &[u8], value: &[u8], high_value: bool) -> Result<Tier, CacheError> {
        self.shard(key).lock().put(key, value, high_value)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.shard(key).lock().get(key)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.shard(key).lock().delete(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.shard(key).lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Statistics of all shards merged into one snapshot.
    pub fn stats(&self) -> CacheStats {
        let mut merged = self.shards[0].lock().stats();
        for shard in &self.shards[1..] {
            merged.merge(&shard.lock().stats());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn small_config() -> Arc<Config> {
        let mut config = Config::default();
        for tier in Tier::ALL {
            let spec = config.tiers.spec_mut(tier);
            spec.capacity = 16;
            spec.slot_size = 64;
        }
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_shared_cache_across_tasks() {
        let cache = new_shared_cache(small_config()).unwrap();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.write().await.set(&[b'k', i], &[i]).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut guard = cache.write().await;
        assert_eq!(guard.len(), 8);
        assert_eq!(guard.get(&[b'k', 3]).as_deref(), Some(&[3u8][..]));
    }

    #[test]
    fn test_sharded_cache_from_threads() {
        let cache = Arc::new(ShardedCache::new(small_config(), 4).unwrap());

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..4u8 {
                        cache.put(&[t, i], &[t ^ i], false).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
        assert_eq!(cache.get(&[2, 3]).as_deref(), Some(&[1u8][..]));
        assert!(cache.delete(&[2, 3]));
        assert!(!cache.contains(&[2, 3]));

        let stats = cache.stats();
        assert_eq!(stats.puts, 16);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 15);
    }

    #[test]
    fn test_zero_shards_becomes_one() {
        let cache = ShardedCache::new(small_config(), 0).unwrap();
        assert_eq!(cache.shard_count(), 1);
        assert!(cache.is_empty());
    }
}
