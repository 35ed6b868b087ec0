//! kv-tier-engine: driver for the multi-tier KV cache.
//!
//! Builds a cache from the configuration, replays a synthetic skewed
//! get/set workload against it, runs a batch search and prefetch pass over
//! the resident entries, and prints the resulting statistics as JSON or
//! Prometheus text.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use kv_tier_engine::cache::stats::CacheStats;
use kv_tier_engine::cache::{CacheError, TieredCache};
use kv_tier_engine::config::{Cli, Command, Config, OutputFormat};
use kv_tier_engine::metrics::CacheMetrics;
use kv_tier_engine::persist::{self, Wal};
use kv_tier_engine::soa::{AccessPattern, PrefetchStats, Prefetcher, SoaLayout};

#[derive(Serialize)]
struct Report<'a> {
    elapsed_ms: f64,
    cache: &'a CacheStats,
    prefetch: &'a PrefetchStats,
}

#[derive(Debug, Clone, Copy)]
struct Workload {
    ops: usize,
    keys: usize,
    value_size: usize,
    read_ratio: f64,
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "kv_tier_engine=debug"
    } else {
        "kv_tier_engine=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("kv-tier-engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    info!(
        fastest = config.tiers.fastest.capacity,
        fast = config.tiers.fast.capacity,
        slow = config.tiers.slow.capacity,
        slowest = config.tiers.slowest.capacity,
        total = config.tiers.total_capacity(),
        slot_size = config.tiers.max_slot_size(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Run {
            ops,
            keys,
            value_size,
            read_ratio,
            seed,
            format,
            restore,
            snapshot,
        } => {
            let workload = Workload {
                ops,
                keys: keys.max(1),
                value_size,
                read_ratio: read_ratio.clamp(0.0, 1.0),
                seed,
            };
            run(config, workload, format, restore, snapshot).await
        }
        Command::Stats { format } => {
            let cache = TieredCache::new(config).context("failed to reserve tier pools")?;
            print_stats(&cache.stats(), &PrefetchStats::default(), 0.0, format)
        }
    }
}

async fn run(
    config: Arc<Config>,
    workload: Workload,
    format: OutputFormat,
    restore: bool,
    snapshot: bool,
) -> anyhow::Result<()> {
    let mut cache = TieredCache::new(config.clone()).context("failed to reserve tier pools")?;

    let snapshot_path = config.persist.snapshot_path();
    let mut wal = if restore || snapshot {
        Some(Wal::open(&config.persist.wal_path(), cache.max_payload()).await?)
    } else {
        None
    };

    if restore {
        if snapshot_path.exists() {
            persist::load_snapshot(&snapshot_path, &mut cache)
                .await
                .with_context(|| format!("failed to load {}", snapshot_path.display()))?;
        }
        if let Some(wal) = wal.as_mut() {
            wal.replay(&mut cache).await?;
        }
        info!(entries = cache.len(), "Cache restored");
    }

    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(workload.seed);
    let high_value_keys = (workload.keys / 50).max(1);

    for _ in 0..workload.ops {
        // Squaring a uniform sample skews accesses toward low key indices.
        let r: f64 = rng.gen();
        let idx = ((r * r) * workload.keys as f64) as usize % workload.keys;
        let key = format!("key-{idx:08}");

        if rng.gen_bool(workload.read_ratio) && cache.get(key.as_bytes()).is_some() {
            continue;
        }

        let value = vec![(idx % 251) as u8; workload.value_size];
        match cache.put(key.as_bytes(), &value, idx < high_value_keys) {
            Ok(tier) => {
                if let Some(wal) = wal.as_mut() {
                    let count = cache.entry_info(key.as_bytes()).map_or(1, |e| e.access_count);
                    wal.append_put(key.as_bytes(), &value, tier, count).await?;
                }
            }
            Err(e @ CacheError::KeyOrValueTooLarge { .. }) => {
                return Err(e).context("value size does not fit any tier");
            }
            Err(e) => warn!(error = %e, "Put failed"),
        }
    }

    let prefetch = batch_pass(&config, &cache)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;

    let stats = cache.stats();
    info!(
        ops = workload.ops,
        hit_rate = stats.hit_rate,
        entries = stats.entries,
        promotions = stats.promotions,
        demotions = stats.demotions,
        evictions = stats.evictions,
        elapsed_ms,
        "Workload finished"
    );

    if snapshot {
        persist::save_snapshot(&cache, &snapshot_path).await?;
        if let Some(wal) = wal.as_mut() {
            wal.truncate().await?;
        }
    }

    print_stats(&stats, &prefetch, elapsed_ms, format)
}

/// Ingest resident entries from every tier (fastest first) into a SoA layout,
/// search them back in one batch, and prefetch the matches.
fn batch_pass(config: &Config, cache: &TieredCache) -> anyhow::Result<PrefetchStats> {
    let mut layout = SoaLayout::new(&config.soa).context("failed to reserve SoA layout")?;
    let mut prefetcher = Prefetcher::new(config.prefetch.clone());

    let mut keys = Vec::new();
    for (info, key, value) in cache.entries() {
        if layout.key_count() == layout.max_keys() {
            break;
        }
        match layout.add_entry(key, value, info.tier) {
            Ok(_) => keys.push(key),
            Err(CacheError::KeyOrValueTooLarge { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let mut rows = vec![0usize; keys.len()];
    let found = layout.find_keys_simd(&keys, &mut rows);
    let accepted = prefetcher.prefetch_cpu_data(&mut layout, &rows[..found], AccessPattern::Sequential);

    // Every key searched for was just ingested, so each accepted row is a hit.
    for _ in 0..accepted {
        prefetcher.record_hit();
    }

    info!(
        ingested = layout.key_count(),
        found,
        accepted,
        effectiveness = prefetcher.effectiveness(),
        "Batch pass finished"
    );
    Ok(prefetcher.stats().clone())
}

fn print_stats(
    stats: &CacheStats,
    prefetch: &PrefetchStats,
    elapsed_ms: f64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let report = Report {
                elapsed_ms,
                cache: stats,
                prefetch,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Prometheus => {
            let metrics = CacheMetrics::new()?;
            metrics.observe(stats);
            print!("{}", metrics.render()?);
        }
    }
    Ok(())
}
