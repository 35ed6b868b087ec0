//! Runtime configuration for kv-tier-engine.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (capacities, slot sizes, placement thresholds,
//! eviction policy) live here. Missing fields fall back to their defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::cache::tier::Tier;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "kv-tier-engine", about = "Multi-tier KV cache engine driver")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Driver subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replay a synthetic get/set workload against a fresh cache.
    Run {
        /// Number of operations to issue.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,

        /// Size of the key space.
        #[arg(long, default_value_t = 512)]
        keys: usize,

        /// Value size in bytes.
        #[arg(long, default_value_t = 256)]
        value_size: usize,

        /// Fraction of operations that are reads.
        #[arg(long, default_value_t = 0.8)]
        read_ratio: f64,

        /// RNG seed for reproducible runs.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output format for the final statistics.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Restore the cache from the configured snapshot and WAL before running.
        #[arg(long)]
        restore: bool,

        /// Save a snapshot after the run.
        #[arg(long)]
        snapshot: bool,
    },

    /// Print the statistics of an empty cache built from the configuration.
    Stats {
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

/// How statistics are printed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Prometheus,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-tier pool sizing.
    pub tiers: TierConfig,

    /// Placement policy for new entries.
    pub placement: PlacementConfig,

    /// Eviction / demotion policy.
    pub eviction: EvictionConfig,

    /// Struct-of-Arrays layout capacities.
    pub soa: SoaConfig,

    /// Prefetch subsystem settings.
    pub prefetch: PrefetchConfig,

    /// Statistics aggregation.
    pub stats: StatsConfig,

    /// Snapshot / WAL locations.
    pub persist: PersistConfig,
}

/// Sizing of a single tier's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Number of slots in the pool. Zero disables the tier.
    pub capacity: usize,

    /// Bytes per slot; bounds `key.len() + value.len()` for entries in this tier.
    pub slot_size: usize,

    /// Nominal access latency of the tier, reported in statistics.
    pub latency_class_ns: u64,
}

/// Capacity and latency class of each tier, fastest to slowest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub fastest: TierSpec,
    pub fast: TierSpec,
    pub slow: TierSpec,
    pub slowest: TierSpec,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            fastest: TierSpec {
                capacity: 256,
                slot_size: 4096,
                latency_class_ns: 100,
            },
            fast: TierSpec {
                capacity: 1024,
                slot_size: 4096,
                latency_class_ns: 1_000,
            },
            slow: TierSpec {
                capacity: 8192,
                slot_size: 4096,
                latency_class_ns: 10_000,
            },
            slowest: TierSpec {
                capacity: 65_536,
                slot_size: 4096,
                latency_class_ns: 100_000,
            },
        }
    }
}

impl TierConfig {
    /// Sizing for the given tier.
    pub fn spec(&self, tier: Tier) -> &TierSpec {
        match tier {
            Tier::Fastest => &self.fastest,
            Tier::Fast => &self.fast,
            Tier::Slow => &self.slow,
            Tier::Slowest => &self.slowest,
        }
    }

    /// Mutable sizing for the given tier.
    pub fn spec_mut(&mut self, tier: Tier) -> &mut TierSpec {
        match tier {
            Tier::Fastest => &mut self.fastest,
            Tier::Fast => &mut self.fast,
            Tier::Slow => &mut self.slow,
            Tier::Slowest => &mut self.slowest,
        }
    }

    /// Largest slot size across all enabled tiers.
    pub fn max_slot_size(&self) -> usize {
        Tier::ALL
            .iter()
            .map(|&t| self.spec(t))
            .filter(|s| s.capacity > 0)
            .map(|s| s.slot_size)
            .max()
            .unwrap_or(0)
    }

    /// Total number of slots across all tiers.
    pub fn total_capacity(&self) -> usize {
        Tier::ALL.iter().map(|&t| self.spec(t).capacity).sum()
    }

    /// Bytes reserved up front by all tier pools.
    pub fn reserved_bytes(&self) -> usize {
        Tier::ALL
            .iter()
            .map(|&t| self.spec(t))
            .map(|s| s.capacity.saturating_mul(s.slot_size))
            .sum()
    }
}

/// Where new entries land.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Requests (gets + puts) during which placement stays conservative.
    pub warmup_requests: u64,

    /// Average access count above which new entries go to the fastest tier.
    pub high_frequency_threshold: f64,

    /// Average access count above which new entries go to the second tier.
    pub low_frequency_threshold: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            warmup_requests: 100,
            high_frequency_threshold: 10.0,
            low_frequency_threshold: 3.0,
        }
    }
}

/// Eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Entries evicted with an access count above this are demoted, not discarded.
    pub valuable_access_threshold: u32,

    /// Allow a promotion to evict from a full fastest tier.
    pub evict_on_promote: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            valuable_access_threshold: 2,
            evict_on_promote: false,
        }
    }
}

/// Capacities of the Struct-of-Arrays layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoaConfig {
    pub max_keys: usize,
    pub max_values: usize,
    pub max_metadata: usize,
    pub max_stats: usize,
    pub max_prefetch: usize,

    /// Fixed width of a key row in bytes.
    pub max_key_size: usize,

    /// Fixed width of a value row in bytes.
    pub max_value_size: usize,
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            max_keys: 4096,
            max_values: 4096,
            max_metadata: 4096,
            max_stats: 1024,
            max_prefetch: 1024,
            max_key_size: 64,
            max_value_size: 1024,
        }
    }
}

/// Prefetch strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Master switch; when off every prefetch call is a no-op.
    pub enabled: bool,

    /// Rows prefetched ahead by the sequential and temporal patterns.
    pub prefetch_ahead: usize,

    /// Rows on either side of the center for the spatial pattern.
    pub spatial_radius: usize,

    /// Upper bound on rows accepted by one prefetch call.
    pub max_batch: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefetch_ahead: 4,
            spatial_radius: 2,
            max_batch: 64,
        }
    }
}

/// Statistics aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Exponential moving average decay for per-tier latency.
    pub latency_ema_decay: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            latency_ema_decay: 0.9,
        }
    }
}

/// Snapshot / WAL locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Directory holding the snapshot and WAL.
    pub dir: PathBuf,

    /// Snapshot file name.
    pub snapshot_name: String,

    /// Write-ahead log file name.
    pub wal_name: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/kv-tier-engine"),
            snapshot_name: "cache.bin".to_string(),
            wal_name: "cache.wal".to_string(),
        }
    }
}

impl PersistConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_name)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.dir.join(&self.wal_name)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
