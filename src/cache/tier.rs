//! Tier definitions.
//!
//! A tier is a logical capacity/latency class backed by its own slot pool.
//! Entries move between tiers one copy at a time: promotion toward
//! [`Tier::Fastest`] on hits, demotion toward [`Tier::Slowest`] on eviction.

use serde::{Deserialize, Serialize};

use crate::cache::error::CacheError;

/// Identifies which storage tier an entry currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 0: smallest and fastest.
    Fastest,
    /// Tier 1.
    Fast,
    /// Tier 2.
    Slow,
    /// Tier 3: largest and slowest.
    Slowest,
}

impl Tier {
    /// All tiers, fastest first. This is the probe order of a lookup.
    pub const ALL: [Tier; 4] = [Tier::Fastest, Tier::Fast, Tier::Slow, Tier::Slowest];

    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::Fastest => 0,
            Tier::Fast => 1,
            Tier::Slow => 2,
            Tier::Slowest => 3,
        }
    }

    /// Position of the tier in per-tier arrays.
    pub fn index(&self) -> usize {
        self.level() as usize
    }

    /// Returns the next slower tier for eviction, or None if already slowest.
    pub fn demote(&self) -> Option<Tier> {
        match self {
            Tier::Fastest => Some(Tier::Fast),
            Tier::Fast => Some(Tier::Slow),
            Tier::Slow => Some(Tier::Slowest),
            Tier::Slowest => None,
        }
    }

    /// Returns the next faster tier for promotion, or None if already fastest.
    pub fn promote(&self) -> Option<Tier> {
        match self {
            Tier::Fastest => None,
            Tier::Fast => Some(Tier::Fastest),
            Tier::Slow => Some(Tier::Fast),
            Tier::Slowest => Some(Tier::Slow),
        }
    }

    /// This tier and every slower one, in order.
    pub fn and_slower(self) -> impl Iterator<Item = Tier> {
        Tier::ALL.into_iter().skip(self.index())
    }
}

impl TryFrom<u8> for Tier {
    type Error = CacheError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Tier::Fastest),
            1 => Ok(Tier::Fast),
            2 => Ok(Tier::Slow),
            3 => Ok(Tier::Slowest),
            other => Err(CacheError::InvalidTier(other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Fastest => write!(f, "fastest"),
            Tier::Fast => write!(f, "fast"),
            Tier::Slow => write!(f, "slow"),
            Tier::Slowest => write!(f, "slowest"),
        }
    }
}
