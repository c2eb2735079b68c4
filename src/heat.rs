use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

/// Upper bound of the heat score.
pub const HEAT_MAX: u32 = 1000;

/// Fixed-point scale for decay factors: a factor of 900 means x0.9.
pub const HEAT_SCALE: u32 = 1000;

/// Heat added by one successful read (0.10 x HEAT_MAX).
pub const HEAT_STEP: u32 = HEAT_MAX / 10;

/// Heat assigned to freshly inserted values.
pub const INITIAL_HEAT: u32 = HEAT_MAX / 10;

const SECONDS_PER_HOUR: u64 = 3600;

/// Wall-clock seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Applies one read's worth of heat, saturating at [`HEAT_MAX`].
pub fn bump(heat: u32) -> u32 {
    HEAT_MAX.min(heat + HEAT_STEP)
}

/// Maps a heat score onto its compression tier. Monotonic; ties break
/// toward the colder tier.
pub fn tier_for_heat(heat: u32) -> Tier {
    if heat > HEAT_MAX * 7 / 10 {
        Tier::T0
    } else if heat > HEAT_MAX * 4 / 10 {
        Tier::T1
    } else if heat > HEAT_MAX * 2 / 10 {
        Tier::T2
    } else if heat > HEAT_MAX / 10 {
        Tier::T3
    } else {
        Tier::T4
    }
}

/// Legacy tier mapping for metadata that predates the heat field: the
/// key's share of all accesses decides the tier.
pub fn tier_for_access_count(access_count: u64, total_accesses: u64) -> Tier {
    if total_accesses == 0 {
        return Tier::T4;
    }
    let ratio = access_count as f64 / total_accesses as f64;
    if ratio > 0.3 {
        Tier::T0
    } else if ratio > 0.15 {
        Tier::T1
    } else if ratio > 0.05 {
        Tier::T2
    } else if ratio > 0.01 {
        Tier::T3
    } else {
        Tier::T4
    }
}

/// A heat value representative of `tier`, used to seed the score when a
/// pre-heat image is first reorganized by the legacy mapping.
pub fn seed_for_tier(tier: Tier) -> u32 {
    match tier {
        Tier::T0 => HEAT_MAX * 85 / 100,
        Tier::T1 => HEAT_MAX * 55 / 100,
        Tier::T2 => HEAT_MAX * 30 / 100,
        Tier::T3 => HEAT_MAX * 15 / 100,
        Tier::T4 => INITIAL_HEAT,
    }
}

/// Periodic heat cooling. Thresholds are fixed-point against
/// [`HEAT_SCALE`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum HeatDecayStrategy {
    /// No decay; heat only ever accumulates.
    None,
    /// `heat <- heat * factor / HEAT_SCALE`.
    Exponential { factor: u32 },
    /// `heat <- heat - amount`, saturating at zero.
    Linear { amount: u32 },
    /// `heat <- HEAT_MAX / (1 + hours since last access)`.
    TimeBased,
}

impl HeatDecayStrategy {
    /// One decay tick for a single record.
    pub fn apply(self, heat: u32, last_access: u64, now: u64) -> u32 {
        match self {
            HeatDecayStrategy::None => heat,
            HeatDecayStrategy::Exponential { factor } => {
                (heat as u64 * factor as u64 / HEAT_SCALE as u64).min(HEAT_MAX as u64) as u32
            }
            HeatDecayStrategy::Linear { amount } => heat.saturating_sub(amount),
            HeatDecayStrategy::TimeBased => {
                let hours = now.saturating_sub(last_access) / SECONDS_PER_HOUR;
                (HEAT_MAX as u64 / (1 + hours)) as u32
            }
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, HeatDecayStrategy::None)
    }
}

/// When the engine rewrites blobs into their heat-indicated tiers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReorgStrategy {
    /// Only when explicitly requested.
    Manual,
    /// After this many operations.
    EveryNOps(u64),
    /// After this many seconds.
    Periodic(u64),
    /// When operations since the last pass reach this fraction of the
    /// store's entry count.
    Adaptive(f64),
}

impl ReorgStrategy {
    /// Whether a reorganization pass is due.
    pub fn should_fire(
        self,
        ops_since_reorg: u64,
        last_reorg_time: u64,
        entry_count: usize,
        now: u64,
    ) -> bool {
        match self {
            ReorgStrategy::Manual => false,
            ReorgStrategy::EveryNOps(threshold) => ops_since_reorg >= threshold,
            ReorgStrategy::Periodic(seconds) => now.saturating_sub(last_reorg_time) >= seconds,
            ReorgStrategy::Adaptive(change_threshold) => {
                if entry_count == 0 {
                    return false;
                }
                ops_since_reorg as f64 / entry_count as f64 >= change_threshold
            }
        }
    }
}
