use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{self, Algorithm};
use crate::errcorrupt;
use crate::error::Result;

/// Compression tiers. T0 is the hottest band and stores plaintext by
/// default; T4 is the coldest and compresses hardest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    T0,
    T1,
    T2,
    T3,
    T4,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::T0, Tier::T1, Tier::T2, Tier::T3, Tier::T4];

    /// The on-disk tag for this tier.
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::T0 => 0,
            Tier::T1 => 1,
            Tier::T2 => 2,
            Tier::T3 => 3,
            Tier::T4 => 4,
        }
    }

    /// Decodes an on-disk tier tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Tier::T0),
            1 => Ok(Tier::T1),
            2 => Ok(Tier::T2),
            3 => Ok(Tier::T3),
            4 => Ok(Tier::T4),
            tag => Err(errcorrupt!("unknown tier tag {tag}")),
        }
    }

    fn index(self) -> usize {
        self.as_u8() as usize
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.as_u8())
    }
}

/// Custom compression hook: plaintext in, ciphertext out.
pub type CompressFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Custom decompression hook: ciphertext and expected plaintext length in,
/// plaintext out.
pub type DecompressFn = Arc<dyn Fn(&[u8], usize) -> Result<Vec<u8>> + Send + Sync>;

/// Codec binding for a single tier: a built-in algorithm plus an optional
/// hook pair that overrides it. Hooks carry the identical contract.
#[derive(Clone)]
pub struct TierConfig {
    pub algorithm: Algorithm,
    pub compress: Option<CompressFn>,
    pub decompress: Option<DecompressFn>,
}

impl TierConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            compress: None,
            decompress: None,
        }
    }

    pub fn with_hooks(algorithm: Algorithm, compress: CompressFn, decompress: DecompressFn) -> Self {
        Self {
            algorithm,
            compress: Some(compress),
            decompress: Some(decompress),
        }
    }
}

impl fmt::Debug for TierConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TierConfig")
            .field("algorithm", &self.algorithm)
            .field("custom_hooks", &self.compress.is_some())
            .finish()
    }
}

/// The fixed five-entry tier table. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Tiers([TierConfig; 5]);

impl Default for Tiers {
    fn default() -> Self {
        Tiers([
            TierConfig::new(Algorithm::None),
            TierConfig::new(Algorithm::Lz4Fast),
            TierConfig::new(Algorithm::Lz4High),
            TierConfig::new(Algorithm::ZstdMedium),
            TierConfig::new(Algorithm::ZstdMax),
        ])
    }
}

impl Tiers {
    pub fn new(configs: [TierConfig; 5]) -> Self {
        Tiers(configs)
    }

    pub fn config(&self, tier: Tier) -> &TierConfig {
        &self.0[tier.index()]
    }

    /// The algorithm currently bound to `tier`.
    pub fn algorithm(&self, tier: Tier) -> Algorithm {
        self.0[tier.index()].algorithm
    }

    /// Compresses `data` under the binding for `tier`.
    pub fn encode(&self, tier: Tier, data: &[u8]) -> Result<Vec<u8>> {
        let config = self.config(tier);
        match &config.compress {
            Some(hook) => hook(data),
            None => codec::encode(config.algorithm, data),
        }
    }

    /// Decompresses `data` that was encoded with `algorithm` while the
    /// value sat in `tier`. The tier's custom hook applies only while the
    /// recorded algorithm still matches the tier's binding; otherwise the
    /// built-in codec for the recorded algorithm is used.
    pub fn decode(
        &self,
        tier: Tier,
        algorithm: Algorithm,
        data: &[u8],
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let config = self.config(tier);
        match &config.decompress {
            Some(hook) if config.algorithm == algorithm => hook(data, original_size),
            _ => codec::decode(algorithm, data, original_size),
        }
    }
}
