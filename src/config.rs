use crate::codec::Algorithm;
use crate::heat::{HeatDecayStrategy, ReorgStrategy};
use crate::tier::{TierConfig, Tiers};

/// Configuration for an EmberDB store. Immutable after the database is
/// opened.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Codec binding for each of the five tiers.
    pub tiers: Tiers,

    /// Allow eviction of cold data when the size limit is exceeded
    /// (default: false).
    pub allow_deletion: bool,

    /// Maximum compressed footprint before eviction kicks in
    /// (default: unbounded).
    pub max_size_bytes: u64,

    /// When to rewrite blobs into their heat-indicated tiers
    /// (default: adaptive at a 20% churn ratio).
    pub reorg_strategy: ReorgStrategy,

    /// Stage inserts in a write buffer instead of the primary map
    /// (default: false).
    pub lazy_persistence: bool,

    /// Write-buffer size that forces a flush (default: 10MB).
    pub write_buffer_size: usize,

    /// Store large values as independently compressed chunks
    /// (default: false).
    pub enable_chunking: bool,

    /// Values at or above this size are chunked (default: 1MB).
    pub chunking_threshold: usize,

    /// Size of each chunk (default: 4MB).
    pub chunk_size: usize,

    /// Periodically cool heat scores (default: false).
    pub enable_heat_decay: bool,

    /// How heat cools (default: none).
    pub heat_decay_strategy: HeatDecayStrategy,

    /// Seconds between decay runs (default: 300).
    pub heat_decay_interval: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            tiers: Tiers::default(),
            allow_deletion: false,
            max_size_bytes: u64::MAX,
            reorg_strategy: ReorgStrategy::Adaptive(0.2),
            lazy_persistence: false,
            write_buffer_size: 10 * 1024 * 1024, // 10MB
            enable_chunking: false,
            chunking_threshold: 1024 * 1024, // 1MB
            chunk_size: 4 * 1024 * 1024,     // 4MB
            enable_heat_decay: false,
            heat_decay_strategy: HeatDecayStrategy::None,
            heat_decay_interval: 300,
        }
    }
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for text and logs: everything persists immediately and cold
    /// data compresses as hard as possible.
    pub fn for_text() -> Self {
        Self {
            reorg_strategy: ReorgStrategy::Adaptive(0.2),
            lazy_persistence: false,
            ..Self::default()
        }
    }

    /// Preset for image blobs: already-compressed inputs gain little from
    /// heavy recompression, so the cold tiers stay light.
    pub fn for_images() -> Self {
        Self {
            allow_deletion: true,
            max_size_bytes: 10 * 1024 * 1024 * 1024, // 10GB
            reorg_strategy: ReorgStrategy::EveryNOps(500),
            lazy_persistence: true,
            tiers: Tiers::new([
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::Lz4Fast),
                TierConfig::new(Algorithm::ZstdFast),
                TierConfig::new(Algorithm::ZstdMedium),
            ]),
            ..Self::default()
        }
    }

    /// Preset for video: chunked storage, hourly reorganization, and only
    /// light compression anywhere.
    pub fn for_videos() -> Self {
        Self {
            allow_deletion: true,
            max_size_bytes: 100 * 1024 * 1024 * 1024, // 100GB
            reorg_strategy: ReorgStrategy::Periodic(3600),
            lazy_persistence: true,
            enable_chunking: true,
            tiers: Tiers::new([
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::Lz4Fast),
                TierConfig::new(Algorithm::Lz4Fast),
            ]),
            ..Self::default()
        }
    }

    /// Preset for constrained hosts: a small write buffer, an eager
    /// eviction ceiling, and cheap compression to keep CPU spikes down.
    pub fn for_embedded() -> Self {
        Self {
            allow_deletion: true,
            max_size_bytes: 64 * 1024 * 1024, // 64MB
            reorg_strategy: ReorgStrategy::EveryNOps(1000),
            lazy_persistence: true,
            write_buffer_size: 256 * 1024, // 256KB
            tiers: Tiers::new([
                TierConfig::new(Algorithm::None),
                TierConfig::new(Algorithm::Lz4Fast),
                TierConfig::new(Algorithm::Lz4Fast),
                TierConfig::new(Algorithm::ZstdFast),
                TierConfig::new(Algorithm::ZstdFast),
            ]),
            ..Self::default()
        }
    }

    /// Set the tier table
    pub fn tiers(mut self, tiers: Tiers) -> Self {
        self.tiers = tiers;
        self
    }

    /// Allow eviction of cold data
    pub fn allow_deletion(mut self, allow: bool) -> Self {
        self.allow_deletion = allow;
        self
    }

    /// Set the maximum compressed footprint
    pub fn max_size_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = max;
        self
    }

    /// Set the reorganization strategy
    pub fn reorg_strategy(mut self, strategy: ReorgStrategy) -> Self {
        self.reorg_strategy = strategy;
        self
    }

    /// Stage inserts in the write buffer
    pub fn lazy_persistence(mut self, lazy: bool) -> Self {
        self.lazy_persistence = lazy;
        self
    }

    /// Set the write-buffer flush threshold
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Enable chunked storage for large values
    pub fn enable_chunking(mut self, enable: bool) -> Self {
        self.enable_chunking = enable;
        self
    }

    /// Set the size at which values are chunked
    pub fn chunking_threshold(mut self, threshold: usize) -> Self {
        self.chunking_threshold = threshold;
        self
    }

    /// Set the chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Enable periodic heat decay
    pub fn enable_heat_decay(mut self, enable: bool) -> Self {
        self.enable_heat_decay = enable;
        self
    }

    /// Set the decay strategy
    pub fn heat_decay_strategy(mut self, strategy: HeatDecayStrategy) -> Self {
        self.heat_decay_strategy = strategy;
        self
    }

    /// Set the seconds between decay runs
    pub fn heat_decay_interval(mut self, seconds: u64) -> Self {
        self.heat_decay_interval = seconds;
        self
    }
}
