mod image;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::codec::Algorithm;
use crate::config::DbConfig;
use crate::error::Result;
use crate::heat::{self, unix_now};
use crate::meta::{self, NodeMetadata};
use crate::tier::Tier;

const DATA_FILE: &str = "data.db";
const METADATA_FILE: &str = "metadata.db";

/// The inline half of the store: the key -> compressed-blob map, its
/// metadata map, and the write buffer. Persists as two whole-image files
/// (data.db, metadata.db) under the store directory.
pub struct Store {
    dir: PathBuf,
    config: DbConfig,

    data: BTreeMap<String, Vec<u8>>,
    meta: BTreeMap<String, NodeMetadata>,

    // Staged inserts under lazy persistence; promoted to `data` by flush.
    buffer: BTreeMap<String, Vec<u8>>,
    buffer_bytes: usize,

    total_accesses: u64,
    ops_since_reorg: u64,
    last_reorg_time: u64,
}

impl Store {
    /// Loads both images from `dir`. A missing or corrupt metadata image
    /// degrades to an empty metadata map; entries that then lack metadata
    /// are unreadable and are dropped to keep the two maps one-to-one.
    pub fn open(dir: &Path, config: DbConfig) -> Result<Self> {
        let mut data = image::load(&dir.join(DATA_FILE))?;

        let image = match meta::load(&dir.join(METADATA_FILE)) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(error = %e, "metadata image unreadable, starting empty");
                Default::default()
            }
        };
        let mut meta = image.entries;

        data.retain(|key, _| {
            let known = meta.contains_key(key);
            if !known {
                tracing::warn!(key = %key, "dropping data entry without metadata");
            }
            known
        });
        meta.retain(|key, _| {
            let backed = data.contains_key(key);
            if !backed {
                tracing::warn!(key = %key, "dropping metadata entry without data");
            }
            backed
        });

        let last_reorg_time = if image.last_reorg_time == 0 {
            unix_now()
        } else {
            image.last_reorg_time
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            data,
            meta,
            buffer: BTreeMap::new(),
            buffer_bytes: 0,
            total_accesses: image.total_accesses,
            ops_since_reorg: image.ops_since_reorg,
            last_reorg_time,
        })
    }

    /// Inserts a value. New entries always start at the coldest tier so
    /// the compression cost is paid once up front; reorganization lifts
    /// them later if they turn out to be hot.
    pub fn insert(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let tier = Tier::T4;
        let (stored, algorithm) = match self.config.tiers.encode(tier, value) {
            Ok(encoded) => (encoded, self.config.tiers.algorithm(tier)),
            Err(e) => {
                // Deliberate degradation: keep the value readable as
                // plaintext rather than failing the insert.
                tracing::warn!(key = %key, error = %e, "encode failed, storing uncompressed");
                (value.to_vec(), Algorithm::None)
            }
        };

        let node = NodeMetadata::new(
            tier,
            algorithm,
            value.len() as u64,
            stored.len() as u64,
            unix_now(),
        );

        if self.config.lazy_persistence {
            self.buffer_bytes += stored.len();
            self.buffer.insert(key.to_string(), stored);
            if self.buffer_bytes >= self.config.write_buffer_size {
                self.flush();
            }
        } else {
            self.data.insert(key.to_string(), stored);
        }
        self.meta.insert(key.to_string(), node);
        Ok(())
    }

    /// Looks up and decompresses a value, bumping its heat and access
    /// accounting. Codec faults degrade to a miss.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.buffer.contains_key(key) {
            // Simpler than reconciling two maps on the read path.
            self.flush();
        }

        let Some(blob) = self.data.get(key) else {
            return Ok(None);
        };
        let Some(node) = self.meta.get_mut(key) else {
            tracing::warn!(key = %key, "data entry without metadata, treating as miss");
            return Ok(None);
        };

        let plaintext = match self.config.tiers.decode(
            node.tier,
            node.algorithm,
            blob,
            node.original_size as usize,
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "decode failed, treating as miss");
                return Ok(None);
            }
        };

        node.access_count += 1;
        node.last_access = unix_now();
        node.heat = heat::bump(node.heat);
        node.heat_seeded = true;
        self.total_accesses += 1;

        Ok(Some(plaintext))
    }

    /// Drops a key from the map, the metadata, and the buffer. Returns
    /// whether a mapping existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let in_data = self.data.remove(key).is_some();
        let buffered = self.buffer.remove(key);
        if let Some(old) = &buffered {
            self.buffer_bytes = self.buffer_bytes.saturating_sub(old.len());
        }
        self.meta.remove(key);
        in_data || buffered.is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key) || self.buffer.contains_key(key)
    }

    /// Promotes all buffered entries into the primary map. Does not touch
    /// disk.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let staged = std::mem::take(&mut self.buffer);
        self.data.extend(staged);
        self.buffer_bytes = 0;
    }

    pub fn metadata(&self, key: &str) -> Option<&NodeMetadata> {
        self.meta.get(key)
    }

    pub fn metadata_map(&self) -> &BTreeMap<String, NodeMetadata> {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn total_accesses(&self) -> u64 {
        self.total_accesses
    }

    pub fn ops_since_reorg(&self) -> u64 {
        self.ops_since_reorg
    }

    pub fn last_reorg_time(&self) -> u64 {
        self.last_reorg_time
    }

    pub fn note_op(&mut self) {
        self.ops_since_reorg += 1;
    }

    /// Compressed bytes held by the inline side (primary map plus
    /// buffer).
    pub fn footprint(&self) -> u64 {
        self.meta.values().map(|m| m.compressed_size).sum()
    }

    /// Enforces `max_size_bytes` against the inline footprint plus
    /// `extra_bytes` of chunk storage. Over the limit, either evicts the
    /// coldest keys or, when deletion is disallowed, warns and proceeds.
    pub fn check_size_limit(&mut self, extra_bytes: u64) {
        let current = self.footprint() + extra_bytes;
        if current <= self.config.max_size_bytes {
            return;
        }
        if self.config.allow_deletion {
            tracing::warn!(
                current = current,
                limit = self.config.max_size_bytes,
                "size limit exceeded, evicting coldest keys"
            );
            self.evict_coldest();
        } else {
            tracing::warn!(
                current = current,
                limit = self.config.max_size_bytes,
                "size limit exceeded but deletion is disabled"
            );
        }
    }

    /// Removes the `max(1, n/10)` keys with the lowest access counts.
    /// Ties break by last_access, then key, so the victim set is
    /// deterministic.
    fn evict_coldest(&mut self) {
        if self.meta.is_empty() {
            return;
        }
        let count = (self.meta.len() / 10).max(1);
        let victims: Vec<String> = self
            .meta
            .iter()
            .map(|(key, node)| (node.access_count, node.last_access, key.clone()))
            .sorted()
            .take(count)
            .map(|(_, _, key)| key)
            .collect();

        for key in &victims {
            self.remove(key);
        }
        tracing::info!(evicted = victims.len(), "evicted coldest keys");

        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist images after eviction");
        }
    }

    /// Rewrites every node whose heat indicates a different tier:
    /// decode under the recorded algorithm, re-encode under the target
    /// tier's, and swap the blob. Per-node failures are logged and
    /// skipped. Nodes from pre-heat images are retiered once by their
    /// share of total accesses and given a heat score to match.
    pub fn reorganize(&mut self) {
        self.flush();
        let now = unix_now();
        let mut recompressed = 0usize;

        let keys: Vec<String> = self.meta.keys().cloned().collect();
        for key in keys {
            let node = &self.meta[&key];
            let target = if node.heat_seeded {
                heat::tier_for_heat(node.heat)
            } else {
                heat::tier_for_access_count(node.access_count, self.total_accesses)
            };
            let target_algorithm = self.config.tiers.algorithm(target);
            if target == node.tier && target_algorithm == node.algorithm {
                continue;
            }

            let Some(blob) = self.data.get(&key) else {
                tracing::warn!(key = %key, "metadata entry without data, skipping");
                continue;
            };
            let plaintext = match self.config.tiers.decode(
                node.tier,
                node.algorithm,
                blob,
                node.original_size as usize,
            ) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "decode failed during reorganization");
                    continue;
                }
            };
            let encoded = match self.config.tiers.encode(target, &plaintext) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "encode failed during reorganization");
                    continue;
                }
            };

            let node = self.meta.get_mut(&key).unwrap();
            node.tier = target;
            node.algorithm = target_algorithm;
            node.compressed_size = encoded.len() as u64;
            if !node.heat_seeded {
                node.heat = heat::seed_for_tier(target);
                node.heat_seeded = true;
            }
            self.data.insert(key, encoded);
            recompressed += 1;
        }

        self.ops_since_reorg = 0;
        self.last_reorg_time = now;
        tracing::info!(recompressed = recompressed, "reorganization complete");

        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist images after reorganization");
        }
    }

    /// Applies the configured decay strategy to every inline node. Tiers
    /// are untouched; reorganization is what retiers inline values.
    pub fn decay(&mut self, now: u64) {
        let strategy = self.config.heat_decay_strategy;
        for node in self.meta.values_mut() {
            node.heat = strategy.apply(node.heat, node.last_access, now);
        }
    }

    /// Rewrites both images. The data image goes first so a crash during
    /// the metadata write leaves a parsable store.
    pub fn save(&self) -> Result<()> {
        image::save(&self.dir.join(DATA_FILE), &self.data)?;
        meta::save_parts(
            &self.dir.join(METADATA_FILE),
            self.total_accesses,
            self.ops_since_reorg,
            self.last_reorg_time,
            &self.meta,
        )
    }
}
