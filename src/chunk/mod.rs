mod meta;

pub use meta::{ChunkMetadata, ChunkedFileMetadata};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::heat::{self, unix_now, HeatDecayStrategy};
use crate::tier::{Tier, Tiers};

const INDEX_FILE: &str = "chunk_metadata.db";

/// Storage for large values split into fixed-size, independently
/// compressed and heat-tracked pieces. Each key owns a subdirectory of
/// chunk files under `chunks/`; the index lives in chunk_metadata.db.
pub struct ChunkStore {
    chunks_dir: PathBuf,
    chunk_size: usize,
    index: BTreeMap<String, ChunkedFileMetadata>,
}

fn chunk_file_name(chunk_id: u32) -> String {
    format!("chunk_{chunk_id:03}.bin")
}

impl ChunkStore {
    /// Opens (or creates) the chunk tree under `root` and loads the
    /// index.
    pub fn open(root: &Path, chunk_size: usize) -> Result<Self> {
        let chunks_dir = root.join("chunks");
        fs::create_dir_all(&chunks_dir)?;
        let index = meta::load(&chunks_dir.join(INDEX_FILE))?;
        Ok(Self {
            chunks_dir,
            chunk_size,
            index,
        })
    }

    /// Splits `data` into `chunk_size` pieces, encodes each at the
    /// coldest tier, and writes one file per chunk. The index entry is
    /// installed only after every chunk file is in place; a failure
    /// unwinds the partial directory.
    pub fn insert(&mut self, key: &str, data: &[u8], tiers: &Tiers) -> Result<()> {
        if self.index.contains_key(key) {
            self.remove(key);
        }

        let num_chunks = data.len().div_ceil(self.chunk_size) as u32;
        let key_dir = self.chunks_dir.join(key);
        fs::create_dir_all(&key_dir)?;

        let mut chunks = BTreeMap::new();
        for chunk_id in 0..num_chunks {
            let start = chunk_id as usize * self.chunk_size;
            let end = (start + self.chunk_size).min(data.len());
            let slice = &data[start..end];

            let encoded = match tiers.encode(Tier::T4, slice) {
                Ok(encoded) => encoded,
                Err(e) => {
                    self.unwind_partial_insert(&key_dir);
                    return Err(e);
                }
            };
            if let Err(e) = fs::write(key_dir.join(chunk_file_name(chunk_id)), &encoded) {
                self.unwind_partial_insert(&key_dir);
                return Err(e.into());
            }
            chunks.insert(
                chunk_id,
                ChunkMetadata::new(chunk_id, slice.len() as u64, encoded.len() as u64),
            );
        }

        self.index.insert(
            key.to_string(),
            ChunkedFileMetadata {
                total_size: data.len() as u64,
                chunk_size: self.chunk_size as u64,
                num_chunks,
                chunks,
            },
        );
        if let Err(e) = self.save_index() {
            tracing::warn!(key = %key, error = %e, "failed to persist chunk index");
        }
        Ok(())
    }

    fn unwind_partial_insert(&self, key_dir: &Path) {
        if let Err(e) = fs::remove_dir_all(key_dir) {
            tracing::warn!(dir = %key_dir.display(), error = %e, "failed to clean up partial insert");
        }
    }

    /// Reads chunks `start..=end`, decompresses each at its current tier,
    /// and concatenates. Missing files and codec faults degrade to a
    /// miss; an invalid range is an error. Heat and last_access are
    /// committed only once the whole range is in hand, so a read that
    /// ends up a miss leaves no chunk looking warmer than it is.
    pub fn get_range(
        &mut self,
        key: &str,
        start: u32,
        end: u32,
        tiers: &Tiers,
    ) -> Result<Option<Vec<u8>>> {
        let chunks_dir = self.chunks_dir.clone();
        let Some(file) = self.index.get_mut(key) else {
            return Ok(None);
        };
        if start > end || end >= file.num_chunks {
            return Err(Error::OutOfRange {
                start,
                end,
                num_chunks: file.num_chunks,
            });
        }

        let mut out = Vec::new();
        for chunk_id in start..=end {
            let Some(chunk) = file.chunks.get(&chunk_id) else {
                tracing::warn!(key = %key, chunk_id = chunk_id, "chunk metadata missing");
                return Ok(None);
            };

            let path = chunks_dir.join(key).join(chunk_file_name(chunk_id));
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read chunk file");
                    return Ok(None);
                }
            };

            let algorithm = tiers.algorithm(chunk.tier);
            let plaintext =
                match tiers.decode(chunk.tier, algorithm, &bytes, chunk.original_size as usize) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        tracing::warn!(key = %key, chunk_id = chunk_id, error = %e, "chunk decode failed");
                        return Ok(None);
                    }
                };
            out.extend_from_slice(&plaintext);
        }

        let now = unix_now();
        for chunk_id in start..=end {
            if let Some(chunk) = file.chunks.get_mut(&chunk_id) {
                chunk.heat = heat::bump(chunk.heat);
                chunk.last_access = now;
            }
        }
        Ok(Some(out))
    }

    /// Reads the whole value: exactly `get_range(key, 0, num_chunks - 1)`.
    pub fn get_full(&mut self, key: &str, tiers: &Tiers) -> Result<Option<Vec<u8>>> {
        let Some(file) = self.index.get(key) else {
            return Ok(None);
        };
        if file.num_chunks == 0 {
            return Ok(Some(Vec::new()));
        }
        let last = file.num_chunks - 1;
        self.get_range(key, 0, last, tiers)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn metadata(&self, key: &str) -> Option<&ChunkedFileMetadata> {
        self.index.get(key)
    }

    /// Deletes the key's chunk directory and drops the index entry.
    /// Filesystem failures are reported but do not block the index
    /// deletion.
    pub fn remove(&mut self, key: &str) -> bool {
        if self.index.remove(key).is_none() {
            return false;
        }
        let key_dir = self.chunks_dir.join(key);
        if key_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&key_dir) {
                tracing::warn!(dir = %key_dir.display(), error = %e, "failed to remove chunk directory");
            }
        }
        if let Err(e) = self.save_index() {
            tracing::warn!(key = %key, error = %e, "failed to persist chunk index");
        }
        true
    }

    /// Applies one decay tick to every chunk. A chunk whose cooled (or
    /// warmed) heat maps to a different tier is recompressed under the
    /// new tier's algorithm; its tier field only changes once the
    /// rewritten file is in place, so the metadata never claims an
    /// encoding the file does not have.
    pub fn decay(&mut self, strategy: HeatDecayStrategy, now: u64, tiers: &Tiers) {
        let chunks_dir = self.chunks_dir.clone();
        for (key, file) in &mut self.index {
            for chunk in file.chunks.values_mut() {
                chunk.heat = strategy.apply(chunk.heat, chunk.last_access, now);
                let target = heat::tier_for_heat(chunk.heat);
                if target != chunk.tier {
                    retier_chunk(&chunks_dir, key, chunk, target, tiers);
                }
            }
        }
    }

    /// Persists the index stream.
    pub fn save_index(&self) -> Result<()> {
        meta::save(&self.chunks_dir.join(INDEX_FILE), &self.index)
    }

    /// On-disk bytes held by the chunk tree, index included.
    pub fn storage_size(&self) -> u64 {
        fsutil::dir_size(&self.chunks_dir)
    }
}

/// Decode-then-encode rewrite of one chunk file into `target`'s
/// algorithm. Failures leave the chunk (file and metadata) as it was.
fn retier_chunk(
    chunks_dir: &Path,
    key: &str,
    chunk: &mut ChunkMetadata,
    target: Tier,
    tiers: &Tiers,
) {
    let path = chunks_dir.join(key).join(chunk_file_name(chunk.chunk_id));
    let result = (|| -> Result<u64> {
        let bytes = fs::read(&path)?;
        let algorithm = tiers.algorithm(chunk.tier);
        let plaintext = tiers.decode(chunk.tier, algorithm, &bytes, chunk.original_size as usize)?;
        let encoded = tiers.encode(target, &plaintext)?;
        let len = encoded.len() as u64;
        fsutil::write_atomic(&path, &encoded)?;
        Ok(len)
    })();

    match result {
        Ok(compressed_size) => {
            chunk.tier = target;
            chunk.compressed_size = compressed_size;
        }
        Err(e) => {
            tracing::warn!(
                key = %key,
                chunk_id = chunk.chunk_id,
                error = %e,
                "chunk recompression failed, keeping old tier"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heat::{HEAT_MAX, INITIAL_HEAT};
    use crate::tmpfs::TempDir;

    const CHUNK: usize = 1024;

    fn open_store(dir: &TempDir) -> ChunkStore {
        ChunkStore::open(dir.path(), CHUNK).expect("Failed to open chunk store")
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn test_insert_splits_into_chunks() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let data = patterned(4 * CHUNK + 100);

        store.insert("blob", &data, &Tiers::default())?;

        let file = store.metadata("blob").unwrap();
        assert_eq!(file.num_chunks, 5);
        assert_eq!(file.total_size, data.len() as u64);
        assert_eq!(file.chunk_size, CHUNK as u64);
        for chunk_id in 0..5 {
            let chunk = &file.chunks[&chunk_id];
            let expected = if chunk_id == 4 { 100 } else { CHUNK as u64 };
            assert_eq!(chunk.original_size, expected);
            assert_eq!(chunk.tier, Tier::T4);
            assert!(dir
                .path()
                .join("chunks/blob")
                .join(chunk_file_name(chunk_id))
                .exists());
        }
        Ok(())
    }

    #[test]
    fn test_exact_multiple_fills_last_chunk() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);

        store.insert("blob", &patterned(3 * CHUNK), &Tiers::default())?;
        let file = store.metadata("blob").unwrap();
        assert_eq!(file.num_chunks, 3);
        assert_eq!(file.chunks[&2].original_size, CHUNK as u64);
        Ok(())
    }

    #[test]
    fn test_range_reads() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        let data = patterned(4 * CHUNK);
        store.insert("blob", &data, &tiers)?;

        // Whole file.
        assert_eq!(store.get_full("blob", &tiers)?, Some(data.clone()));

        // Interior range equals the plaintext slice.
        let range = store.get_range("blob", 1, 2, &tiers)?.unwrap();
        assert_eq!(range, data[CHUNK..3 * CHUNK]);

        // Single chunk.
        let one = store.get_range("blob", 3, 3, &tiers)?.unwrap();
        assert_eq!(one, data[3 * CHUNK..]);
        Ok(())
    }

    #[test]
    fn test_invalid_ranges() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        store.insert("blob", &patterned(2 * CHUNK), &tiers)?;

        assert!(matches!(
            store.get_range("blob", 0, 2, &tiers),
            Err(Error::OutOfRange { num_chunks: 2, .. })
        ));
        assert!(matches!(
            store.get_range("blob", 1, 0, &tiers),
            Err(Error::OutOfRange { .. })
        ));

        // An unknown key is a miss, not a range error.
        assert_eq!(store.get_range("ghost", 0, 0, &tiers)?, None);
        Ok(())
    }

    #[test]
    fn test_range_read_bumps_touched_chunks_only() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        store.insert("blob", &patterned(3 * CHUNK), &tiers)?;

        store.get_range("blob", 0, 1, &tiers)?;

        let file = store.metadata("blob").unwrap();
        assert_eq!(file.chunks[&0].heat, INITIAL_HEAT + HEAT_MAX / 10);
        assert_eq!(file.chunks[&1].heat, INITIAL_HEAT + HEAT_MAX / 10);
        assert_eq!(file.chunks[&2].heat, INITIAL_HEAT);
        assert!(file.chunks[&0].last_access > 0);
        assert_eq!(file.chunks[&2].last_access, 0);
        Ok(())
    }

    #[test]
    fn test_missing_chunk_file_is_a_miss() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        store.insert("blob", &patterned(2 * CHUNK), &tiers)?;

        fs::remove_file(dir.path().join("chunks/blob").join(chunk_file_name(1))).unwrap();

        assert_eq!(store.get_range("blob", 1, 1, &tiers)?, None);

        // A miss partway through the range leaves the chunks read before
        // it unbumped.
        assert_eq!(store.get_range("blob", 0, 1, &tiers)?, None);
        assert_eq!(store.metadata("blob").unwrap().chunks[&0].heat, INITIAL_HEAT);
        assert_eq!(store.metadata("blob").unwrap().chunks[&0].last_access, 0);

        // The intact chunk still reads.
        assert!(store.get_range("blob", 0, 0, &tiers)?.is_some());
        Ok(())
    }

    #[test]
    fn test_remove_deletes_directory_and_index() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        store.insert("blob", &patterned(2 * CHUNK), &tiers)?;

        assert!(store.remove("blob"));
        assert!(!store.remove("blob"));
        assert!(!store.contains("blob"));
        assert!(!dir.path().join("chunks/blob").exists());
        assert_eq!(store.get_full("blob", &tiers)?, None);
        Ok(())
    }

    #[test]
    fn test_reinsert_replaces_old_chunks() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();

        store.insert("blob", &patterned(3 * CHUNK), &tiers)?;
        store.insert("blob", &patterned(CHUNK), &tiers)?;

        let file = store.metadata("blob").unwrap();
        assert_eq!(file.num_chunks, 1);
        // Stale files from the wider first insert are gone.
        assert!(!dir
            .path()
            .join("chunks/blob")
            .join(chunk_file_name(2))
            .exists());
        assert_eq!(store.get_full("blob", &tiers)?, Some(patterned(CHUNK)));
        Ok(())
    }

    #[test]
    fn test_index_survives_reopen() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tiers = Tiers::default();
        let data = patterned(2 * CHUNK + 17);

        {
            let mut store = open_store(&dir);
            store.insert("blob", &data, &tiers)?;
        }

        let mut store = open_store(&dir);
        assert!(store.contains("blob"));
        assert_eq!(store.get_full("blob", &tiers)?, Some(data));
        Ok(())
    }

    #[test]
    fn test_decay_recompresses_on_tier_change() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open_store(&dir);
        let tiers = Tiers::default();
        let data = patterned(CHUNK);
        store.insert("blob", &data, &tiers)?;

        // Seven reads push the chunk's heat to 800; its tier is still T4
        // because reads never retier.
        for _ in 0..7 {
            store.get_range("blob", 0, 0, &tiers)?;
        }
        assert_eq!(store.metadata("blob").unwrap().chunks[&0].tier, Tier::T4);

        // Decay barely cools it; 799 maps to T0, so the chunk gets
        // rewritten hot (T0 binds to no compression).
        store.decay(
            HeatDecayStrategy::Linear { amount: 1 },
            unix_now(),
            &tiers,
        );

        let chunk = &store.metadata("blob").unwrap().chunks[&0];
        assert_eq!(chunk.tier, Tier::T0);
        assert_eq!(chunk.compressed_size, CHUNK as u64);
        let on_disk = fs::read(dir.path().join("chunks/blob").join(chunk_file_name(0))).unwrap();
        assert_eq!(on_disk, data, "a T0 chunk file holds plaintext");

        assert_eq!(store.get_range("blob", 0, 0, &tiers)?, Some(data));
        Ok(())
    }
}
