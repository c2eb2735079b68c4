use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::fsutil;
use crate::heat::{HEAT_MAX, INITIAL_HEAT};
use crate::meta::read_key;
use crate::tier::Tier;

/// Bookkeeping for one on-disk chunk. The chunk file holds the output of
/// encoding the chunk's plaintext under `tier`'s algorithm.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkMetadata {
    pub chunk_id: u32,
    pub heat: u32,
    pub compressed_size: u64,
    pub original_size: u64,
    /// Offset within the chunk file; zero while each chunk lives in its
    /// own file.
    pub file_offset: u64,
    pub tier: Tier,
    pub last_access: u64,
}

impl ChunkMetadata {
    pub fn new(chunk_id: u32, original_size: u64, compressed_size: u64) -> Self {
        Self {
            chunk_id,
            heat: INITIAL_HEAT,
            compressed_size,
            original_size,
            file_offset: 0,
            tier: Tier::T4,
            last_access: 0,
        }
    }
}

/// Index entry for one chunked key: the split geometry plus per-chunk
/// metadata. Chunk ids are zero-based and contiguous.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedFileMetadata {
    pub total_size: u64,
    pub chunk_size: u64,
    pub num_chunks: u32,
    pub chunks: BTreeMap<u32, ChunkMetadata>,
}

/// Encodes the chunk index as the chunk_metadata.db stream.
pub fn encode(index: &BTreeMap<String, ChunkedFileMetadata>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(index.len() as u32).unwrap();

    for (key, file) in index {
        buf.write_u32::<LittleEndian>(key.len() as u32).unwrap();
        buf.extend_from_slice(key.as_bytes());
        buf.write_u64::<LittleEndian>(file.total_size).unwrap();
        buf.write_u64::<LittleEndian>(file.chunk_size).unwrap();
        buf.write_u32::<LittleEndian>(file.num_chunks).unwrap();
        buf.write_u32::<LittleEndian>(file.chunks.len() as u32)
            .unwrap();

        for chunk in file.chunks.values() {
            buf.write_u32::<LittleEndian>(chunk.chunk_id).unwrap();
            buf.write_u32::<LittleEndian>(chunk.heat).unwrap();
            buf.write_u64::<LittleEndian>(chunk.compressed_size).unwrap();
            buf.write_u64::<LittleEndian>(chunk.original_size).unwrap();
            buf.write_u64::<LittleEndian>(chunk.file_offset).unwrap();
            buf.push(chunk.tier.as_u8());
            buf.write_u64::<LittleEndian>(chunk.last_access).unwrap();
        }
    }
    buf
}

/// Decodes a chunk_metadata.db stream. A file entry cut off mid-way is
/// discarded with a warning; entries before it are kept.
pub fn decode(bytes: &[u8]) -> Result<BTreeMap<String, ChunkedFileMetadata>> {
    let mut cursor = Cursor::new(bytes);
    let mut index = BTreeMap::new();

    let num_files = match cursor.read_u32::<LittleEndian>() {
        Ok(n) => n,
        Err(_) => {
            tracing::warn!("chunk index shorter than its header, starting empty");
            return Ok(index);
        }
    };

    for _ in 0..num_files {
        match read_file_entry(&mut cursor) {
            Ok((key, file)) => {
                index.insert(key, file);
            }
            Err(e) => {
                tracing::warn!(
                    kept = index.len(),
                    error = %e,
                    "chunk index truncated, discarding tail entries"
                );
                break;
            }
        }
    }
    Ok(index)
}

fn read_file_entry(cursor: &mut Cursor<&[u8]>) -> Result<(String, ChunkedFileMetadata)> {
    let key = read_key(cursor)?;
    let total_size = cursor.read_u64::<LittleEndian>()?;
    let chunk_size = cursor.read_u64::<LittleEndian>()?;
    let num_chunks = cursor.read_u32::<LittleEndian>()?;
    let num_chunk_meta = cursor.read_u32::<LittleEndian>()?;

    let mut chunks = BTreeMap::new();
    for _ in 0..num_chunk_meta {
        let chunk_id = cursor.read_u32::<LittleEndian>()?;
        let heat = cursor.read_u32::<LittleEndian>()?.min(HEAT_MAX);
        let compressed_size = cursor.read_u64::<LittleEndian>()?;
        let original_size = cursor.read_u64::<LittleEndian>()?;
        let file_offset = cursor.read_u64::<LittleEndian>()?;
        let tier = Tier::from_u8(cursor.read_u8()?)?;
        let last_access = cursor.read_u64::<LittleEndian>()?;
        chunks.insert(
            chunk_id,
            ChunkMetadata {
                chunk_id,
                heat,
                compressed_size,
                original_size,
                file_offset,
                tier,
                last_access,
            },
        );
    }

    Ok((
        key,
        ChunkedFileMetadata {
            total_size,
            chunk_size,
            num_chunks,
            chunks,
        },
    ))
}

/// Loads the chunk index from `path`; a missing file is an empty index.
pub fn load(path: &Path) -> Result<BTreeMap<String, ChunkedFileMetadata>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

/// Writes the chunk index to `path` via a temp-file rename.
pub fn save(path: &Path, index: &BTreeMap<String, ChunkedFileMetadata>) -> Result<()> {
    fsutil::write_atomic(path, &encode(index))?;
    Ok(())
}
