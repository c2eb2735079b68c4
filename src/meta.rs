use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::Algorithm;
use crate::errcorrupt;
use crate::error::Result;
use crate::fsutil;
use crate::heat::{HEAT_MAX, INITIAL_HEAT};
use crate::tier::Tier;

/// Per-key bookkeeping for an inline value. The stored blob is always the
/// output of encoding the plaintext with `algorithm`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeMetadata {
    /// Successful reads of this key.
    pub access_count: u64,
    /// Wall-clock seconds of the last read or the insert.
    pub last_access: u64,
    /// Current compression tier.
    pub tier: Tier,
    /// Algorithm the stored bytes were encoded with.
    pub algorithm: Algorithm,
    /// Plaintext length; directs the decompression output buffer.
    pub original_size: u64,
    /// Stored ciphertext length.
    pub compressed_size: u64,
    /// Access-recency score in [0, HEAT_MAX].
    pub heat: u32,
    /// Cleared only for records loaded from pre-heat images; such records
    /// are retiered by access count on their first reorganization. Not
    /// persisted.
    pub heat_seeded: bool,
}

impl NodeMetadata {
    pub fn new(
        tier: Tier,
        algorithm: Algorithm,
        original_size: u64,
        compressed_size: u64,
        now: u64,
    ) -> Self {
        Self {
            access_count: 0,
            last_access: now,
            tier,
            algorithm,
            original_size,
            compressed_size,
            heat: INITIAL_HEAT,
            heat_seeded: true,
        }
    }
}

/// The metadata.db image: global counters followed by one record per
/// inline key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataImage {
    pub total_accesses: u64,
    pub ops_since_reorg: u64,
    pub last_reorg_time: u64,
    pub entries: BTreeMap<String, NodeMetadata>,
}

/// Encodes the metadata.db stream from its parts.
pub fn encode_parts(
    total_accesses: u64,
    ops_since_reorg: u64,
    last_reorg_time: u64,
    entries: &BTreeMap<String, NodeMetadata>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(total_accesses).unwrap();
    buf.write_u64::<LittleEndian>(ops_since_reorg).unwrap();
    buf.write_u64::<LittleEndian>(last_reorg_time).unwrap();
    buf.write_u32::<LittleEndian>(entries.len() as u32).unwrap();

    for (key, meta) in entries {
        buf.write_u32::<LittleEndian>(key.len() as u32).unwrap();
        buf.extend_from_slice(key.as_bytes());
        buf.write_u64::<LittleEndian>(meta.access_count).unwrap();
        buf.write_u64::<LittleEndian>(meta.last_access).unwrap();
        buf.push(meta.tier.as_u8());
        buf.push(meta.algorithm.as_u8());
        buf.write_u64::<LittleEndian>(meta.original_size).unwrap();
        buf.write_u64::<LittleEndian>(meta.compressed_size).unwrap();
        buf.write_u32::<LittleEndian>(meta.heat).unwrap();
    }
    buf
}

impl MetadataImage {
    pub fn encode(&self) -> Vec<u8> {
        encode_parts(
            self.total_accesses,
            self.ops_since_reorg,
            self.last_reorg_time,
            &self.entries,
        )
    }

    /// Decodes an image, accepting both the current record shape and the
    /// pre-heat one.
    ///
    /// The format carries no version tag, so the shape is detected by
    /// exact consumption: the current shape is tried first, then the
    /// pre-heat shape (heat defaulted, legacy retiering flagged). If
    /// neither consumes the stream exactly, the longest cleanly parsed
    /// record prefix wins and the truncated tail is discarded.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if let Ok(image) = Self::decode_shape(bytes, true, true) {
            return Ok(image);
        }
        if let Ok(image) = Self::decode_shape(bytes, false, true) {
            return Ok(image);
        }
        let image = Self::decode_shape(bytes, true, false)?;
        tracing::warn!(
            parsed = image.entries.len(),
            "metadata image truncated, discarding tail records"
        );
        Ok(image)
    }

    fn decode_shape(bytes: &[u8], with_heat: bool, strict: bool) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let total_accesses = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| errcorrupt!("metadata image shorter than its header"))?;
        let ops_since_reorg = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| errcorrupt!("metadata image shorter than its header"))?;
        let last_reorg_time = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| errcorrupt!("metadata image shorter than its header"))?;
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| errcorrupt!("metadata image shorter than its header"))?;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            match read_record(&mut cursor, with_heat) {
                Ok((key, meta)) => {
                    entries.insert(key, meta);
                }
                Err(e) if strict => return Err(e),
                Err(_) => break,
            }
        }

        if strict && cursor.position() != bytes.len() as u64 {
            return Err(errcorrupt!(
                "metadata image has {} trailing bytes",
                bytes.len() as u64 - cursor.position()
            ));
        }

        Ok(Self {
            total_accesses,
            ops_since_reorg,
            last_reorg_time,
            entries,
        })
    }
}

fn read_record(cursor: &mut Cursor<&[u8]>, with_heat: bool) -> Result<(String, NodeMetadata)> {
    let key = read_key(cursor)?;
    let access_count = cursor.read_u64::<LittleEndian>()?;
    let last_access = cursor.read_u64::<LittleEndian>()?;
    let tier = Tier::from_u8(cursor.read_u8()?)?;
    let algorithm = Algorithm::from_u8(cursor.read_u8()?)?;
    let original_size = cursor.read_u64::<LittleEndian>()?;
    let compressed_size = cursor.read_u64::<LittleEndian>()?;
    // Heat is bounded; a corrupt score clamps rather than propagating.
    let (heat, heat_seeded) = if with_heat {
        (cursor.read_u32::<LittleEndian>()?.min(HEAT_MAX), true)
    } else {
        (INITIAL_HEAT, false)
    };

    Ok((
        key,
        NodeMetadata {
            access_count,
            last_access,
            tier,
            algorithm,
            original_size,
            compressed_size,
            heat,
            heat_seeded,
        },
    ))
}

pub(crate) fn read_key(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len as u64 > remaining {
        return Err(errcorrupt!(
            "key length {len} exceeds remaining {remaining} bytes"
        ));
    }
    let start = cursor.position() as usize;
    let raw = cursor.get_ref()[start..start + len].to_vec();
    cursor.set_position((start + len) as u64);
    String::from_utf8(raw).map_err(|_| errcorrupt!("key is not valid utf-8"))
}

/// Loads the metadata image from `path`. A missing file yields an empty
/// image; the inline map repopulates it through subsequent operations.
pub fn load(path: &Path) -> Result<MetadataImage> {
    if !path.exists() {
        return Ok(MetadataImage::default());
    }
    let bytes = std::fs::read(path)?;
    MetadataImage::decode(&bytes)
}

/// Writes a metadata image to `path` via a temp-file rename.
pub fn save_parts(
    path: &Path,
    total_accesses: u64,
    ops_since_reorg: u64,
    last_reorg_time: u64,
    entries: &BTreeMap<String, NodeMetadata>,
) -> Result<()> {
    fsutil::write_atomic(
        path,
        &encode_parts(total_accesses, ops_since_reorg, last_reorg_time, entries),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> MetadataImage {
        let mut entries = BTreeMap::new();
        entries.insert(
            "alpha".to_string(),
            NodeMetadata {
                access_count: 7,
                last_access: 1_700_000_000,
                tier: Tier::T2,
                algorithm: Algorithm::Lz4High,
                original_size: 512,
                compressed_size: 128,
                heat: 430,
                heat_seeded: true,
            },
        );
        entries.insert(
            "beta".to_string(),
            NodeMetadata::new(Tier::T4, Algorithm::ZstdMax, 64, 80, 1_700_000_100),
        );
        MetadataImage {
            total_accesses: 7,
            ops_since_reorg: 3,
            last_reorg_time: 1_699_999_000,
            entries,
        }
    }

    #[test]
    fn test_image_roundtrip() {
        let image = sample_image();
        let decoded = MetadataImage::decode(&image.encode()).expect("decode failed");
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_pre_heat_image_defaults() {
        // Re-encode the sample without the trailing heat field, as a
        // pre-heat writer would have laid it out.
        let image = sample_image();
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(image.total_accesses).unwrap();
        buf.write_u64::<LittleEndian>(image.ops_since_reorg).unwrap();
        buf.write_u64::<LittleEndian>(image.last_reorg_time).unwrap();
        buf.write_u32::<LittleEndian>(image.entries.len() as u32)
            .unwrap();
        for (key, meta) in &image.entries {
            buf.write_u32::<LittleEndian>(key.len() as u32).unwrap();
            buf.extend_from_slice(key.as_bytes());
            buf.write_u64::<LittleEndian>(meta.access_count).unwrap();
            buf.write_u64::<LittleEndian>(meta.last_access).unwrap();
            buf.push(meta.tier.as_u8());
            buf.push(meta.algorithm.as_u8());
            buf.write_u64::<LittleEndian>(meta.original_size).unwrap();
            buf.write_u64::<LittleEndian>(meta.compressed_size).unwrap();
        }

        let decoded = MetadataImage::decode(&buf).expect("v2 decode failed");
        assert_eq!(decoded.entries.len(), 2);
        for meta in decoded.entries.values() {
            assert_eq!(meta.heat, INITIAL_HEAT);
            assert!(!meta.heat_seeded, "pre-heat records must be flagged");
        }
        assert_eq!(decoded.entries["alpha"].access_count, 7);
    }

    #[test]
    fn test_truncated_tail_is_discarded() {
        let image = sample_image();
        let mut bytes = image.encode();
        bytes.truncate(bytes.len() - 10);

        let decoded = MetadataImage::decode(&bytes).expect("tolerant decode failed");
        assert_eq!(decoded.entries.len(), 1, "tail record should be dropped");
        assert!(decoded.entries.contains_key("alpha"));
    }

    #[test]
    fn test_short_header_is_corruption() {
        assert!(MetadataImage::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let image = load(Path::new("/nonexistent/metadata.db")).unwrap();
        assert!(image.entries.is_empty());
        assert_eq!(image.total_accesses, 0);
    }
}
