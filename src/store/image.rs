use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::fsutil;
use crate::meta::read_key;

/// Encodes the inline key/value map as the data.db stream: concatenated
/// `key_len | key | val_len | val` records, no header.
pub fn encode(data: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (key, value) in data {
        buf.write_u32::<LittleEndian>(key.len() as u32).unwrap();
        buf.extend_from_slice(key.as_bytes());
        buf.write_u32::<LittleEndian>(value.len() as u32).unwrap();
        buf.extend_from_slice(value);
    }
    buf
}

/// Decodes a data.db stream. End-of-file terminates iteration; a record
/// cut off mid-way is discarded with a warning and everything before it
/// is kept.
pub fn decode(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut cursor = Cursor::new(bytes);
    let mut data = BTreeMap::new();

    while (cursor.position() as usize) < bytes.len() {
        let record = read_record(&mut cursor);
        match record {
            Some((key, value)) => {
                data.insert(key, value);
            }
            None => {
                tracing::warn!(
                    kept = data.len(),
                    offset = cursor.position(),
                    "data image truncated, discarding tail record"
                );
                break;
            }
        }
    }
    data
}

fn read_record(cursor: &mut Cursor<&[u8]>) -> Option<(String, Vec<u8>)> {
    let key = read_key(cursor).ok()?;
    let val_len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let start = cursor.position() as usize;
    let bytes = cursor.get_ref();
    if start + val_len > bytes.len() {
        return None;
    }
    let value = bytes[start..start + val_len].to_vec();
    cursor.set_position((start + val_len) as u64);
    Some((key, value))
}

/// Loads the data image from `path`; a missing file is an empty store.
pub fn load(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(decode(&bytes))
}

/// Writes the data image to `path` via a temp-file rename.
pub fn save(path: &Path, data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    fsutil::write_atomic(path, &encode(data))?;
    Ok(())
}
