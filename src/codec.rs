use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errcorrupt;
use crate::error::{Error, Result};

/// Compression algorithm identifiers.
///
/// All six are raw byte streams without framing, so decompression must be
/// told the expected plaintext length up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Identity; encode and decode are pass-through.
    None,
    /// LZ4 fast mode.
    Lz4Fast,
    /// LZ4 high-compression (HC) mode.
    Lz4High,
    /// ZSTD level 3.
    ZstdFast,
    /// ZSTD level 10.
    ZstdMedium,
    /// ZSTD level 19.
    ZstdMax,
}

const ZSTD_FAST_LEVEL: i32 = 3;
const ZSTD_MEDIUM_LEVEL: i32 = 10;
const ZSTD_MAX_LEVEL: i32 = 19;
const LZ4_HC_LEVEL: i32 = 12;

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::None,
        Algorithm::Lz4Fast,
        Algorithm::Lz4High,
        Algorithm::ZstdFast,
        Algorithm::ZstdMedium,
        Algorithm::ZstdMax,
    ];

    /// The on-disk tag for this algorithm.
    pub fn as_u8(self) -> u8 {
        match self {
            Algorithm::None => 0,
            Algorithm::Lz4Fast => 1,
            Algorithm::Lz4High => 2,
            Algorithm::ZstdFast => 3,
            Algorithm::ZstdMedium => 4,
            Algorithm::ZstdMax => 5,
        }
    }

    /// Decodes an on-disk algorithm tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Algorithm::None),
            1 => Ok(Algorithm::Lz4Fast),
            2 => Ok(Algorithm::Lz4High),
            3 => Ok(Algorithm::ZstdFast),
            4 => Ok(Algorithm::ZstdMedium),
            5 => Ok(Algorithm::ZstdMax),
            tag => Err(errcorrupt!("unknown algorithm tag {tag}")),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::None => "none",
            Algorithm::Lz4Fast => "lz4-fast",
            Algorithm::Lz4High => "lz4-high",
            Algorithm::ZstdFast => "zstd-fast",
            Algorithm::ZstdMedium => "zstd-medium",
            Algorithm::ZstdMax => "zstd-max",
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn codec_err(algorithm: Algorithm, err: impl Display) -> Error {
    Error::Codec {
        algorithm,
        reason: err.to_string(),
    }
}

/// Compresses `data` with the given algorithm.
///
/// Total for well-formed inputs within the backing library's bound; the
/// output carries no framing and is only recoverable together with the
/// plaintext length.
pub fn encode(algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    match algorithm {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Lz4Fast => {
            lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), false)
                .map_err(|e| codec_err(algorithm, e))
        }
        Algorithm::Lz4High => lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(LZ4_HC_LEVEL)),
            false,
        )
        .map_err(|e| codec_err(algorithm, e)),
        Algorithm::ZstdFast => {
            zstd::bulk::compress(data, ZSTD_FAST_LEVEL).map_err(|e| codec_err(algorithm, e))
        }
        Algorithm::ZstdMedium => {
            zstd::bulk::compress(data, ZSTD_MEDIUM_LEVEL).map_err(|e| codec_err(algorithm, e))
        }
        Algorithm::ZstdMax => {
            zstd::bulk::compress(data, ZSTD_MAX_LEVEL).map_err(|e| codec_err(algorithm, e))
        }
    }
}

/// Decompresses `data`, which must be the output of [`encode`] with the
/// same algorithm, into exactly `original_size` plaintext bytes.
pub fn decode(algorithm: Algorithm, data: &[u8], original_size: usize) -> Result<Vec<u8>> {
    if original_size == 0 {
        return Ok(Vec::new());
    }
    let out = match algorithm {
        Algorithm::None => data.to_vec(),
        Algorithm::Lz4Fast | Algorithm::Lz4High => {
            lz4::block::decompress(data, Some(original_size as i32))
                .map_err(|e| codec_err(algorithm, e))?
        }
        Algorithm::ZstdFast | Algorithm::ZstdMedium | Algorithm::ZstdMax => {
            zstd::bulk::decompress(data, original_size).map_err(|e| codec_err(algorithm, e))?
        }
    };
    if out.len() != original_size {
        return Err(codec_err(
            algorithm,
            format!("decoded {} bytes, expected {original_size}", out.len()),
        ));
    }
    Ok(out)
}
