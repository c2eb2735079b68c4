use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::codec::Algorithm;

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A compression or decompression call failed. Carries the algorithm
    /// and the reason reported by the underlying library.
    Codec { algorithm: Algorithm, reason: String },
    /// Invalid on-disk data: truncated images, unknown enum tags, or
    /// unexpected internal values.
    Corruption(String),
    /// An IO error.
    IO(String),
    /// An insert targeted a key that already lives in the other namespace
    /// (inline vs chunked). The key must be removed before switching sides.
    KeyKindMismatch(String),
    /// The store directory is exclusively locked by another instance.
    Locked(String),
    /// A chunk-range operation targeted a key that is not chunked.
    NotChunked(String),
    /// An operation was invoked outside the Open lifecycle state.
    NotOpen,
    /// A chunk range violated `0 <= start <= end < num_chunks`.
    OutOfRange {
        start: u32,
        end: u32,
        num_chunks: u32,
    },
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Codec { algorithm, reason } => {
                write!(f, "codec failure ({algorithm}): {reason}")
            }
            Error::Corruption(msg) => write!(f, "corrupt data: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::KeyKindMismatch(key) => {
                write!(f, "key {key:?} already exists in the other namespace")
            }
            Error::Locked(msg) => write!(f, "store directory locked: {msg}"),
            Error::NotChunked(key) => write!(f, "key {key:?} is not chunked"),
            Error::NotOpen => write!(f, "database is not open"),
            Error::OutOfRange {
                start,
                end,
                num_chunks,
            } => write!(
                f,
                "chunk range [{start}, {end}] out of bounds for {num_chunks} chunks"
            ),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}
