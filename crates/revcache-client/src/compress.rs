//! Value compression.
//!
//! The codec set is closed: `none` or `zlib`. Stored states carry a one-byte
//! tag so retrieval never depends on the currently configured codec — a
//! cache populated with compression on can be read with it off, and
//! snapshots round-trip stored bytes untouched.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use thiserror::Error;

/// States below this size are stored raw even when zlib is configured;
/// deflate overhead dominates on tiny payloads.
pub const COMPRESSION_THRESHOLD: usize = 128;

const TAG_RAW: u8 = 0;
const TAG_ZLIB: u8 = 1;

/// The recognized value codecs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Zlib,
}

impl Compression {
    /// Parse a configuration string (`"none"` or `"zlib"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "zlib" => Some(Self::Zlib),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
        }
    }
}

/// A stored state failed to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown value codec tag {0}")]
    UnknownTag(u8),
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("stored value is empty")]
    Empty,
}

/// Encode a raw state for storage. Compression is applied only when the
/// codec asks for it, the state clears the size threshold, and the result is
/// actually smaller than storing raw.
pub fn encode(codec: Compression, raw: &[u8]) -> Vec<u8> {
    if codec == Compression::Zlib && raw.len() >= COMPRESSION_THRESHOLD {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(raw.len() / 2 + 1),
            flate2::Compression::default(),
        );
        // Writing to a Vec cannot fail.
        let compressed = encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        if !compressed.is_empty() && compressed.len() < raw.len() {
            let mut stored = Vec::with_capacity(compressed.len() + 1);
            stored.push(TAG_ZLIB);
            stored.extend_from_slice(&compressed);
            return stored;
        }
    }
    let mut stored = Vec::with_capacity(raw.len() + 1);
    stored.push(TAG_RAW);
    stored.extend_from_slice(raw);
    stored
}

/// Decode a stored state back to raw bytes.
pub fn decode(stored: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let (&tag, body) = stored.split_first().ok_or(DecodeError::Empty)?;
    match tag {
        TAG_RAW => Ok(body.to_vec()),
        TAG_ZLIB => {
            let mut raw = Vec::with_capacity(body.len() * 2);
            ZlibDecoder::new(body).read_to_end(&mut raw)?;
            Ok(raw)
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}
