//! Transparent compression for large coordination payloads.
//!
//! Payloads above a size threshold are gzipped and base64-encoded for safe
//! transport. Compression is only kept when it actually shrinks the encoded
//! payload, so incompressible inputs pass through unchanged.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use sc_domain::error::{Error, Result};

/// Default threshold above which payloads are compressed (10 KiB).
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 10 * 1024;

/// Compression method applied to a wire payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// The `compression=` content-type parameter value, if any.
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
        }
    }

    /// Parse a `compression=` parameter value.
    pub fn from_param(value: &str) -> Result<Self> {
        match value {
            "gzip" => Ok(Self::Gzip),
            other => Err(Error::InvalidCompression(other.to_owned())),
        }
    }
}

/// Compress a payload if it exceeds `threshold` bytes (UTF-8 length).
///
/// Returns the wire body and the method applied. Base64 adds ~33 %
/// overhead, so gzip is only used when the encoded result is strictly
/// smaller than the original.
pub fn compress(data: &str, threshold: usize) -> (String, Compression) {
    let bytes = data.as_bytes();
    if bytes.len() <= threshold {
        return (data.to_owned(), Compression::None);
    }

    let compressed = gzip_bytes(bytes);
    let Ok(compressed) = compressed else {
        return (data.to_owned(), Compression::None);
    };

    let encoded = BASE64.encode(compressed);
    if encoded.len() >= data.len() {
        return (data.to_owned(), Compression::None);
    }
    (encoded, Compression::Gzip)
}

/// Invert [`compress`].
pub fn decompress(data: &str, method: Compression) -> Result<String> {
    match method {
        Compression::None => Ok(data.to_owned()),
        Compression::Gzip => {
            let compressed = BASE64
                .decode(data)
                .map_err(|e| Error::Parse(format!("bad base64 in gzip payload: {e}")))?;
            let mut decoder = GzDecoder::new(compressed.as_slice());
            let mut out = String::new();
            decoder
                .read_to_string(&mut out)
                .map_err(|e| Error::Parse(format!("gzip decompression failed: {e}")))?;
            Ok(out)
        }
    }
}

/// Cheap pre-check for callers deciding whether compression is worth it.
/// JSON/text typically compresses to 20–40 % of its original size.
pub fn estimate_compressed_size(data: &str) -> usize {
    (data.len() as f64 * 0.35) as usize
}

fn gzip_bytes(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
