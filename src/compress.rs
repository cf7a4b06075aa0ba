//! Payload compression.
//!
//! Every tile and attribute-chunk record in the payload region starts
//! with a 1-byte discriminant followed by the (possibly) compressed
//! bytes. The record carries no length of its own; sizes are recovered
//! from the footer index.

use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::{Read, Write};

/// Compression applied to a payload record, tagged by the on-disk
/// discriminant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// Identity: the record bytes are the raw data.
    None = 0,

    /// zlib deflate at maximum compression level.
    Zlib = 1,
}

impl CompressionType {
    /// Decode a discriminant byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zlib),
            _ => Err(Error::codec(format!("unknown compression discriminant {}", value))),
        }
    }
}

/// Compress `input` according to `ctype`.
///
/// For [`CompressionType::None`] the input is returned borrowed; no
/// copy is made.
pub fn compress(ctype: CompressionType, input: &[u8]) -> Result<Cow<'_, [u8]>> {
    match ctype {
        CompressionType::None => Ok(Cow::Borrowed(input)),
        CompressionType::Zlib => {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(input.len() / 2), Compression::best());
            encoder
                .write_all(input)
                .map_err(|e| Error::codec(format!("zlib deflate failed: {}", e)))?;
            let out = encoder
                .finish()
                .map_err(|e| Error::codec(format!("zlib deflate failed: {}", e)))?;
            Ok(Cow::Owned(out))
        }
    }
}

/// Decompress `input` into `out`, which must be exactly the expected
/// uncompressed length. Fails if the stream is shorter or longer.
pub fn decompress_into(ctype: CompressionType, input: &[u8], out: &mut [u8]) -> Result<()> {
    match ctype {
        CompressionType::None => {
            if input.len() != out.len() {
                return Err(Error::codec(format!(
                    "uncompressed record is {} bytes, expected {}",
                    input.len(),
                    out.len()
                )));
            }
            out.copy_from_slice(input);
            Ok(())
        }
        CompressionType::Zlib => {
            let mut decoder = ZlibDecoder::new(input);
            decoder
                .read_exact(out)
                .map_err(|e| Error::codec(format!("zlib inflate failed: {}", e)))?;
            let mut probe = [0u8; 1];
            match decoder.read(&mut probe) {
                Ok(0) => Ok(()),
                Ok(_) => Err(Error::codec("zlib stream longer than expected")),
                Err(e) => Err(Error::codec(format!("zlib inflate failed: {}", e))),
            }
        }
    }
}

/// Decompress a record whose uncompressed length is not recorded
/// (string attribute chunks). Streams to the end of the zlib stream.
pub fn decompress_unsized(ctype: CompressionType, input: &[u8]) -> Result<Vec<u8>> {
    match ctype {
        CompressionType::None => Ok(input.to_vec()),
        CompressionType::Zlib => {
            let mut decoder = ZlibDecoder::new(input);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::codec(format!("zlib inflate failed: {}", e)))?;
            Ok(out)
        }
    }
}
