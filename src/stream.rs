//! Byte-stream abstraction and object-store sizing.
//!
//! The container never rewrites payload bytes once written, so any
//! seek-on-read, append-on-write sink works: a local file, a pipe
//! feeding an object-store multipart upload, or an in-memory buffer.
//! The host owns the sink implementation; this module only defines the
//! trait the container consumes and the part-size rule for multipart
//! targets.

use crate::config::DataType;
use crate::error::{Error, Result};
use std::io::{Read, Seek, Write};

/// The byte stream a container reads and writes.
///
/// Implemented for free by `std::fs::File`, `std::io::Cursor<Vec<u8>>`
/// and any host-provided sink.
pub trait ByteStream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> ByteStream for T {}

/// Smallest multipart part size accepted, 50 MiB.
pub const MIN_PART_SIZE: u64 = 50 * 1024 * 1024;

/// Largest part size the object store accepts, 5 GiB.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 1000;

/// URI schemes recognised as object-store targets.
const OBJECT_STORE_PREFIXES: [&str; 4] = ["s3://", "gs://", "/vsis3/", "/vsigs/"];

/// Whether `path` names an object-store target rather than a local file.
pub fn is_object_store_uri(path: &str) -> bool {
    OBJECT_STORE_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Rough size of the finished file: half the raw pixel bytes, assuming
/// typical zlib ratios on imagery.
pub fn expected_file_size(width: u64, height: u64, bands: u64, data_type: DataType) -> u64 {
    width * height * bands * data_type.element_size() as u64 / 2
}

/// Chooses the multipart part size for an upload of `expected` bytes.
///
/// The store allows at most [`MAX_PARTS`] parts of at most
/// [`MAX_PART_SIZE`] each, so the part size is the expected size
/// divided across the full part budget, floored at [`MIN_PART_SIZE`].
/// Files that cannot fit even with maximum-size parts fail.
pub fn multipart_part_size(expected: u64) -> Result<u64> {
    let needed = expected.div_ceil(MAX_PARTS);
    if needed > MAX_PART_SIZE {
        return Err(Error::open_failed(format!(
            "expected file size {} exceeds the {}-part x {} byte multipart limit",
            expected, MAX_PARTS, MAX_PART_SIZE
        )));
    }
    Ok(needed.max(MIN_PART_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_detection() {
        assert!(is_object_store_uri("s3://bucket/key.emu"));
        assert!(is_object_store_uri("/vsis3/bucket/key.emu"));
        assert!(is_object_store_uri("gs://bucket/key.emu"));
        assert!(!is_object_store_uri("/data/raster.emu"));
        assert!(!is_object_store_uri("relative/raster.emu"));
    }

    #[test]
    fn test_expected_file_size() {
        // 1000 x 1000 x 2 bands x 2 bytes / 2
        assert_eq!(expected_file_size(1000, 1000, 2, DataType::U16), 2_000_000);
    }

    #[test]
    fn test_part_size_floor() {
        // tiny file still gets the 50 MiB floor
        assert_eq!(multipart_part_size(1024).unwrap(), MIN_PART_SIZE);
        assert_eq!(multipart_part_size(MIN_PART_SIZE * MAX_PARTS).unwrap(), MIN_PART_SIZE);
    }

    #[test]
    fn test_part_size_scales_with_file() {
        let expected = 100 * 1024 * 1024 * 1024; // 100 GiB
        let part = multipart_part_size(expected).unwrap();
        assert!(part > MIN_PART_SIZE);
        assert!(part * MAX_PARTS >= expected);
    }

    #[test]
    fn test_part_size_ceiling() {
        // just inside the limit
        assert_eq!(multipart_part_size(MAX_PART_SIZE * MAX_PARTS).unwrap(), MAX_PART_SIZE);
        // one byte over fails
        assert!(multipart_part_size(MAX_PART_SIZE * MAX_PARTS + 1).is_err());
    }
}
