//! Creation options and pixel data types.

use crate::compress::CompressionType;
use crate::error::{Error, Result};

/// Default edge length of a tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Pixel data types storable in a container.
///
/// The discriminants are the on-disk codes written to the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum DataType {
    /// Unsigned 8-bit integer.
    U8 = 1,
    /// Signed 8-bit integer.
    I8 = 2,
    /// Unsigned 16-bit integer.
    U16 = 3,
    /// Signed 16-bit integer.
    I16 = 4,
    /// Unsigned 32-bit integer.
    U32 = 5,
    /// Signed 32-bit integer.
    I32 = 6,
    /// Unsigned 64-bit integer.
    U64 = 7,
    /// Signed 64-bit integer.
    I64 = 8,
    /// 32-bit IEEE-754 float.
    F32 = 9,
    /// 64-bit IEEE-754 float.
    F64 = 10,
}

impl DataType {
    /// Size of one element of this type in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Decode an on-disk type code.
    pub fn from_u64(value: u64) -> Result<Self> {
        match value {
            1 => Ok(DataType::U8),
            2 => Ok(DataType::I8),
            3 => Ok(DataType::U16),
            4 => Ok(DataType::I16),
            5 => Ok(DataType::U32),
            6 => Ok(DataType::I32),
            7 => Ok(DataType::U64),
            8 => Ok(DataType::I64),
            9 => Ok(DataType::F32),
            10 => Ok(DataType::F64),
            _ => Err(Error::open_failed(format!("unknown data type code {}", value))),
        }
    }
}

/// Options for creating a new container.
///
/// Raster geometry is fixed at creation; the remaining fields have
/// defaults and can be set builder-style:
///
/// ```
/// use emu::{CreateOptions, DataType, CompressionType};
///
/// let opts = CreateOptions::new(1024, 768, 3, DataType::U16)
///     .tile_size(256)
///     .compression(CompressionType::Zlib);
/// assert_eq!(opts.tile_size, 256);
/// ```
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Raster width in pixels.
    pub width: u64,

    /// Raster height in pixels.
    pub height: u64,

    /// Number of bands. May be zero.
    pub band_count: u64,

    /// Pixel data type shared by all bands.
    pub data_type: DataType,

    /// Edge length of a (square) tile in pixels.
    /// Default: 512
    pub tile_size: u32,

    /// Compression applied to tile and attribute-chunk payloads.
    /// Default: CompressionType::Zlib
    pub compression: CompressionType,

    /// Whether the file is laid out coarse-to-fine for progressive
    /// streaming. Set by the copy pipeline; plain creation defaults
    /// to false because the application controls tile order.
    pub cloud_optimised: bool,

    /// Whether bands hold categorical (thematic) data.
    /// Default: false
    pub thematic: bool,
}

impl CreateOptions {
    /// Creates options for a raster of the given geometry with default
    /// tiling and compression.
    pub fn new(width: u64, height: u64, band_count: u64, data_type: DataType) -> Self {
        Self {
            width,
            height,
            band_count,
            data_type,
            tile_size: DEFAULT_TILE_SIZE,
            compression: CompressionType::Zlib,
            cloud_optimised: false,
            thematic: false,
        }
    }

    /// Sets the tile edge length.
    pub fn tile_size(mut self, size: u32) -> Self {
        self.tile_size = size;
        self
    }

    /// Sets the payload compression.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Marks the file as cloud-optimised.
    pub fn cloud_optimised(mut self, value: bool) -> Self {
        self.cloud_optimised = value;
        self
    }

    /// Marks the bands as thematic.
    pub fn thematic(mut self, value: bool) -> Self {
        self.thematic = value;
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::open_failed("raster dimensions must be at least 1x1"));
        }
        if self.tile_size == 0 {
            return Err(Error::open_failed("tile_size must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DataType::U8.element_size(), 1);
        assert_eq!(DataType::I16.element_size(), 2);
        assert_eq!(DataType::F32.element_size(), 4);
        assert_eq!(DataType::F64.element_size(), 8);
    }

    #[test]
    fn test_data_type_round_trip() {
        for code in 1..=10u64 {
            let dt = DataType::from_u64(code).unwrap();
            assert_eq!(dt as u64, code);
        }
        assert!(DataType::from_u64(0).is_err());
        assert!(DataType::from_u64(11).is_err());
    }

    #[test]
    fn test_options_defaults() {
        let opts = CreateOptions::new(100, 50, 1, DataType::U8);
        assert_eq!(opts.tile_size, DEFAULT_TILE_SIZE);
        assert_eq!(opts.compression, CompressionType::Zlib);
        assert!(!opts.cloud_optimised);
        assert!(!opts.thematic);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = CreateOptions::new(100, 50, 2, DataType::F64)
            .tile_size(64)
            .compression(CompressionType::None)
            .thematic(true);
        assert_eq!(opts.tile_size, 64);
        assert_eq!(opts.compression, CompressionType::None);
        assert!(opts.thematic);
    }

    #[test]
    fn test_options_validation() {
        assert!(CreateOptions::new(0, 10, 1, DataType::U8).validate().is_err());
        assert!(CreateOptions::new(10, 10, 1, DataType::U8).tile_size(0).validate().is_err());
        // zero bands is a legal degenerate container
        assert!(CreateOptions::new(10, 10, 0, DataType::U8).validate().is_ok());
    }
}
