//! Band access: per-tile block I/O, statistics, no-data and overviews.
//!
//! A [`Band`] is a non-owning handle into the container. The container
//! owns all band state; handles borrow it and share the container's
//! global mutex for payload I/O. Overviews are exposed as further
//! `Band` handles with a pyramid level greater than zero.
//!
//! ## Tile records
//!
//! ```text
//! [compression: u8][compressed bytes ...]
//! ```
//!
//! A tile's uncompressed form covers only its valid extent: edge tiles
//! narrower or shorter than the nominal tile size are compacted on
//! write and re-expanded into the caller's full-size buffer on read.

use crate::compress;
use crate::config::DataType;
use crate::dataset::{Access, Dataset};
use crate::error::{Error, Result};
use crate::metadata::MetadataList;
use crate::rat::Rat;
use crate::tile::{TileEntry, TileKey};
use log::warn;
use parking_lot::RwLock;
use std::io::{Read, Seek, SeekFrom, Write};

/// Metadata key carrying the thematic/athematic flag through the
/// metadata blob.
const LAYER_TYPE_KEY: &str = "LAYER_TYPE";

/// Per-band summary statistics. All fields are NaN until set.
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    /// Minimum pixel value.
    pub min: f64,
    /// Maximum pixel value.
    pub max: f64,
    /// Mean pixel value.
    pub mean: f64,
    /// Standard deviation of pixel values.
    pub std_dev: f64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self { min: f64::NAN, max: f64::NAN, mean: f64::NAN, std_dev: f64::NAN }
    }
}

/// Geometry of one overview (pyramid) level of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverviewDesc {
    /// Width of the overview in pixels.
    pub x_size: u64,
    /// Height of the overview in pixels.
    pub y_size: u64,
    /// Tile edge length of the overview in pixels.
    pub tile_size: u32,
}

/// Mutable band state owned by the container.
#[derive(Debug, Default)]
pub(crate) struct BandState {
    pub(crate) meta: RwLock<BandMeta>,
}

/// The fields behind a band's metadata lock.
#[derive(Debug, Default)]
pub(crate) struct BandMeta {
    pub(crate) no_data: Option<i64>,
    pub(crate) stats: Statistics,
    pub(crate) metadata: MetadataList,
    pub(crate) overviews: Option<Vec<OverviewDesc>>,
}

/// Handle to one band (or one overview of a band) of a container.
///
/// Obtained from [`Dataset::band`]; band numbers start at 1. The
/// handle is `Copy`-cheap to produce and borrows the container.
#[derive(Debug, Clone, Copy)]
pub struct Band<'a> {
    ds: &'a Dataset,
    number: u64,
    level: u64,
    x_size: u64,
    y_size: u64,
    tile_size: u32,
}

impl<'a> Band<'a> {
    pub(crate) fn new(
        ds: &'a Dataset,
        number: u64,
        level: u64,
        x_size: u64,
        y_size: u64,
        tile_size: u32,
    ) -> Self {
        Self { ds, number, level, x_size, y_size, tile_size }
    }

    fn state(&self) -> &'a BandState {
        &self.ds.bands[(self.number - 1) as usize]
    }

    fn require_write(&self, what: &str) -> Result<()> {
        if self.ds.access != Access::Update {
            return Err(Error::unsupported(format!("{} requires a container open for creation", what)));
        }
        Ok(())
    }

    /// Band number, starting at 1.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Pyramid level of this handle; 0 is full resolution.
    pub fn level(&self) -> u64 {
        self.level
    }

    /// Width of this level in pixels.
    pub fn x_size(&self) -> u64 {
        self.x_size
    }

    /// Height of this level in pixels.
    pub fn y_size(&self) -> u64 {
        self.y_size
    }

    /// Tile edge length of this level in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Pixel data type (shared by every band of the container).
    pub fn data_type(&self) -> DataType {
        self.ds.data_type
    }

    /// Number of tile columns at this level.
    pub fn tiles_across(&self) -> u64 {
        self.x_size.div_ceil(self.tile_size as u64)
    }

    /// Number of tile rows at this level.
    pub fn tiles_down(&self) -> u64 {
        self.y_size.div_ceil(self.tile_size as u64)
    }

    /// Size in bytes of a nominal (full) tile buffer at this level.
    pub fn block_buffer_len(&self) -> usize {
        self.tile_size as usize * self.tile_size as usize * self.ds.data_type.element_size()
    }

    /// Valid pixel extent of tile `(x, y)`: the nominal tile size,
    /// clipped at the right and bottom edges of the band.
    pub fn actual_block_size(&self, x: u64, y: u64) -> Result<(u32, u32)> {
        if x >= self.tiles_across() || y >= self.tiles_down() {
            return Err(Error::unsupported(format!(
                "tile ({}, {}) outside band of {} x {} tiles",
                x,
                y,
                self.tiles_across(),
                self.tiles_down()
            )));
        }
        let tile = self.tile_size as u64;
        let valid_w = tile.min(self.x_size - x * tile) as u32;
        let valid_h = tile.min(self.y_size - y * tile) as u32;
        Ok((valid_w, valid_h))
    }

    fn key(&self, x: u64, y: u64) -> TileKey {
        TileKey { level: self.level, band: self.number, x, y }
    }

    // ------------------------------------------------------------------
    // Block I/O
    // ------------------------------------------------------------------

    /// Reads tile `(x, y)` into `buf`, which must hold a full nominal
    /// tile (`tile_size * tile_size * element_size` bytes).
    ///
    /// For partial edge tiles the valid region is expanded into the
    /// buffer row by row; the padding region is zero-filled. Only
    /// containers open read-only can read tiles.
    pub fn read_block(&self, x: u64, y: u64, buf: &mut [u8]) -> Result<()> {
        if self.ds.access != Access::ReadOnly {
            return Err(Error::unsupported(
                "tiles can only be read from a container open in read-only mode",
            ));
        }
        let nominal = self.block_buffer_len();
        if buf.len() != nominal {
            return Err(Error::type_mismatch(format!(
                "block buffer is {} bytes, nominal tile is {}",
                buf.len(),
                nominal
            )));
        }
        let (valid_w, valid_h) = self.actual_block_size(x, y)?;
        let elem = self.ds.data_type.element_size();

        let mut state = self.ds.state.lock();
        let entry = state.tiles.get(&self.key(x, y))?;

        state.file.seek(SeekFrom::Start(entry.offset))?;
        let mut disc = [0u8; 1];
        state.file.read_exact(&mut disc)?;
        let ctype = compress::CompressionType::from_u8(disc[0])?;

        let mut compressed = vec![0u8; entry.compressed_size as usize];
        state.file.read_exact(&mut compressed)?;
        drop(state);

        let partial = valid_w != self.tile_size || valid_h != self.tile_size;
        if partial {
            let valid_bytes = valid_w as usize * valid_h as usize * elem;
            if entry.uncompressed_size as usize != valid_bytes {
                return Err(Error::codec(format!(
                    "partial tile holds {} bytes, valid extent needs {}",
                    entry.uncompressed_size, valid_bytes
                )));
            }
            let mut scratch = vec![0u8; valid_bytes];
            compress::decompress_into(ctype, &compressed, &mut scratch)?;

            buf.fill(0);
            let src_stride = valid_w as usize * elem;
            let dst_stride = self.tile_size as usize * elem;
            for row in 0..valid_h as usize {
                let src = row * src_stride;
                let dst = row * dst_stride;
                buf[dst..dst + src_stride].copy_from_slice(&scratch[src..src + src_stride]);
            }
            Ok(())
        } else {
            compress::decompress_into(ctype, &compressed, buf)
        }
    }

    /// Writes tile `(x, y)` from `data`, a full nominal tile buffer.
    ///
    /// Partial edge tiles are compacted to their valid extent before
    /// compression. Each tile key may be written at most once per
    /// session.
    pub fn write_block(&self, x: u64, y: u64, data: &[u8]) -> Result<()> {
        self.require_write("writing tiles")?;
        let nominal = self.block_buffer_len();
        if data.len() != nominal {
            return Err(Error::type_mismatch(format!(
                "block buffer is {} bytes, nominal tile is {}",
                data.len(),
                nominal
            )));
        }
        let (valid_w, valid_h) = self.actual_block_size(x, y)?;
        let elem = self.ds.data_type.element_size();
        let uncompressed_size = valid_w as usize * valid_h as usize * elem;
        let ctype = self.ds.compression;
        let key = self.key(x, y);

        let mut state = self.ds.state.lock();
        if state.tiles.contains(&key) {
            return Err(Error::invariant(format!(
                "tile level {} band {} ({}, {}) written twice",
                key.level, key.band, key.x, key.y
            )));
        }

        let offset = state.file.stream_position()?;
        state.file.write_all(&[ctype as u8])?;

        let compressed_size;
        let partial = valid_w != self.tile_size || valid_h != self.tile_size;
        if partial {
            // callers hand over full blocks; keep only the valid rows
            let mut compact = Vec::with_capacity(uncompressed_size);
            let src_stride = self.tile_size as usize * elem;
            let row_bytes = valid_w as usize * elem;
            for row in 0..valid_h as usize {
                let src = row * src_stride;
                compact.extend_from_slice(&data[src..src + row_bytes]);
            }
            let compressed = compress::compress(ctype, &compact)?;
            state.file.write_all(&compressed)?;
            compressed_size = compressed.len() as u64;
        } else {
            let compressed = compress::compress(ctype, data)?;
            state.file.write_all(&compressed)?;
            compressed_size = compressed.len() as u64;
        }

        state.tiles.insert(
            key,
            TileEntry { offset, compressed_size, uncompressed_size: uncompressed_size as u64 },
        )
    }

    /// Writes a pixel region given by its top-left corner and extent.
    ///
    /// Only writes aligned to the tile grid and covering exactly one
    /// tile's valid extent are accepted; `data` is the compact
    /// `width * height * element_size` buffer for that region.
    pub fn write_raster(&self, x_off: u64, y_off: u64, width: u32, height: u32, data: &[u8]) -> Result<()> {
        let tile = self.tile_size as u64;
        if x_off % tile != 0 || y_off % tile != 0 {
            return Err(Error::unsupported(format!(
                "write at ({}, {}) is not aligned to the {}-pixel tile grid",
                x_off, y_off, tile
            )));
        }
        let (tx, ty) = (x_off / tile, y_off / tile);
        let (valid_w, valid_h) = self.actual_block_size(tx, ty)?;
        if width != valid_w || height != valid_h {
            return Err(Error::unsupported(format!(
                "write of {} x {} does not cover tile ({}, {})'s valid {} x {} extent",
                width, height, tx, ty, valid_w, valid_h
            )));
        }
        let elem = self.ds.data_type.element_size();
        if data.len() != width as usize * height as usize * elem {
            return Err(Error::type_mismatch(format!(
                "region buffer is {} bytes, region is {}",
                data.len(),
                width as usize * height as usize * elem
            )));
        }

        // expand into a nominal block; write_block re-compacts edge tiles
        let mut block = vec![0u8; self.block_buffer_len()];
        let src_stride = width as usize * elem;
        let dst_stride = self.tile_size as usize * elem;
        for row in 0..height as usize {
            block[row * dst_stride..row * dst_stride + src_stride]
                .copy_from_slice(&data[row * src_stride..(row + 1) * src_stride]);
        }
        self.write_block(tx, ty, &block)
    }

    // ------------------------------------------------------------------
    // No-data
    // ------------------------------------------------------------------

    /// The band's no-data value, if one was set.
    pub fn no_data(&self) -> Option<i64> {
        self.state().meta.read().no_data
    }

    /// Sets the no-data value from a signed 64-bit integer.
    pub fn set_no_data_i64(&self, value: i64) -> Result<()> {
        self.require_write("setting no-data")?;
        self.state().meta.write().no_data = Some(value);
        Ok(())
    }

    /// Sets the no-data value from a double.
    ///
    /// The stored field is a signed 64-bit integer; fractional or
    /// out-of-range values are truncated toward zero.
    pub fn set_no_data(&self, value: f64) -> Result<()> {
        self.require_write("setting no-data")?;
        let stored = value as i64;
        if stored as f64 != value {
            warn!("no-data value {} truncated to {} for storage", value, stored);
        }
        self.state().meta.write().no_data = Some(stored);
        Ok(())
    }

    /// Sets the no-data value from an unsigned 64-bit integer.
    ///
    /// Values above `i64::MAX` do not fit the stored field and are
    /// rejected.
    pub fn set_no_data_u64(&self, value: u64) -> Result<()> {
        self.require_write("setting no-data")?;
        let stored = i64::try_from(value).map_err(|_| {
            Error::unsupported(format!("no-data value {} does not fit a signed 64-bit field", value))
        })?;
        self.state().meta.write().no_data = Some(stored);
        Ok(())
    }

    /// Removes the no-data value.
    pub fn clear_no_data(&self) -> Result<()> {
        self.require_write("clearing no-data")?;
        self.state().meta.write().no_data = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statistics and metadata
    // ------------------------------------------------------------------

    /// The band's summary statistics (NaN fields until set).
    pub fn statistics(&self) -> Statistics {
        self.state().meta.read().stats
    }

    /// Sets all four summary statistics.
    pub fn set_statistics(&self, stats: Statistics) -> Result<()> {
        self.require_write("setting statistics")?;
        self.state().meta.write().stats = stats;
        Ok(())
    }

    /// The band's metadata list, with STATISTICS_* entries synthesized
    /// from the structural statistics fields.
    pub fn metadata(&self) -> MetadataList {
        let meta = self.state().meta.read();
        let mut list = meta.metadata.clone();
        let stats = meta.stats;
        drop(meta);
        if !stats.min.is_nan() {
            list.set("STATISTICS_MINIMUM", &format!("{}", stats.min));
        }
        if !stats.max.is_nan() {
            list.set("STATISTICS_MAXIMUM", &format!("{}", stats.max));
        }
        if !stats.mean.is_nan() {
            list.set("STATISTICS_MEAN", &format!("{}", stats.mean));
        }
        if !stats.std_dev.is_nan() {
            list.set("STATISTICS_STDDEV", &format!("{}", stats.std_dev));
        }
        list
    }

    /// Sets one metadata item.
    ///
    /// Assignments to the STATISTICS_* keys update the structural
    /// statistics fields instead of the free-form list.
    pub fn set_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        self.require_write("setting metadata")?;
        let mut meta = self.state().meta.write();
        match key {
            "STATISTICS_MINIMUM" | "STATISTICS_MAXIMUM" | "STATISTICS_MEAN"
            | "STATISTICS_STDDEV" => {
                let parsed: f64 = value.parse().map_err(|_| {
                    Error::type_mismatch(format!("{} value '{}' is not a number", key, value))
                })?;
                match key {
                    "STATISTICS_MINIMUM" => meta.stats.min = parsed,
                    "STATISTICS_MAXIMUM" => meta.stats.max = parsed,
                    "STATISTICS_MEAN" => meta.stats.mean = parsed,
                    _ => meta.stats.std_dev = parsed,
                }
            }
            "CLOUD_OPTIMISED" => {
                return Err(Error::unsupported("CLOUD_OPTIMISED is fixed at creation"));
            }
            _ => meta.metadata.set(key, value),
        }
        Ok(())
    }

    /// Sets every item of `list` as if by [`Band::set_metadata_item`].
    pub fn set_metadata(&self, list: &MetadataList) -> Result<()> {
        for (key, value) in list.iter() {
            self.set_metadata_item(key, value)?;
        }
        Ok(())
    }

    /// Whether the band holds categorical data.
    pub fn is_thematic(&self) -> bool {
        self.state().meta.read().metadata.get(LAYER_TYPE_KEY) == Some("thematic")
    }

    /// Marks the band as thematic or athematic.
    pub fn set_thematic(&self, thematic: bool) -> Result<()> {
        self.require_write("setting the layer type")?;
        let value = if thematic { "thematic" } else { "athematic" };
        self.state().meta.write().metadata.set(LAYER_TYPE_KEY, value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Overviews
    // ------------------------------------------------------------------

    /// Number of overviews attached to the band.
    pub fn overview_count(&self) -> usize {
        self.state().meta.read().overviews.as_deref().map_or(0, |o| o.len())
    }

    /// Handle to overview `index` (0-based), or `None` past the end.
    pub fn overview(&self, index: usize) -> Option<Band<'a>> {
        if self.level != 0 {
            return None;
        }
        let meta = self.state().meta.read();
        let desc = *meta.overviews.as_deref()?.get(index)?;
        Some(Band::new(
            self.ds,
            self.number,
            index as u64 + 1,
            desc.x_size,
            desc.y_size,
            desc.tile_size,
        ))
    }

    /// Geometry of overview `index`, if it exists.
    pub fn overview_desc(&self, index: usize) -> Option<OverviewDesc> {
        self.state().meta.read().overviews.as_deref()?.get(index).copied()
    }

    /// Creates overviews from integer decimation factors. Each factor
    /// `f` yields a level of `x/f` by `y/f` pixels tiled at
    /// `tile_size/f`.
    pub fn create_overviews(&self, factors: &[u64]) -> Result<()> {
        let mut descs = Vec::with_capacity(factors.len());
        for &f in factors {
            if f < 2 {
                return Err(Error::unsupported(format!("decimation factor {} below 2", f)));
            }
            descs.push(OverviewDesc {
                x_size: self.x_size / f,
                y_size: self.y_size / f,
                tile_size: self.tile_size / f as u32,
            });
        }
        self.install_overviews(descs)
    }

    /// Creates overviews from explicit geometry, used by the copy
    /// pipeline to mirror a source hierarchy exactly.
    pub fn create_overviews_with_sizes(&self, sizes: &[OverviewDesc]) -> Result<()> {
        self.install_overviews(sizes.to_vec())
    }

    fn install_overviews(&self, descs: Vec<OverviewDesc>) -> Result<()> {
        self.require_write("creating overviews")?;
        if self.level != 0 {
            return Err(Error::unsupported("overviews can only be created on a full-resolution band"));
        }
        for desc in &descs {
            if desc.x_size == 0 || desc.y_size == 0 || desc.tile_size == 0 {
                return Err(Error::unsupported(format!(
                    "degenerate overview geometry {} x {} tile {}",
                    desc.x_size, desc.y_size, desc.tile_size
                )));
            }
            if desc.tile_size > u16::MAX as u32 {
                return Err(Error::unsupported(format!(
                    "overview tile size {} exceeds the storable maximum {}",
                    desc.tile_size,
                    u16::MAX
                )));
            }
        }

        // held across the check so no tile can slip in concurrently
        let state = self.ds.state.lock();
        if !state.tiles.is_empty() {
            return Err(Error::invariant("overviews must be created before any tile is written"));
        }
        let mut meta = self.state().meta.write();
        if meta.overviews.is_some() {
            return Err(Error::invariant("overviews already set"));
        }
        meta.overviews = Some(descs);
        Ok(())
    }

    /// Handle to the band's attribute table.
    pub fn rat(&self) -> Rat<'a> {
        Rat::new(self.ds, (self.number - 1) as usize)
    }
}
