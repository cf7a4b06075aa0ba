//! Copying a source raster into a cloud-optimised container.
//!
//! The host raster library is consumed through the [`RasterSource`],
//! [`BandSource`] and [`RatSource`] traits; the pipeline never sees
//! anything else of it. Tiles land in the file coarsest pyramid level
//! first, then the attribute tables, then full resolution, so a
//! sequential reader can draw a low-resolution preview from a prefix
//! of the file.

use crate::band::{Band, OverviewDesc, Statistics};
use crate::config::{CreateOptions, DataType, DEFAULT_TILE_SIZE};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::geo::GeoTransform;
use crate::metadata::{MetadataList, RESERVED_KEYS};
use crate::rat::{Rat, RatFieldType, MAX_RAT_CHUNK};
use log::debug;
use std::path::Path;

/// Progress callback: receives the completed fraction and a short
/// message, returns `false` to cancel.
pub type ProgressFn<'a> = dyn FnMut(f64, &str) -> bool + 'a;

/// One band (or one overview of a band) of a source raster.
pub trait BandSource {
    /// Width of this band/overview in pixels.
    fn x_size(&self) -> u64;

    /// Height of this band/overview in pixels.
    fn y_size(&self) -> u64;

    /// Block dimensions `(width, height)` in pixels.
    fn block_size(&self) -> (u32, u32);

    /// Number of overviews below this band. Overview bands themselves
    /// report zero.
    fn overview_count(&self) -> usize {
        0
    }

    /// Overview `index` (0-based, largest first), if it exists.
    fn overview(&self, _index: usize) -> Option<&dyn BandSource> {
        None
    }

    /// Reads block `(x, y)` into `out`, a full nominal block buffer.
    fn read_block(&self, x: u64, y: u64, out: &mut [u8]) -> Result<()>;

    /// The band's no-data value, if set.
    fn no_data(&self) -> Option<i64> {
        None
    }

    /// The band's summary statistics, if computed.
    fn statistics(&self) -> Option<Statistics> {
        None
    }

    /// The band's metadata.
    fn metadata(&self) -> MetadataList {
        MetadataList::new()
    }

    /// The band's attribute table, if it has one.
    fn rat(&self) -> Option<&dyn RatSource> {
        None
    }
}

/// A source raster with bands and optional georeferencing.
pub trait RasterSource {
    /// Raster width in pixels.
    fn width(&self) -> u64;

    /// Raster height in pixels.
    fn height(&self) -> u64;

    /// Number of bands.
    fn band_count(&self) -> usize;

    /// Pixel data type shared by all bands.
    fn data_type(&self) -> DataType;

    /// Band `index` (0-based).
    fn band(&self, index: usize) -> &dyn BandSource;

    /// The source geotransform, if georeferenced.
    fn geo_transform(&self) -> Option<GeoTransform> {
        None
    }

    /// The source projection WKT, if georeferenced.
    fn projection(&self) -> Option<String> {
        None
    }

    /// Dataset-level metadata.
    fn metadata(&self) -> MetadataList {
        MetadataList::new()
    }
}

/// A source attribute table.
pub trait RatSource {
    /// Number of columns.
    fn column_count(&self) -> usize;

    /// Name of column `col`.
    fn column_name(&self, col: usize) -> String;

    /// Type of column `col`.
    fn column_type(&self, col: usize) -> RatFieldType;

    /// Number of rows.
    fn row_count(&self) -> u64;

    /// Reads integer rows `[start, start + len)` of column `col`.
    fn read_i64(&self, col: usize, start: u64, len: usize) -> Result<Vec<i64>>;

    /// Reads real rows `[start, start + len)` of column `col`.
    fn read_f64(&self, col: usize, start: u64, len: usize) -> Result<Vec<f64>>;

    /// Reads string rows `[start, start + len)` of column `col`.
    fn read_strings(&self, col: usize, start: u64, len: usize) -> Result<Vec<String>>;
}

fn tiles_in(x_size: u64, y_size: u64, tile: u32) -> u64 {
    x_size.div_ceil(tile as u64) * y_size.div_ceil(tile as u64)
}

/// Copies every tile of one source band/overview into `dest` in
/// row-major order, polling the progress callback after each tile.
fn copy_tiles(
    dest: &Band<'_>,
    source: &dyn BandSource,
    element_size: usize,
    done: &mut u64,
    total: u64,
    progress: &mut Option<&mut ProgressFn<'_>>,
    what: &str,
) -> Result<()> {
    let tile = dest.tile_size() as usize;
    let mut buf = vec![0u8; tile * tile * element_size];
    for y in 0..dest.tiles_down() {
        for x in 0..dest.tiles_across() {
            source.read_block(x, y, &mut buf)?;
            dest.write_block(x, y, &buf)?;
            *done += 1;
            if let Some(cb) = progress.as_mut() {
                let fraction = if total == 0 { 1.0 } else { *done as f64 / total as f64 };
                if !cb(fraction, what) {
                    return Err(Error::Cancelled);
                }
            }
        }
    }
    Ok(())
}

/// Copies a whole attribute table, batching rows per stored chunk.
fn copy_rat(dest: &Rat<'_>, source: &dyn RatSource) -> Result<()> {
    let rows = source.row_count();
    dest.set_row_count(rows)?;
    for col in 0..source.column_count() {
        let field_type = source.column_type(col);
        let dcol = dest.create_column(&source.column_name(col), field_type)?;
        let mut start = 0u64;
        while start < rows {
            let n = ((rows - start) as usize).min(MAX_RAT_CHUNK);
            match field_type {
                RatFieldType::Integer => {
                    dest.write_i64(dcol, start, &source.read_i64(col, start, n)?)?
                }
                RatFieldType::Real => {
                    dest.write_f64(dcol, start, &source.read_f64(col, start, n)?)?
                }
                RatFieldType::String => {
                    let values = source.read_strings(col, start, n)?;
                    let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
                    dest.write_strings(dcol, start, &refs)?
                }
            }
            start += n as u64;
        }
    }
    Ok(())
}

impl Dataset {
    /// Copies `source` into a new cloud-optimised container at `path`.
    ///
    /// The source must use square blocks, identical across bands. Its
    /// overview geometry is mirrored exactly; tiles are written
    /// coarsest level first so the result streams coarse-to-fine. The
    /// progress callback is polled after every tile; returning `false`
    /// aborts the copy and leaves an unreadable file.
    pub fn create_copy<P: AsRef<Path>>(
        path: P,
        source: &dyn RasterSource,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        let band_count = source.band_count();

        let tile_size = if band_count == 0 {
            DEFAULT_TILE_SIZE
        } else {
            let (bw, bh) = source.band(0).block_size();
            if bw != bh {
                return Err(Error::unsupported(format!(
                    "source blocks are {} x {}; only square tiles are supported",
                    bw, bh
                )));
            }
            for i in 1..band_count {
                if source.band(i).block_size() != (bw, bh) {
                    return Err(Error::unsupported("source bands disagree on block size"));
                }
            }
            bw
        };

        let opts = CreateOptions::new(
            source.width(),
            source.height(),
            band_count as u64,
            source.data_type(),
        )
        .tile_size(tile_size)
        .cloud_optimised(true);
        let ds = Dataset::create(path, opts)?;

        if let Some(gt) = source.geo_transform() {
            ds.set_geo_transform(gt)?;
        }
        if let Some(wkt) = source.projection() {
            ds.set_projection(&wkt)?;
        }

        // mirror each band's pyramid geometry before any tile lands
        let mut max_levels = 0usize;
        for i in 0..band_count {
            let sband = source.band(i);
            let count = sband.overview_count();
            max_levels = max_levels.max(count);
            if count > 0 {
                let mut descs = Vec::with_capacity(count);
                for k in 0..count {
                    let ovr = sband
                        .overview(k)
                        .ok_or_else(|| Error::invariant("source overview list changed underneath"))?;
                    descs.push(OverviewDesc {
                        x_size: ovr.x_size(),
                        y_size: ovr.y_size(),
                        tile_size: ovr.block_size().0,
                    });
                }
                ds.band(i as u64 + 1)?.create_overviews_with_sizes(&descs)?;
            }
        }

        let mut total: u64 = 0;
        for i in 0..band_count {
            let sband = source.band(i);
            total += tiles_in(sband.x_size(), sband.y_size(), sband.block_size().0);
            for k in 0..sband.overview_count() {
                if let Some(ovr) = sband.overview(k) {
                    total += tiles_in(ovr.x_size(), ovr.y_size(), ovr.block_size().0);
                }
            }
        }

        let element_size = source.data_type().element_size();
        let mut done: u64 = 0;

        // coarsest overview level across all bands first
        for level in (0..max_levels).rev() {
            for i in 0..band_count {
                let sband = source.band(i);
                if level >= sband.overview_count() {
                    continue;
                }
                let sovr = sband
                    .overview(level)
                    .ok_or_else(|| Error::invariant("source overview list changed underneath"))?;
                let dband = ds.band(i as u64 + 1)?;
                let dovr = dband
                    .overview(level)
                    .ok_or_else(|| Error::invariant("destination overview missing"))?;
                copy_tiles(
                    &dovr,
                    sovr,
                    element_size,
                    &mut done,
                    total,
                    &mut progress,
                    &format!("band {} overview {}", i + 1, level),
                )?;
            }
            debug!("copied overview level {}", level);
        }

        // attribute tables sit between the pyramid and full resolution
        for i in 0..band_count {
            if let Some(rat_source) = source.band(i).rat() {
                copy_rat(&ds.band(i as u64 + 1)?.rat(), rat_source)?;
            }
        }

        for i in 0..band_count {
            let dband = ds.band(i as u64 + 1)?;
            copy_tiles(
                &dband,
                source.band(i),
                element_size,
                &mut done,
                total,
                &mut progress,
                &format!("band {}", i + 1),
            )?;
        }
        debug!("copied full resolution, {} tiles total", done);

        for i in 0..band_count {
            let sband = source.band(i);
            let dband = ds.band(i as u64 + 1)?;
            if let Some(no_data) = sband.no_data() {
                dband.set_no_data_i64(no_data)?;
            }
            if let Some(stats) = sband.statistics() {
                dband.set_statistics(stats)?;
            }
            for (key, value) in sband.metadata().iter() {
                if key == "CLOUD_OPTIMISED" {
                    continue;
                }
                dband.set_metadata_item(key, value)?;
            }
        }
        for (key, value) in source.metadata().iter() {
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            ds.set_metadata_item(key, value)?;
        }

        ds.close()
    }
}
