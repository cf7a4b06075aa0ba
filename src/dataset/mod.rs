//! The container: lifecycle, band assembly and global state.
//!
//! A [`Dataset`] is either created empty (write mode) or opened over
//! an existing file (read-only); updating an existing file is not
//! supported. In write mode, tiles and attribute chunks are appended
//! in whatever order the application produces them and the footer is
//! written by [`Dataset::close`]. A write-mode dataset dropped without
//! `close` leaves a file with no footer, which readers refuse.
//!
//! The dataset owns the byte stream, the tile index, the band states
//! and the global mutex serializing payload I/O.

pub mod copy;
pub mod footer;

use crate::band::{Band, BandMeta, BandState};
use crate::compress::CompressionType;
use crate::config::{CreateOptions, DataType};
use crate::error::{Error, Result};
use crate::geo::GeoTransform;
use crate::metadata::{MetadataList, RESERVED_KEYS};
use crate::rat::RatData;
use crate::stream::{self, ByteStream};
use crate::tile::TileIndex;
use self::footer::{BandRecord, FooterInfo, FLAG_CLOUD_OPTIMISED};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// How a dataset was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Opened over an existing, sealed file. Tiles and attributes can
    /// be read; nothing can be written.
    ReadOnly,
    /// A dataset being created. Tiles and attributes can be written;
    /// nothing can be read back until the file is closed and reopened.
    Update,
}

/// Mutable container state behind the global mutex.
///
/// Every payload append captures its offset under this lock, so file
/// position and index stay consistent.
pub(crate) struct State {
    pub(crate) file: Box<dyn ByteStream>,
    pub(crate) tiles: TileIndex,
    pub(crate) rats: Vec<RatData>,
    pub(crate) geo: GeoTransform,
    pub(crate) projection: String,
    pub(crate) metadata: MetadataList,
}

/// A tiled raster container.
pub struct Dataset {
    pub(crate) access: Access,
    pub(crate) width: u64,
    pub(crate) height: u64,
    pub(crate) tile_size: u32,
    pub(crate) data_type: DataType,
    pub(crate) compression: CompressionType,
    pub(crate) cloud_optimised: bool,
    pub(crate) version: u32,
    pub(crate) bands: Vec<BandState>,
    pub(crate) state: Mutex<State>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("access", &self.access)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("tile_size", &self.tile_size)
            .field("data_type", &self.data_type)
            .field("bands", &self.bands.len())
            .field("cloud_optimised", &self.cloud_optimised)
            .finish_non_exhaustive()
    }
}

impl Dataset {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Creates a new container at `path`.
    ///
    /// Object-store URIs are recognised and sized for multipart upload,
    /// but the sink itself is the host's to provide: pass it to
    /// [`Dataset::create_from_stream`].
    pub fn create<P: AsRef<Path>>(path: P, opts: CreateOptions) -> Result<Dataset> {
        let display = path.as_ref().to_string_lossy().into_owned();
        opts.validate()?;

        if stream::is_object_store_uri(&display) {
            let expected = stream::expected_file_size(
                opts.width,
                opts.height,
                opts.band_count,
                opts.data_type,
            );
            let part_size = stream::multipart_part_size(expected)?;
            return Err(Error::unsupported(format!(
                "'{}' is an object-store target; open a multipart sink with {}-byte parts and use create_from_stream",
                display, part_size
            )));
        }

        let file = File::create(path.as_ref())
            .map_err(|e| Error::open_failed(format!("cannot create '{}': {}", display, e)))?;
        Self::create_from_stream(Box::new(file), opts)
    }

    /// Creates a new container over an arbitrary byte sink: a file, a
    /// pipe, or an object-store multipart stream.
    pub fn create_from_stream(mut sink: Box<dyn ByteStream>, opts: CreateOptions) -> Result<Dataset> {
        opts.validate()?;

        let flags = if opts.cloud_optimised { FLAG_CLOUD_OPTIMISED } else { 0 };
        footer::write_preamble(&mut *sink, flags)?;

        let bands: Vec<BandState> = (0..opts.band_count).map(|_| BandState::default()).collect();
        if opts.thematic {
            for band in &bands {
                band.meta.write().metadata.set("LAYER_TYPE", "thematic");
            }
        }
        let rats = (0..opts.band_count).map(|_| RatData::default()).collect();

        debug!(
            "created {} x {} container, {} band(s), tile {}, {:?}",
            opts.width, opts.height, opts.band_count, opts.tile_size, opts.data_type
        );

        Ok(Dataset {
            access: Access::Update,
            width: opts.width,
            height: opts.height,
            tile_size: opts.tile_size,
            data_type: opts.data_type,
            compression: opts.compression,
            cloud_optimised: opts.cloud_optimised,
            version: footer::FORMAT_VERSION,
            bands,
            state: Mutex::new(State {
                file: sink,
                tiles: TileIndex::new(),
                rats,
                geo: GeoTransform::default(),
                projection: String::new(),
                metadata: MetadataList::new(),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------

    /// Opens an existing container read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        Self::open_with_access(path, Access::ReadOnly)
    }

    /// Opens an existing container with the requested access.
    /// Update access is not supported and fails.
    pub fn open_with_access<P: AsRef<Path>>(path: P, access: Access) -> Result<Dataset> {
        if access == Access::Update {
            return Err(Error::unsupported("update of an existing file is not supported"));
        }
        let p = path.as_ref();
        let has_ext = p
            .extension()
            .map(|e| e.eq_ignore_ascii_case("emu"))
            .unwrap_or(false);
        if !has_ext {
            return Err(Error::open_failed(format!(
                "'{}' does not carry the .emu extension",
                p.display()
            )));
        }
        let file = File::open(p)
            .map_err(|e| Error::open_failed(format!("cannot open '{}': {}", p.display(), e)))?;
        Self::open_from_stream(Box::new(file))
    }

    /// Opens a container over an arbitrary seekable byte stream.
    pub fn open_from_stream(mut stream: Box<dyn ByteStream>) -> Result<Dataset> {
        stream.seek(SeekFrom::Start(0))?;
        let preamble = footer::read_preamble(&mut *stream)?;
        let region = footer::read_footer_region(&mut *stream)?;
        let parsed = footer::parse_footer(&region, preamble.version)?;

        let bands: Vec<BandState> = parsed
            .bands
            .into_iter()
            .map(|rec| BandState {
                meta: RwLock::new(BandMeta {
                    no_data: rec.no_data,
                    stats: rec.stats,
                    metadata: rec.metadata,
                    overviews: (!rec.overviews.is_empty()).then_some(rec.overviews),
                }),
            })
            .collect();

        debug!(
            "opened {} x {} container, {} band(s), {} tile(s) indexed",
            parsed.width,
            parsed.height,
            bands.len(),
            parsed.tiles.len()
        );

        Ok(Dataset {
            access: Access::ReadOnly,
            width: parsed.width,
            height: parsed.height,
            tile_size: parsed.tile_size,
            data_type: parsed.data_type,
            compression: CompressionType::Zlib,
            cloud_optimised: preamble.flags & FLAG_CLOUD_OPTIMISED != 0,
            version: preamble.version,
            bands,
            state: Mutex::new(State {
                file: stream,
                tiles: parsed.tiles,
                rats: parsed.rats,
                geo: parsed.geo,
                projection: parsed.projection,
                metadata: parsed.metadata,
            }),
        })
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Seals a write-mode container: writes the footer and the
    /// trailing footer offset, then flushes. For read-only datasets
    /// this is a no-op.
    ///
    /// Dropping a write-mode dataset without calling `close` leaves an
    /// unreadable file.
    pub fn close(self) -> Result<()> {
        if self.access == Access::ReadOnly {
            return Ok(());
        }

        let records: Vec<BandRecord> = self
            .bands
            .iter()
            .map(|band| {
                let meta = band.meta.read();
                BandRecord {
                    no_data: meta.no_data,
                    stats: meta.stats,
                    overviews: meta.overviews.clone().unwrap_or_default(),
                    metadata: meta.metadata.clone(),
                }
            })
            .collect();

        let mut state = self.state.lock();
        let State { file, tiles, rats, geo, projection, metadata } = &mut *state;
        let info = FooterInfo {
            data_type: self.data_type,
            width: self.width,
            height: self.height,
            tile_size: self.tile_size,
            bands: &records,
            rats: &*rats,
            geo: *geo,
            projection: &*projection,
            metadata: &*metadata,
            tiles: &*tiles,
        };
        let offset = footer::write_footer(&mut **file, &info)?;
        debug!("closed container: footer at {}, {} tile(s) indexed", offset, tiles.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Geometry and access
    // ------------------------------------------------------------------

    /// Raster width in pixels.
    pub fn width(&self) -> u64 {
        self.width
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Number of bands.
    pub fn band_count(&self) -> u64 {
        self.bands.len() as u64
    }

    /// Tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Pixel data type shared by all bands.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Compression applied to payload records written by this dataset.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// How the dataset was opened.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Whether the file is flagged cloud-optimised.
    pub fn is_cloud_optimised(&self) -> bool {
        self.cloud_optimised
    }

    /// The format version of the underlying file.
    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// Number of tiles recorded in the tile index.
    pub fn tile_count(&self) -> usize {
        self.state.lock().tiles.len()
    }

    /// Snapshot of the tile index: every recorded key and its payload
    /// location. Useful for layout diagnostics.
    pub fn tile_entries(&self) -> Vec<(crate::tile::TileKey, crate::tile::TileEntry)> {
        self.state.lock().tiles.iter().map(|(k, e)| (*k, *e)).collect()
    }

    /// Handle to band `number` (1-based).
    pub fn band(&self, number: u64) -> Result<Band<'_>> {
        if number == 0 || number > self.bands.len() as u64 {
            return Err(Error::unsupported(format!(
                "no band {} in a {}-band container",
                number,
                self.bands.len()
            )));
        }
        Ok(Band::new(self, number, 0, self.width, self.height, self.tile_size))
    }

    /// Creates overviews on every listed band from the same decimation
    /// factors. Must be invoked before any tile is written.
    pub fn build_overviews(&self, band_numbers: &[u64], factors: &[u64]) -> Result<()> {
        for &number in band_numbers {
            self.band(number)?.create_overviews(factors)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Georeferencing and metadata
    // ------------------------------------------------------------------

    /// The dataset's geotransform.
    pub fn geo_transform(&self) -> GeoTransform {
        self.state.lock().geo
    }

    /// Sets the geotransform (write mode only).
    pub fn set_geo_transform(&self, geo: GeoTransform) -> Result<()> {
        self.require_write("setting the geotransform")?;
        self.state.lock().geo = geo;
        Ok(())
    }

    /// The projection as a WKT string; empty if none was set.
    pub fn projection(&self) -> String {
        self.state.lock().projection.clone()
    }

    /// Sets the projection WKT (write mode only).
    pub fn set_projection(&self, wkt: &str) -> Result<()> {
        self.require_write("setting the projection")?;
        self.state.lock().projection = wkt.to_string();
        Ok(())
    }

    /// Dataset-level metadata, with CLOUD_OPTIMISED synthesized from
    /// the preamble flag.
    pub fn metadata(&self) -> MetadataList {
        let mut list = self.state.lock().metadata.clone();
        list.set("CLOUD_OPTIMISED", if self.cloud_optimised { "YES" } else { "NO" });
        list
    }

    /// Sets one dataset-level metadata item (write mode only).
    /// Reserved keys are stored structurally and cannot be assigned.
    pub fn set_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        self.require_write("setting metadata")?;
        if RESERVED_KEYS.contains(&key) {
            return Err(Error::unsupported(format!("'{}' is stored structurally", key)));
        }
        self.state.lock().metadata.set(key, value);
        Ok(())
    }

    fn require_write(&self, what: &str) -> Result<()> {
        if self.access != Access::Update {
            return Err(Error::unsupported(format!("{} requires a container open for creation", what)));
        }
        Ok(())
    }
}
