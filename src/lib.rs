//! # EMU - a streaming-writable, footer-indexed raster container
//!
//! EMU stores tiled, multi-band, optionally pyramided raster imagery
//! together with per-band categorical attribute tables in a single
//! file. Data tiles, attribute chunks and metadata are appended
//! sequentially as they are produced and a compact index of their
//! offsets is written last, so the writer is single-pass (pipes and
//! object-store multipart uploads work) while the reader stays fully
//! random-access.
//!
//! ## File layout
//!
//! ```text
//! [Preamble: "EMU" + version + flags, 11 bytes]
//! [Tile records and attribute chunk records, append order]
//! [Footer: band state, attribute indices, tile index]
//! [Footer offset: u64, final 8 bytes]
//! ```
//!
//! A reader seeks to the last 8 bytes, follows the pointer to the
//! footer and reconstructs everything from there. A writer that never
//! reaches [`Dataset::close`] leaves no footer and the file is
//! refused on open.
//!
//! ## Example
//!
//! ```rust,no_run
//! use emu::{CreateOptions, DataType, Dataset};
//!
//! # fn main() -> emu::Result<()> {
//! // create: append tiles in any order, then seal the file
//! let ds = Dataset::create("scene.emu", CreateOptions::new(1024, 1024, 1, DataType::U8))?;
//! let band = ds.band(1)?;
//! let tile = vec![0u8; band.block_buffer_len()];
//! band.write_block(0, 0, &tile)?;
//! ds.close()?;
//!
//! // read back
//! let ds = Dataset::open("scene.emu")?;
//! let band = ds.band(1)?;
//! let mut buf = vec![0u8; band.block_buffer_len()];
//! band.read_block(0, 0, &mut buf)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread safety
//!
//! A [`Dataset`] can be shared across threads; every tile and
//! attribute-chunk access serializes on one internal mutex so that
//! appended records and their recorded offsets always agree.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod band;
pub mod compress;
pub mod config;
pub mod dataset;
pub mod error;
pub mod geo;
pub mod metadata;
pub mod rat;
pub mod stream;
pub mod tile;

pub use band::{Band, OverviewDesc, Statistics};
pub use compress::CompressionType;
pub use config::{CreateOptions, DataType, DEFAULT_TILE_SIZE};
pub use dataset::copy::{BandSource, ProgressFn, RasterSource, RatSource};
pub use dataset::footer::FORMAT_VERSION;
pub use dataset::{Access, Dataset};
pub use error::{Error, Result};
pub use geo::GeoTransform;
pub use metadata::{MetadataList, RESERVED_KEYS};
pub use rat::{Rat, RatChunk, RatFieldType, MAX_RAT_CHUNK};
pub use stream::ByteStream;
pub use tile::{TileEntry, TileIndex, TileKey};
