//! Preamble and footer marshalling.
//!
//! The file begins with an 11-byte preamble and ends with the footer
//! plus an 8-byte pointer back to it:
//!
//! ```text
//! "EMU"                      (3 bytes, magic)
//! version                    (4 ASCII digits, currently "0001")
//! flags                      (u32, bit 0 = cloud-optimised)
//! [payload: tile records and attribute chunk records, append order]
//! "HDR\0"                    (footer magic)
//! dataType                   (u64)
//! bandCount                  (u64)
//! rasterWidth, rasterHeight  (2 x u64)
//! tileSize                   (u32)
//! per band:
//!   noDataFlag               (u8)
//!   noData                   (i64)
//!   min, max, mean, stddev   (4 x f64)
//!   overviewCount            (u32)
//!   per overview: xSize, ySize (2 x u64), tileSize (u16)
//!   attribute index:
//!     columnCount, rowCount  (2 x u64)
//!     per column: fieldType (u64), name (NUL-terminated),
//!                 chunkCount (u64),
//!                 per chunk: startIdx, length, offset,
//!                            compressedSize (4 x u64)
//!   band metadata: inputSize, outputSize (2 x u64),
//!                  compressed bytes (outputSize bytes;
//!                  the pair is (0, 0) when empty)
//! geotransform               (6 x f64)
//! wktLen (u64), wkt          (wktLen bytes)
//! dataset metadata           (as band metadata)
//! tileCount                  (u64)
//! per tile: offset, compressedSize, uncompressedSize,
//!           level, band, x, y (7 x u64)
//! footerOffset               (u64, the final 8 bytes)
//! ```
//!
//! Everything is little-endian and tightly packed. Payload records
//! carry no self-describing lengths; the footer is the only index.

use crate::band::{OverviewDesc, Statistics};
use crate::config::DataType;
use crate::error::{Error, Result};
use crate::geo::GeoTransform;
use crate::metadata::{self, MetadataList};
use crate::rat::{RatChunk, RatColumn, RatData, RatFieldType};
use crate::stream::ByteStream;
use crate::tile::{TileEntry, TileIndex, TileKey};
use bytes::{BufMut, BytesMut};
use std::io::{Read, Seek, SeekFrom, Write};

/// File magic.
pub const MAGIC: &[u8; 3] = b"EMU";

/// Format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Footer magic.
pub const HEADER_MAGIC: &[u8; 4] = b"HDR\0";

/// Preamble flags bit: overviews precede full resolution in file
/// order.
pub const FLAG_CLOUD_OPTIMISED: u32 = 0x1;

/// Length of the fixed preamble.
pub const PREAMBLE_LEN: u64 = 11;

/// Parsed preamble fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Preamble {
    pub version: u32,
    pub flags: u32,
}

/// Writes the 11-byte preamble.
pub(crate) fn write_preamble(file: &mut dyn ByteStream, flags: u32) -> Result<()> {
    file.write_all(MAGIC)?;
    file.write_all(format!("{:04}", FORMAT_VERSION).as_bytes())?;
    file.write_all(&flags.to_le_bytes())?;
    Ok(())
}

/// Reads and verifies the 11-byte preamble.
pub(crate) fn read_preamble(file: &mut dyn ByteStream) -> Result<Preamble> {
    let mut buf = [0u8; PREAMBLE_LEN as usize];
    file.read_exact(&mut buf).map_err(|_| Error::open_failed("file shorter than the preamble"))?;

    if &buf[0..3] != MAGIC {
        return Err(Error::open_failed("not an EMU file (bad magic)"));
    }
    let digits = std::str::from_utf8(&buf[3..7])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::open_failed("malformed version field"))?;
    if digits > FORMAT_VERSION {
        return Err(Error::open_failed(format!(
            "format version {} newer than supported version {}",
            digits, FORMAT_VERSION
        )));
    }
    let flags = u32::from_le_bytes(buf[7..11].try_into().unwrap());
    Ok(Preamble { version: digits, flags })
}

/// Per-band snapshot serialized into (or parsed out of) the footer.
#[derive(Debug, Default)]
pub(crate) struct BandRecord {
    pub no_data: Option<i64>,
    pub stats: Statistics,
    pub overviews: Vec<OverviewDesc>,
    pub metadata: MetadataList,
}

/// Everything the footer describes.
#[derive(Debug)]
pub(crate) struct ParsedFooter {
    pub data_type: DataType,
    pub width: u64,
    pub height: u64,
    pub tile_size: u32,
    pub bands: Vec<BandRecord>,
    pub rats: Vec<RatData>,
    pub geo: GeoTransform,
    pub projection: String,
    pub metadata: MetadataList,
    pub tiles: TileIndex,
}

/// Borrowed view of the container state to serialize.
pub(crate) struct FooterInfo<'a> {
    pub data_type: DataType,
    pub width: u64,
    pub height: u64,
    pub tile_size: u32,
    pub bands: &'a [BandRecord],
    pub rats: &'a [RatData],
    pub geo: GeoTransform,
    pub projection: &'a str,
    pub metadata: &'a MetadataList,
    pub tiles: &'a TileIndex,
}

fn put_metadata(buf: &mut BytesMut, list: &MetadataList) -> Result<()> {
    match metadata::encode(list)? {
        None => {
            // the (0, 0) size pair, no payload
            buf.put_u64_le(0);
            buf.put_u64_le(0);
        }
        Some((raw_len, blob)) => {
            buf.put_u64_le(raw_len);
            buf.put_u64_le(blob.len() as u64);
            buf.put_slice(&blob);
        }
    }
    Ok(())
}

fn put_rat_index(buf: &mut BytesMut, rat: &RatData) {
    buf.put_u64_le(rat.columns.len() as u64);
    buf.put_u64_le(rat.row_count);
    for column in &rat.columns {
        buf.put_u64_le(column.field_type as u64);
        buf.put_slice(column.name.as_bytes());
        buf.put_u8(0);
        // chunks are kept sorted on insert; serialize them that way
        let mut chunks = column.chunks.clone();
        chunks.sort_by_key(|c| c.start_idx);
        buf.put_u64_le(chunks.len() as u64);
        for chunk in &chunks {
            buf.put_u64_le(chunk.start_idx);
            buf.put_u64_le(chunk.length);
            buf.put_u64_le(chunk.offset);
            buf.put_u64_le(chunk.compressed_size);
        }
    }
}

/// Appends the footer and the trailing footer-offset word, then
/// flushes. Returns the footer's start offset.
pub(crate) fn write_footer(file: &mut dyn ByteStream, info: &FooterInfo<'_>) -> Result<u64> {
    let footer_offset = file.stream_position()?;

    let mut buf = BytesMut::new();
    buf.put_slice(HEADER_MAGIC);
    buf.put_u64_le(info.data_type as u64);
    buf.put_u64_le(info.bands.len() as u64);
    buf.put_u64_le(info.width);
    buf.put_u64_le(info.height);
    buf.put_u32_le(info.tile_size);

    for (band, rat) in info.bands.iter().zip(info.rats) {
        buf.put_u8(band.no_data.is_some() as u8);
        buf.put_i64_le(band.no_data.unwrap_or(0));
        buf.put_f64_le(band.stats.min);
        buf.put_f64_le(band.stats.max);
        buf.put_f64_le(band.stats.mean);
        buf.put_f64_le(band.stats.std_dev);

        buf.put_u32_le(band.overviews.len() as u32);
        for ovr in &band.overviews {
            buf.put_u64_le(ovr.x_size);
            buf.put_u64_le(ovr.y_size);
            buf.put_u16_le(ovr.tile_size as u16);
        }

        put_rat_index(&mut buf, rat);
        put_metadata(&mut buf, &band.metadata)?;
    }

    for c in info.geo.coefficients() {
        buf.put_f64_le(c);
    }
    buf.put_u64_le(info.projection.len() as u64);
    buf.put_slice(info.projection.as_bytes());

    put_metadata(&mut buf, info.metadata)?;

    buf.put_u64_le(info.tiles.len() as u64);
    for (key, entry) in info.tiles.iter() {
        buf.put_u64_le(entry.offset);
        buf.put_u64_le(entry.compressed_size);
        buf.put_u64_le(entry.uncompressed_size);
        buf.put_u64_le(key.level);
        buf.put_u64_le(key.band);
        buf.put_u64_le(key.x);
        buf.put_u64_le(key.y);
    }

    file.write_all(&buf)?;
    file.write_all(&footer_offset.to_le_bytes())?;
    file.flush()?;
    Ok(footer_offset)
}

/// Bounds-checked little-endian reader over the footer bytes.
struct FooterReader<'a> {
    buf: &'a [u8],
}

impl<'a> FooterReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::open_failed("footer truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads bytes up to and including the next NUL.
    fn cstr(&mut self) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::open_failed("unterminated string in footer"))?;
        let s = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf = &self.buf[end + 1..];
        Ok(s)
    }
}

fn read_metadata(r: &mut FooterReader<'_>) -> Result<MetadataList> {
    let raw_len = r.u64()?;
    let compressed_len = r.u64()? as usize;
    if raw_len == 0 && compressed_len == 0 {
        return Ok(MetadataList::new());
    }
    let blob = r.take(compressed_len)?;
    metadata::decode(raw_len, blob)
}

fn read_rat_index(r: &mut FooterReader<'_>) -> Result<RatData> {
    let column_count = r.u64()?;
    let row_count = r.u64()?;

    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let field_type = RatFieldType::from_u64(r.u64()?)?;
        let name = r.cstr()?;
        let chunk_count = r.u64()?;

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        let mut prev_end = 0u64;
        for _ in 0..chunk_count {
            let chunk = RatChunk {
                start_idx: r.u64()?,
                length: r.u64()?,
                offset: r.u64()?,
                compressed_size: r.u64()?,
            };
            if chunk.start_idx < prev_end {
                return Err(Error::open_failed(format!(
                    "attribute chunks of column '{}' unsorted or overlapping",
                    name
                )));
            }
            prev_end = chunk.start_idx + chunk.length;
            chunks.push(chunk);
        }
        columns.push(RatColumn { name, field_type, chunks });
    }
    Ok(RatData { columns, row_count })
}

/// Parses the footer region (everything between the footer offset and
/// the trailing 8 bytes). `version` selects revision quirks: version 0
/// stored overviews without a tile size.
pub(crate) fn parse_footer(bytes: &[u8], version: u32) -> Result<ParsedFooter> {
    let mut r = FooterReader::new(bytes);

    if r.take(4)? != HEADER_MAGIC {
        return Err(Error::open_failed("footer magic missing"));
    }

    let data_type = DataType::from_u64(r.u64()?)?;
    let band_count = r.u64()?;
    let width = r.u64()?;
    let height = r.u64()?;
    let tile_size = r.u32()?;

    let mut bands = Vec::with_capacity(band_count as usize);
    let mut rats = Vec::with_capacity(band_count as usize);
    for _ in 0..band_count {
        let no_data_set = r.u8()? != 0;
        let no_data = r.i64()?;
        let stats = Statistics { min: r.f64()?, max: r.f64()?, mean: r.f64()?, std_dev: r.f64()? };

        let overview_count = r.u32()?;
        let mut overviews = Vec::with_capacity(overview_count as usize);
        for _ in 0..overview_count {
            let x_size = r.u64()?;
            let y_size = r.u64()?;
            let ovr_tile = if version >= 1 {
                r.u16()? as u32
            } else {
                // early revisions stored no tile size; recover it from
                // the decimation factor implied by the geometry
                let factor = (width as f64 / x_size.max(1) as f64).round().max(1.0) as u32;
                (tile_size / factor).max(1)
            };
            overviews.push(OverviewDesc { x_size, y_size, tile_size: ovr_tile });
        }

        rats.push(read_rat_index(&mut r)?);

        let band_metadata = read_metadata(&mut r)?;
        bands.push(BandRecord {
            no_data: no_data_set.then_some(no_data),
            stats,
            overviews,
            metadata: band_metadata,
        });
    }

    let mut coeffs = [0.0f64; 6];
    for c in &mut coeffs {
        *c = r.f64()?;
    }
    let geo = GeoTransform::from_coefficients(coeffs);

    let wkt_len = r.u64()? as usize;
    let wkt_bytes = r.take(wkt_len)?;
    // some writers count a trailing NUL into wktLen; drop it
    let wkt_bytes = match wkt_bytes.split_last() {
        Some((0, head)) => head,
        _ => wkt_bytes,
    };
    let projection = String::from_utf8_lossy(wkt_bytes).into_owned();

    let dataset_metadata = read_metadata(&mut r)?;

    let tile_count = r.u64()?;
    let mut tiles = TileIndex::new();
    for _ in 0..tile_count {
        let entry = TileEntry {
            offset: r.u64()?,
            compressed_size: r.u64()?,
            uncompressed_size: r.u64()?,
        };
        let key = TileKey { level: r.u64()?, band: r.u64()?, x: r.u64()?, y: r.u64()? };
        tiles
            .insert(key, entry)
            .map_err(|_| Error::open_failed("duplicate tile key in footer index"))?;
    }

    Ok(ParsedFooter {
        data_type,
        width,
        height,
        tile_size,
        bands,
        rats,
        geo,
        projection,
        metadata: dataset_metadata,
        tiles,
    })
}

/// Reads the trailing footer offset and returns the footer region.
pub(crate) fn read_footer_region(file: &mut dyn ByteStream) -> Result<Vec<u8>> {
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < PREAMBLE_LEN + HEADER_MAGIC.len() as u64 + 8 {
        return Err(Error::open_failed("file too short to hold a footer"));
    }

    file.seek(SeekFrom::End(-8))?;
    let mut word = [0u8; 8];
    file.read_exact(&mut word)?;
    let footer_offset = u64::from_le_bytes(word);

    if footer_offset < PREAMBLE_LEN || footer_offset + 8 > file_len {
        return Err(Error::open_failed(format!(
            "footer pointer {} out of range for a {}-byte file",
            footer_offset, file_len
        )));
    }

    file.seek(SeekFrom::Start(footer_offset))?;
    let mut region = vec![0u8; (file_len - 8 - footer_offset) as usize];
    file.read_exact(&mut region)?;
    Ok(region)
}
