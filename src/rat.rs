//! The raster attribute table: column-oriented, chunked, compressed.
//!
//! Each band owns one attribute table. A table is a set of typed
//! columns; each column is stored as a list of compressed chunks of at
//! most [`MAX_RAT_CHUNK`] rows, appended to the payload region as the
//! application writes them. Chunks of one column cover disjoint,
//! sorted row ranges; rows no chunk covers read back as zero (numeric)
//! or the empty string.
//!
//! ## Chunk records
//!
//! ```text
//! [compression: u8][compressed bytes ...]
//! ```
//!
//! Integer chunks hold little-endian `i64` rows (whatever the caller's
//! element width), Real chunks hold `f64` rows, String chunks hold the
//! NUL-terminated concatenation of their rows. Chunk locations go into
//! the per-column index serialized with the footer.

use crate::compress;
use crate::dataset::{Access, Dataset, State};
use crate::error::{Error, Result};
use log::debug;
use std::io::{Read, Seek, SeekFrom, Write};

/// Maximum number of rows stored in one attribute chunk.
pub const MAX_RAT_CHUNK: usize = 65_536;

/// The type of an attribute column. Discriminants are the on-disk
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RatFieldType {
    /// Signed integers, stored widened to 64 bits.
    Integer = 0,
    /// 64-bit IEEE-754 floats.
    Real = 1,
    /// Variable-length strings.
    String = 2,
}

impl RatFieldType {
    /// Decode an on-disk field-type code.
    pub fn from_u64(value: u64) -> Result<Self> {
        match value {
            0 => Ok(RatFieldType::Integer),
            1 => Ok(RatFieldType::Real),
            2 => Ok(RatFieldType::String),
            _ => Err(Error::open_failed(format!("unknown attribute field type {}", value))),
        }
    }
}

/// One stored run of rows of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatChunk {
    /// First row the chunk covers.
    pub start_idx: u64,
    /// Number of rows in the chunk.
    pub length: u64,
    /// File offset of the record's compression discriminant.
    pub offset: u64,
    /// Length of the compressed run after the discriminant.
    pub compressed_size: u64,
}

/// One column of an attribute table.
#[derive(Debug)]
pub(crate) struct RatColumn {
    pub(crate) name: String,
    pub(crate) field_type: RatFieldType,
    /// Sorted by `start_idx`; ranges never overlap.
    pub(crate) chunks: Vec<RatChunk>,
}

/// All attribute state of one band, held under the container mutex.
#[derive(Debug, Default)]
pub(crate) struct RatData {
    pub(crate) columns: Vec<RatColumn>,
    pub(crate) row_count: u64,
}

/// Inserts `chunk` keeping the list sorted by start index, rejecting
/// any overlap with an existing range.
pub(crate) fn insert_chunk(chunks: &mut Vec<RatChunk>, chunk: RatChunk) -> Result<()> {
    let pos = chunks.partition_point(|c| c.start_idx < chunk.start_idx);
    if pos > 0 {
        let prev = &chunks[pos - 1];
        if prev.start_idx + prev.length > chunk.start_idx {
            return Err(Error::invariant(format!(
                "attribute chunk [{}, {}) overlaps chunk [{}, {})",
                chunk.start_idx,
                chunk.start_idx + chunk.length,
                prev.start_idx,
                prev.start_idx + prev.length
            )));
        }
    }
    if pos < chunks.len() {
        let next = &chunks[pos];
        if chunk.start_idx + chunk.length > next.start_idx {
            return Err(Error::invariant(format!(
                "attribute chunk [{}, {}) overlaps chunk [{}, {})",
                chunk.start_idx,
                chunk.start_idx + chunk.length,
                next.start_idx,
                next.start_idx + next.length
            )));
        }
    }
    chunks.insert(pos, chunk);
    Ok(())
}

/// Handle to one band's attribute table.
///
/// Obtained from [`crate::Band::rat`]. All payload I/O goes through
/// the container's global mutex, like tile I/O.
#[derive(Debug, Clone, Copy)]
pub struct Rat<'a> {
    ds: &'a Dataset,
    band_index: usize,
}

impl<'a> Rat<'a> {
    pub(crate) fn new(ds: &'a Dataset, band_index: usize) -> Self {
        Self { ds, band_index }
    }

    fn require_write(&self, what: &str) -> Result<()> {
        if self.ds.access != Access::Update {
            return Err(Error::unsupported(format!("{} requires a container open for creation", what)));
        }
        Ok(())
    }

    fn require_read(&self, what: &str) -> Result<()> {
        if self.ds.access != Access::ReadOnly {
            return Err(Error::unsupported(format!(
                "{} requires a container open in read-only mode",
                what
            )));
        }
        Ok(())
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.ds.state.lock().rats[self.band_index].columns.len()
    }

    /// Name of column `col`, if it exists.
    pub fn column_name(&self, col: usize) -> Option<String> {
        self.ds.state.lock().rats[self.band_index].columns.get(col).map(|c| c.name.clone())
    }

    /// Type of column `col`, if it exists.
    pub fn column_type(&self, col: usize) -> Option<RatFieldType> {
        self.ds.state.lock().rats[self.band_index].columns.get(col).map(|c| c.field_type)
    }

    /// Index of the column named `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.ds.state.lock().rats[self.band_index].columns.iter().position(|c| c.name == name)
    }

    /// Snapshot of column `col`'s chunk list, sorted by start row.
    /// Useful for layout diagnostics.
    pub fn chunks(&self, col: usize) -> Option<Vec<RatChunk>> {
        self.ds.state.lock().rats[self.band_index].columns.get(col).map(|c| c.chunks.clone())
    }

    /// The logical number of rows.
    pub fn row_count(&self) -> u64 {
        self.ds.state.lock().rats[self.band_index].row_count
    }

    /// Raises the logical row count to `rows`. Never shrinks.
    pub fn set_row_count(&self, rows: u64) -> Result<()> {
        self.require_write("resizing the attribute table")?;
        let mut state = self.ds.state.lock();
        let rat = &mut state.rats[self.band_index];
        if rows > rat.row_count {
            rat.row_count = rows;
        }
        Ok(())
    }

    /// Declares a new column and returns its index. Columns must be
    /// declared before any data is written to them.
    pub fn create_column(&self, name: &str, field_type: RatFieldType) -> Result<usize> {
        self.require_write("adding attribute columns")?;
        let mut state = self.ds.state.lock();
        let columns = &mut state.rats[self.band_index].columns;
        columns.push(RatColumn { name: name.to_string(), field_type, chunks: Vec::new() });
        debug!("band {} attribute column '{}' ({:?}) created", self.band_index + 1, name, field_type);
        Ok(columns.len() - 1)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn column_type_checked(state: &State, band: usize, col: usize) -> Result<RatFieldType> {
        state.rats[band]
            .columns
            .get(col)
            .map(|c| c.field_type)
            .ok_or_else(|| Error::type_mismatch(format!("no attribute column {}", col)))
    }

    /// Clamps a row range to the logical row count. Returns the number
    /// of rows that remain.
    fn clamp(row_count: u64, start_row: u64, len: usize) -> usize {
        if start_row >= row_count {
            0
        } else {
            len.min((row_count - start_row) as usize)
        }
    }

    /// Appends `rows` (already encoded per 8-byte row) as one or more
    /// chunks of at most [`MAX_RAT_CHUNK`] rows.
    fn append_numeric(
        &self,
        state: &mut State,
        col: usize,
        start_row: u64,
        rows: &[[u8; 8]],
    ) -> Result<()> {
        let ctype = self.ds.compression;
        let mut done = 0usize;
        while done < rows.len() {
            let sub = (rows.len() - done).min(MAX_RAT_CHUNK);
            let mut raw = Vec::with_capacity(sub * 8);
            for row in &rows[done..done + sub] {
                raw.extend_from_slice(row);
            }

            let offset = state.file.stream_position()?;
            state.file.write_all(&[ctype as u8])?;
            let compressed = compress::compress(ctype, &raw)?;
            state.file.write_all(&compressed)?;

            insert_chunk(
                &mut state.rats[self.band_index].columns[col].chunks,
                RatChunk {
                    start_idx: start_row + done as u64,
                    length: sub as u64,
                    offset,
                    compressed_size: compressed.len() as u64,
                },
            )?;
            done += sub;
        }
        Ok(())
    }

    /// Writes integer values starting at `start_row`. The column may
    /// be Integer or Real; writes past the logical row count are
    /// clamped off.
    pub fn write_i64(&self, col: usize, start_row: u64, values: &[i64]) -> Result<()> {
        self.require_write("writing attribute values")?;
        let mut state = self.ds.state.lock();
        let ftype = Self::column_type_checked(&state, self.band_index, col)?;
        let n = Self::clamp(state.rats[self.band_index].row_count, start_row, values.len());
        if n == 0 {
            return Ok(());
        }

        let rows: Vec<[u8; 8]> = match ftype {
            RatFieldType::Integer => values[..n].iter().map(|v| v.to_le_bytes()).collect(),
            // widen through the adapter: integer input into a real column
            RatFieldType::Real => values[..n].iter().map(|v| (*v as f64).to_le_bytes()).collect(),
            RatFieldType::String => {
                return Err(Error::type_mismatch(format!(
                    "column {} holds strings, numeric buffer given",
                    col
                )))
            }
        };
        self.append_numeric(&mut state, col, start_row, &rows)
    }

    /// Writes 32-bit integer values. Rows are widened to 64 bits
    /// before storage whatever the caller's element width.
    pub fn write_i32(&self, col: usize, start_row: u64, values: &[i32]) -> Result<()> {
        let widened: Vec<i64> = values.iter().map(|&v| v as i64).collect();
        self.write_i64(col, start_row, &widened)
    }

    /// Writes real values starting at `start_row`. The column may be
    /// Real or Integer (values are truncated toward zero).
    pub fn write_f64(&self, col: usize, start_row: u64, values: &[f64]) -> Result<()> {
        self.require_write("writing attribute values")?;
        let mut state = self.ds.state.lock();
        let ftype = Self::column_type_checked(&state, self.band_index, col)?;
        let n = Self::clamp(state.rats[self.band_index].row_count, start_row, values.len());
        if n == 0 {
            return Ok(());
        }

        let rows: Vec<[u8; 8]> = match ftype {
            RatFieldType::Real => values[..n].iter().map(|v| v.to_le_bytes()).collect(),
            RatFieldType::Integer => values[..n].iter().map(|v| (*v as i64).to_le_bytes()).collect(),
            RatFieldType::String => {
                return Err(Error::type_mismatch(format!(
                    "column {} holds strings, numeric buffer given",
                    col
                )))
            }
        };
        self.append_numeric(&mut state, col, start_row, &rows)
    }

    /// Writes string values starting at `start_row`. The column must
    /// be a String column.
    pub fn write_strings(&self, col: usize, start_row: u64, values: &[&str]) -> Result<()> {
        self.require_write("writing attribute values")?;
        let mut state = self.ds.state.lock();
        let ftype = Self::column_type_checked(&state, self.band_index, col)?;
        if ftype != RatFieldType::String {
            return Err(Error::type_mismatch(format!(
                "column {} holds {:?}, string buffer given",
                col, ftype
            )));
        }
        let n = Self::clamp(state.rats[self.band_index].row_count, start_row, values.len());

        let ctype = self.ds.compression;
        let mut done = 0usize;
        while done < n {
            let sub = (n - done).min(MAX_RAT_CHUNK);
            let mut raw = Vec::new();
            for value in &values[done..done + sub] {
                raw.extend_from_slice(value.as_bytes());
                raw.push(0);
            }

            let offset = state.file.stream_position()?;
            state.file.write_all(&[ctype as u8])?;
            let compressed = compress::compress(ctype, &raw)?;
            state.file.write_all(&compressed)?;

            insert_chunk(
                &mut state.rats[self.band_index].columns[col].chunks,
                RatChunk {
                    start_idx: start_row + done as u64,
                    length: sub as u64,
                    offset,
                    compressed_size: compressed.len() as u64,
                },
            )?;
            done += sub;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Reads `len` rows of numeric data starting at `start_row` into a
    /// flat 8-byte-per-row buffer, walking the sorted chunk list.
    fn read_numeric_rows(&self, col: usize, start_row: u64, len: usize) -> Result<Vec<u8>> {
        let mut state = self.ds.state.lock();
        let State { file, rats, .. } = &mut *state;
        let column = &rats[self.band_index].columns[col];

        let mut out = vec![0u8; len * 8];
        let end = start_row + len as u64;

        // last chunk starting at or before the requested row
        let mut i = column.chunks.partition_point(|c| c.start_idx <= start_row);
        i = i.saturating_sub(1);

        while i < column.chunks.len() {
            let chunk = column.chunks[i];
            if chunk.start_idx >= end {
                break;
            }
            let chunk_end = chunk.start_idx + chunk.length;
            if chunk_end > start_row {
                let raw = read_chunk_payload(file, &chunk, Some(chunk.length as usize * 8))?;

                let from = chunk.start_idx.max(start_row);
                let to = chunk_end.min(end);
                let src = (from - chunk.start_idx) as usize * 8;
                let dst = (from - start_row) as usize * 8;
                let bytes = (to - from) as usize * 8;
                out[dst..dst + bytes].copy_from_slice(&raw[src..src + bytes]);
            }
            i += 1;
        }
        Ok(out)
    }

    /// Reads integer values. Rows never written read as 0; the range
    /// is clamped to the logical row count. Real columns are converted
    /// by truncation toward zero.
    pub fn read_i64(&self, col: usize, start_row: u64, len: usize) -> Result<Vec<i64>> {
        self.require_read("reading attribute values")?;
        let (ftype, n) = {
            let state = self.ds.state.lock();
            let ftype = Self::column_type_checked(&state, self.band_index, col)?;
            (ftype, Self::clamp(state.rats[self.band_index].row_count, start_row, len))
        };
        match ftype {
            RatFieldType::Integer => {
                let raw = self.read_numeric_rows(col, start_row, n)?;
                Ok(raw.chunks_exact(8).map(|b| i64::from_le_bytes(b.try_into().unwrap())).collect())
            }
            RatFieldType::Real => {
                let raw = self.read_numeric_rows(col, start_row, n)?;
                Ok(raw
                    .chunks_exact(8)
                    .map(|b| f64::from_le_bytes(b.try_into().unwrap()) as i64)
                    .collect())
            }
            RatFieldType::String => Err(Error::type_mismatch(format!(
                "column {} holds strings, numeric buffer given",
                col
            ))),
        }
    }

    /// Reads 32-bit integer values; stored 64-bit rows that do not
    /// fit are saturated.
    pub fn read_i32(&self, col: usize, start_row: u64, len: usize) -> Result<Vec<i32>> {
        let wide = self.read_i64(col, start_row, len)?;
        Ok(wide.iter().map(|&v| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32).collect())
    }

    /// Reads real values; Integer columns are widened to doubles.
    pub fn read_f64(&self, col: usize, start_row: u64, len: usize) -> Result<Vec<f64>> {
        self.require_read("reading attribute values")?;
        let (ftype, n) = {
            let state = self.ds.state.lock();
            let ftype = Self::column_type_checked(&state, self.band_index, col)?;
            (ftype, Self::clamp(state.rats[self.band_index].row_count, start_row, len))
        };
        match ftype {
            RatFieldType::Real => {
                let raw = self.read_numeric_rows(col, start_row, n)?;
                Ok(raw.chunks_exact(8).map(|b| f64::from_le_bytes(b.try_into().unwrap())).collect())
            }
            RatFieldType::Integer => {
                let raw = self.read_numeric_rows(col, start_row, n)?;
                Ok(raw
                    .chunks_exact(8)
                    .map(|b| i64::from_le_bytes(b.try_into().unwrap()) as f64)
                    .collect())
            }
            RatFieldType::String => Err(Error::type_mismatch(format!(
                "column {} holds strings, numeric buffer given",
                col
            ))),
        }
    }

    /// Reads string values. Rows never written read as the empty
    /// string.
    pub fn read_strings(&self, col: usize, start_row: u64, len: usize) -> Result<Vec<String>> {
        self.require_read("reading attribute values")?;
        let mut state = self.ds.state.lock();
        let ftype = Self::column_type_checked(&state, self.band_index, col)?;
        if ftype != RatFieldType::String {
            return Err(Error::type_mismatch(format!(
                "column {} holds {:?}, string buffer given",
                col, ftype
            )));
        }
        let n = Self::clamp(state.rats[self.band_index].row_count, start_row, len);

        let State { file, rats, .. } = &mut *state;
        let column = &rats[self.band_index].columns[col];

        let mut out = vec![String::new(); n];
        let end = start_row + n as u64;

        let mut i = column.chunks.partition_point(|c| c.start_idx <= start_row);
        i = i.saturating_sub(1);

        while i < column.chunks.len() {
            let chunk = column.chunks[i];
            if chunk.start_idx >= end {
                break;
            }
            let chunk_end = chunk.start_idx + chunk.length;
            if chunk_end > start_row {
                let raw = read_chunk_payload(file, &chunk, None)?;
                let rows: Vec<&[u8]> = raw.split(|&b| b == 0).collect();
                // a NUL-joined run of N rows splits into N + 1 pieces
                if rows.len() < chunk.length as usize {
                    return Err(Error::codec(format!(
                        "string chunk at row {} holds {} rows, index says {}",
                        chunk.start_idx,
                        rows.len().saturating_sub(1),
                        chunk.length
                    )));
                }

                let from = chunk.start_idx.max(start_row);
                let to = chunk_end.min(end);
                for row in from..to {
                    let within = (row - chunk.start_idx) as usize;
                    out[(row - start_row) as usize] =
                        String::from_utf8_lossy(rows[within]).into_owned();
                }
            }
            i += 1;
        }
        Ok(out)
    }
}

/// Reads and decompresses one chunk record. `expected` is the exact
/// uncompressed byte length for numeric chunks, or `None` for string
/// chunks whose length is recovered from the stream itself.
fn read_chunk_payload(
    file: &mut Box<dyn crate::stream::ByteStream>,
    chunk: &RatChunk,
    expected: Option<usize>,
) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(chunk.offset))?;
    let mut disc = [0u8; 1];
    file.read_exact(&mut disc)?;
    let ctype = compress::CompressionType::from_u8(disc[0])?;

    let mut compressed = vec![0u8; chunk.compressed_size as usize];
    file.read_exact(&mut compressed)?;

    match expected {
        Some(len) => {
            let mut raw = vec![0u8; len];
            compress::decompress_into(ctype, &compressed, &mut raw)?;
            Ok(raw)
        }
        None => compress::decompress_unsized(ctype, &compressed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, length: u64) -> RatChunk {
        RatChunk { start_idx: start, length, offset: 0, compressed_size: 0 }
    }

    #[test]
    fn test_field_type_codes() {
        assert_eq!(RatFieldType::from_u64(0).unwrap(), RatFieldType::Integer);
        assert_eq!(RatFieldType::from_u64(1).unwrap(), RatFieldType::Real);
        assert_eq!(RatFieldType::from_u64(2).unwrap(), RatFieldType::String);
        assert!(RatFieldType::from_u64(3).is_err());
    }

    #[test]
    fn test_insert_chunk_keeps_sorted() {
        let mut chunks = Vec::new();
        insert_chunk(&mut chunks, chunk(100, 10)).unwrap();
        insert_chunk(&mut chunks, chunk(0, 10)).unwrap();
        insert_chunk(&mut chunks, chunk(50, 10)).unwrap();

        let starts: Vec<u64> = chunks.iter().map(|c| c.start_idx).collect();
        assert_eq!(starts, vec![0, 50, 100]);
    }

    #[test]
    fn test_insert_chunk_adjacent_ok() {
        let mut chunks = Vec::new();
        insert_chunk(&mut chunks, chunk(0, 10)).unwrap();
        insert_chunk(&mut chunks, chunk(10, 10)).unwrap();
        insert_chunk(&mut chunks, chunk(20, 5)).unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_insert_chunk_overlap_rejected() {
        let mut chunks = Vec::new();
        insert_chunk(&mut chunks, chunk(10, 10)).unwrap();

        // overlaps the tail of the existing chunk
        assert!(insert_chunk(&mut chunks, chunk(15, 10)).is_err());
        // overlaps the head
        assert!(insert_chunk(&mut chunks, chunk(5, 10)).is_err());
        // fully inside
        assert!(insert_chunk(&mut chunks, chunk(12, 2)).is_err());
        // fully covering
        assert!(insert_chunk(&mut chunks, chunk(5, 30)).is_err());

        assert_eq!(chunks.len(), 1);
    }
}
