// Streaming entry points: containers over arbitrary byte sinks, no
// filesystem involved.

use emu::{CreateOptions, DataType, Dataset, Error, GeoTransform, RatFieldType};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// A cloneable in-memory sink: the shape a pipe or multipart-upload
/// adapter presents to the container. The test keeps one handle to
/// recover the bytes after close consumes the other.
#[derive(Clone, Default)]
struct SharedStream {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl SharedStream {
    fn new() -> Self {
        Self::default()
    }

    fn bytes(&self) -> Vec<u8> {
        self.inner.lock().unwrap().get_ref().clone()
    }
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap().read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

impl Seek for SharedStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.lock().unwrap().seek(pos)
    }
}

/// A full write/seal/reopen cycle entirely in memory: tiles (partial
/// ones included), an attribute column, georeferencing and metadata.
#[test]
fn test_round_trip_through_memory_streams() {
    let sink = SharedStream::new();

    let opts = CreateOptions::new(10, 10, 1, DataType::U8).tile_size(8);
    let ds = Dataset::create_from_stream(Box::new(sink.clone()), opts).unwrap();
    ds.set_geo_transform(GeoTransform::from_coefficients([10.0, 2.0, 0.0, 90.0, 0.0, -2.0]))
        .unwrap();
    ds.set_projection("PROJCS[\"in-memory\"]").unwrap();
    ds.set_metadata_item("SINK", "cursor").unwrap();

    let band = ds.band(1).unwrap();
    for ty in 0..2u64 {
        for tx in 0..2u64 {
            let mut block = vec![0u8; 64];
            let (vw, vh) = band.actual_block_size(tx, ty).unwrap();
            for r in 0..vh as u64 {
                for c in 0..vw as u64 {
                    block[(r * 8 + c) as usize] = ((ty * 8 + r) * 10 + tx * 8 + c) as u8;
                }
            }
            band.write_block(tx, ty, &block).unwrap();
        }
    }

    let rat = band.rat();
    let col = rat.create_column("codes", RatFieldType::Integer).unwrap();
    rat.set_row_count(50).unwrap();
    rat.write_i64(col, 0, &(0..50).collect::<Vec<i64>>()).unwrap();
    ds.close().unwrap();

    let bytes = SharedStream::bytes(&sink);
    assert_eq!(&bytes[0..7], b"EMU0001", "preamble heads the stream");

    let ds = Dataset::open_from_stream(Box::new(Cursor::new(bytes))).unwrap();
    assert_eq!((ds.width(), ds.height(), ds.band_count()), (10, 10, 1));
    assert_eq!(ds.geo_transform().coefficients()[0], 10.0);
    assert_eq!(ds.projection(), "PROJCS[\"in-memory\"]");
    assert_eq!(ds.metadata().get("SINK"), Some("cursor"));

    let band = ds.band(1).unwrap();
    for ty in 0..2u64 {
        for tx in 0..2u64 {
            let mut block = vec![0u8; 64];
            band.read_block(tx, ty, &mut block).unwrap();
            let (vw, vh) = band.actual_block_size(tx, ty).unwrap();
            for r in 0..vh as u64 {
                for c in 0..vw as u64 {
                    assert_eq!(
                        block[(r * 8 + c) as usize] as u64,
                        (ty * 8 + r) * 10 + tx * 8 + c
                    );
                }
            }
        }
    }

    let rat = band.rat();
    assert_eq!(rat.read_i64(col, 0, 50).unwrap(), (0..50).collect::<Vec<i64>>());
}

/// The writer never revisits payload bytes: every record lands at a
/// strictly increasing offset in the sink.
#[test]
fn test_stream_writes_are_single_pass() {
    let sink = SharedStream::new();

    let opts = CreateOptions::new(32, 32, 1, DataType::U8).tile_size(16);
    let ds = Dataset::create_from_stream(Box::new(sink.clone()), opts).unwrap();
    let band = ds.band(1).unwrap();
    for y in 0..2u64 {
        for x in 0..2u64 {
            band.write_block(x, y, &vec![7u8; 256]).unwrap();
        }
    }
    let mut offsets: Vec<u64> = ds.tile_entries().iter().map(|(_, e)| e.offset).collect();
    offsets.sort_unstable();
    assert_eq!(offsets[0], 11, "payload begins right after the preamble");
    for pair in offsets.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    ds.close().unwrap();

    // trailing 8 bytes point back into the stream at the footer magic
    let bytes = SharedStream::bytes(&sink);
    let footer = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap()) as usize;
    assert_eq!(&bytes[footer..footer + 4], b"HDR\0");
}

/// A truncated in-memory stream is refused like a truncated file.
#[test]
fn test_truncated_stream_rejected() {
    let sink = SharedStream::new();
    let ds = Dataset::create_from_stream(
        Box::new(sink.clone()),
        CreateOptions::new(8, 8, 1, DataType::U8).tile_size(8),
    )
    .unwrap();
    ds.band(1).unwrap().write_block(0, 0, &[1u8; 64]).unwrap();
    ds.close().unwrap();

    let mut bytes = SharedStream::bytes(&sink);
    bytes.truncate(bytes.len() - 4);
    assert!(matches!(
        Dataset::open_from_stream(Box::new(Cursor::new(bytes))),
        Err(Error::OpenFailed(_))
    ));
}

/// Degenerate streams fail the open cleanly.
#[test]
fn test_short_streams_rejected() {
    for bytes in [Vec::new(), b"EMU".to_vec(), b"EMU0001\0\0\0\0".to_vec()] {
        assert!(matches!(
            Dataset::open_from_stream(Box::new(Cursor::new(bytes))),
            Err(Error::OpenFailed(_))
        ));
    }
}

/// A sealed stream that never touched the filesystem opens without any
/// extension check.
#[test]
fn test_no_extension_gate_on_streams() {
    let sink = SharedStream::new();
    let ds = Dataset::create_from_stream(
        Box::new(sink.clone()),
        CreateOptions::new(4, 4, 0, DataType::U8).tile_size(4),
    )
    .unwrap();
    ds.close().unwrap();

    let ds = Dataset::open_from_stream(Box::new(Cursor::new(SharedStream::bytes(&sink)))).unwrap();
    assert_eq!(ds.band_count(), 0);
    assert_eq!(ds.tile_count(), 0);
}
