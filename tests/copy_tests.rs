// Cloud-optimised copy pipeline: layout ordering, propagation,
// cancellation.

use emu::{
    BandSource, CreateOptions, DataType, Dataset, Error, GeoTransform, MetadataList, RasterSource,
    RatFieldType, RatSource, Statistics,
};
use tempfile::TempDir;

fn scratch(name: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

/// Deterministic fill for a tile of a given band and pyramid level.
fn fill_value(band: u64, level: u64, x: u64, y: u64) -> u8 {
    (band * 37 + level * 11 + x * 3 + y) as u8
}

struct MemBand {
    band: u64,
    level: u64,
    x_size: u64,
    y_size: u64,
    block: u32,
    overviews: Vec<MemBand>,
    rat: Option<MemRat>,
    no_data: Option<i64>,
    stats: Option<Statistics>,
    metadata: MetadataList,
}

impl MemBand {
    fn new(band: u64, level: u64, x_size: u64, y_size: u64, block: u32) -> Self {
        Self {
            band,
            level,
            x_size,
            y_size,
            block,
            overviews: Vec::new(),
            rat: None,
            no_data: None,
            stats: None,
            metadata: MetadataList::new(),
        }
    }
}

impl BandSource for MemBand {
    fn x_size(&self) -> u64 {
        self.x_size
    }
    fn y_size(&self) -> u64 {
        self.y_size
    }
    fn block_size(&self) -> (u32, u32) {
        (self.block, self.block)
    }
    fn overview_count(&self) -> usize {
        self.overviews.len()
    }
    fn overview(&self, index: usize) -> Option<&dyn BandSource> {
        self.overviews.get(index).map(|b| b as &dyn BandSource)
    }
    fn read_block(&self, x: u64, y: u64, out: &mut [u8]) -> emu::Result<()> {
        out.fill(fill_value(self.band, self.level, x, y));
        Ok(())
    }
    fn no_data(&self) -> Option<i64> {
        self.no_data
    }
    fn statistics(&self) -> Option<Statistics> {
        self.stats
    }
    fn metadata(&self) -> MetadataList {
        self.metadata.clone()
    }
    fn rat(&self) -> Option<&dyn RatSource> {
        self.rat.as_ref().map(|r| r as &dyn RatSource)
    }
}

struct MemRat {
    histogram: Vec<i64>,
    names: Vec<String>,
}

impl RatSource for MemRat {
    fn column_count(&self) -> usize {
        2
    }
    fn column_name(&self, col: usize) -> String {
        ["Histogram", "Name"][col].to_string()
    }
    fn column_type(&self, col: usize) -> RatFieldType {
        [RatFieldType::Integer, RatFieldType::String][col]
    }
    fn row_count(&self) -> u64 {
        self.histogram.len() as u64
    }
    fn read_i64(&self, _col: usize, start: u64, len: usize) -> emu::Result<Vec<i64>> {
        Ok(self.histogram[start as usize..start as usize + len].to_vec())
    }
    fn read_f64(&self, _col: usize, start: u64, len: usize) -> emu::Result<Vec<f64>> {
        Ok(self.histogram[start as usize..start as usize + len].iter().map(|&v| v as f64).collect())
    }
    fn read_strings(&self, _col: usize, start: u64, len: usize) -> emu::Result<Vec<String>> {
        Ok(self.names[start as usize..start as usize + len].to_vec())
    }
}

struct MemRaster {
    bands: Vec<MemBand>,
    width: u64,
    height: u64,
    metadata: MetadataList,
}

impl RasterSource for MemRaster {
    fn width(&self) -> u64 {
        self.width
    }
    fn height(&self) -> u64 {
        self.height
    }
    fn band_count(&self) -> usize {
        self.bands.len()
    }
    fn data_type(&self) -> DataType {
        DataType::U8
    }
    fn band(&self, index: usize) -> &dyn BandSource {
        &self.bands[index]
    }
    fn geo_transform(&self) -> Option<GeoTransform> {
        Some(GeoTransform::from_coefficients([100.0, 1.0, 0.0, 900.0, 0.0, -1.0]))
    }
    fn projection(&self) -> Option<String> {
        Some("PROJCS[\"copied\"]".to_string())
    }
    fn metadata(&self) -> MetadataList {
        self.metadata.clone()
    }
}

/// 64 x 64, 3 bands, blocks of 16, three overview levels, a RAT on
/// band 1.
fn pyramid_source() -> MemRaster {
    let mut bands = Vec::new();
    for number in 1..=3u64 {
        let mut band = MemBand::new(number, 0, 64, 64, 16);
        band.overviews = vec![
            MemBand::new(number, 1, 32, 32, 8),
            MemBand::new(number, 2, 16, 16, 4),
            MemBand::new(number, 3, 8, 8, 2),
        ];
        if number == 1 {
            band.rat = Some(MemRat {
                histogram: (0..300).map(|v| v * 2).collect(),
                names: (0..300).map(|v| format!("class-{}", v)).collect(),
            });
            band.no_data = Some(0);
            band.stats = Some(Statistics { min: 1.0, max: 250.0, mean: 99.5, std_dev: 13.25 });
            band.metadata.set("DESCRIPTION", "classified");
        }
        bands.push(band);
    }
    let mut metadata = MetadataList::new();
    metadata.set("GENERATOR", "copy-test");
    MemRaster { bands, width: 64, height: 64, metadata }
}

#[test]
fn test_copy_payload_ordering_is_cloud_optimised() {
    let (_dir, path) = scratch("ordered.emu");
    Dataset::create_copy(&path, &pyramid_source(), None).unwrap();

    let ds = Dataset::open(&path).unwrap();
    assert!(ds.is_cloud_optimised());

    // 16 tiles at every level of every band
    let entries = ds.tile_entries();
    assert_eq!(entries.len(), 3 * 4 * 16);

    let offsets_at = |level: u64| -> Vec<u64> {
        entries.iter().filter(|(k, _)| k.level == level).map(|(_, e)| e.offset).collect()
    };

    // coarse levels occupy strictly earlier file regions
    for (coarse, fine) in [(3u64, 2u64), (2, 1)] {
        let max_coarse = offsets_at(coarse).into_iter().max().unwrap();
        let min_fine = offsets_at(fine).into_iter().min().unwrap();
        assert!(
            max_coarse < min_fine,
            "level {} tiles must precede level {}",
            coarse,
            fine
        );
    }

    // the attribute chunks land after the last overview and before
    // the first full-resolution tile
    let rat = ds.band(1).unwrap().rat();
    let mut rat_offsets = Vec::new();
    for col in 0..rat.column_count() {
        for chunk in rat.chunks(col).unwrap() {
            rat_offsets.push(chunk.offset);
        }
    }
    assert!(!rat_offsets.is_empty());
    let max_overview = offsets_at(1).into_iter().max().unwrap();
    let min_full = offsets_at(0).into_iter().min().unwrap();
    assert!(rat_offsets.iter().all(|&o| o > max_overview && o < min_full));

    // within one level, band 1's tiles precede band 2's precede band 3's
    for level in 0..=3u64 {
        for band in 1..3u64 {
            let max_this: u64 = entries
                .iter()
                .filter(|(k, _)| k.level == level && k.band == band)
                .map(|(_, e)| e.offset)
                .max()
                .unwrap();
            let min_next: u64 = entries
                .iter()
                .filter(|(k, _)| k.level == level && k.band == band + 1)
                .map(|(_, e)| e.offset)
                .min()
                .unwrap();
            assert!(max_this < min_next);
        }
    }
}

#[test]
fn test_copy_mirrors_geometry_and_pixels() {
    let (_dir, path) = scratch("mirror.emu");
    Dataset::create_copy(&path, &pyramid_source(), None).unwrap();

    let ds = Dataset::open(&path).unwrap();
    assert_eq!((ds.width(), ds.height(), ds.band_count()), (64, 64, 3));
    assert_eq!(ds.tile_size(), 16);

    for number in 1..=3u64 {
        let band = ds.band(number).unwrap();
        assert_eq!(band.overview_count(), 3);
        let expect = [(32u64, 32u64, 8u32), (16, 16, 4), (8, 8, 2)];
        for (i, (w, h, t)) in expect.iter().enumerate() {
            let ovr = band.overview(i).unwrap();
            assert_eq!((ovr.x_size(), ovr.y_size(), ovr.tile_size()), (*w, *h, *t));
        }

        // spot-check pixels at every level
        let levels = [band, band.overview(0).unwrap(), band.overview(1).unwrap(),
            band.overview(2).unwrap()];
        for level in levels {
            let mut buf = vec![0u8; level.block_buffer_len()];
            for y in 0..level.tiles_down() {
                for x in 0..level.tiles_across() {
                    level.read_block(x, y, &mut buf).unwrap();
                    let expected = fill_value(number, level.level(), x, y);
                    assert!(buf.iter().all(|&b| b == expected));
                }
            }
        }
    }
}

#[test]
fn test_copy_propagates_side_state() {
    let (_dir, path) = scratch("side.emu");
    Dataset::create_copy(&path, &pyramid_source(), None).unwrap();

    let ds = Dataset::open(&path).unwrap();
    assert_eq!(ds.geo_transform().coefficients()[0], 100.0);
    assert_eq!(ds.projection(), "PROJCS[\"copied\"]");
    assert_eq!(ds.metadata().get("GENERATOR"), Some("copy-test"));

    let band = ds.band(1).unwrap();
    assert_eq!(band.no_data(), Some(0));
    assert_eq!(band.statistics().mean, 99.5);
    assert_eq!(band.metadata().get("DESCRIPTION"), Some("classified"));

    let rat = band.rat();
    assert_eq!(rat.row_count(), 300);
    assert_eq!(rat.read_i64(0, 0, 300).unwrap(), (0..300).map(|v| v * 2).collect::<Vec<i64>>());
    let names = rat.read_strings(1, 297, 3).unwrap();
    assert_eq!(names, vec!["class-297", "class-298", "class-299"]);

    // bands without a source RAT stay empty
    assert_eq!(ds.band(2).unwrap().rat().column_count(), 0);
}

#[test]
fn test_copy_cancellation_counts_tiles() {
    let (_dir, path) = scratch("cancelled.emu");

    let mut polls = 0u64;
    let mut cb = |fraction: f64, _msg: &str| {
        polls += 1;
        fraction < 0.25
    };
    let err = Dataset::create_copy(&path, &pyramid_source(), Some(&mut cb)).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    // polled once per tile until the cut-off
    assert!(polls > 0 && polls < 3 * 4 * 16);
    assert!(Dataset::open(&path).is_err());
}

/// A source without overviews still copies; the destination simply
/// has none.
#[test]
fn test_copy_without_overviews() {
    let (_dir, path) = scratch("noovr.emu");

    let mut bands = Vec::new();
    for number in 1..=2u64 {
        bands.push(MemBand::new(number, 0, 40, 24, 8));
    }
    let src =
        MemRaster { bands, width: 40, height: 24, metadata: MetadataList::new() };
    Dataset::create_copy(&path, &src, None).unwrap();

    let ds = Dataset::open(&path).unwrap();
    assert_eq!(ds.band(1).unwrap().overview_count(), 0);
    // 5 x 3 tiles per band
    assert_eq!(ds.tile_count(), 2 * 15);

    let band = ds.band(2).unwrap();
    let mut buf = vec![0u8; band.block_buffer_len()];
    band.read_block(4, 2, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == fill_value(2, 0, 4, 2)));
}
