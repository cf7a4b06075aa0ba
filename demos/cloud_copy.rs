//! Copy an in-memory source into a cloud-optimised file and show the
//! resulting payload order.
//!
//! Run with: cargo run --example cloud_copy

use emu::{BandSource, CreateOptions, DataType, Dataset, RasterSource, Result};

struct RampBand {
    level: u64,
    size: u64,
    block: u32,
    overviews: Vec<RampBand>,
}

impl BandSource for RampBand {
    fn x_size(&self) -> u64 {
        self.size
    }
    fn y_size(&self) -> u64 {
        self.size
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
    fn read_block(&self, x: u64, y: u64, out: &mut [u8]) -> Result<()> {
        out.fill((self.level * 50 + y * 4 + x) as u8);
        Ok(())
    }
}

struct RampSource {
    band: RampBand,
}

impl RasterSource for RampSource {
    fn width(&self) -> u64 {
        self.band.size
    }
    fn height(&self) -> u64 {
        self.band.size
    }
    fn band_count(&self) -> usize {
        1
    }
    fn data_type(&self) -> DataType {
        DataType::U8
    }
    fn band(&self, _index: usize) -> &dyn BandSource {
        &self.band
    }
}

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("emu_cloud_copy_demo.emu");

    let source = RampSource {
        band: RampBand {
            level: 0,
            size: 256,
            block: 64,
            overviews: vec![
                RampBand { level: 1, size: 128, block: 32, overviews: vec![] },
                RampBand { level: 2, size: 64, block: 16, overviews: vec![] },
            ],
        },
    };

    let mut progress = |fraction: f64, what: &str| {
        println!("  {:5.1}% {}", fraction * 100.0, what);
        true
    };
    Dataset::create_copy(&path, &source, Some(&mut progress))?;

    let ds = Dataset::open(&path)?;
    println!("cloud-optimised: {}", ds.is_cloud_optimised());

    // Tiles sorted by file position come out coarse-to-fine.
    let mut entries = ds.tile_entries();
    entries.sort_by_key(|(_, e)| e.offset);
    for (key, entry) in entries.iter().take(6) {
        println!("  offset {:8}: level {} tile ({}, {})", entry.offset, key.level, key.x, key.y);
    }
    println!("  ... {} tiles total", entries.len());

    // for comparison, a plainly created file is not flagged
    let plain = std::env::temp_dir().join("emu_plain_demo.emu");
    let ds = Dataset::create(&plain, CreateOptions::new(16, 16, 1, DataType::U8).tile_size(16))?;
    ds.close()?;
    println!("plain create cloud-optimised: {}", Dataset::open(&plain)?.is_cloud_optimised());

    std::fs::remove_file(&path).ok();
    std::fs::remove_file(&plain).ok();
    Ok(())
}
