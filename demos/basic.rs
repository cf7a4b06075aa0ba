//! Create a small container, seal it, and read the pixels back.
//!
//! Run with: cargo run --example basic

use emu::{CreateOptions, DataType, Dataset, GeoTransform, Result};

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("emu_basic_demo.emu");

    // A 100 x 100 byte raster tiled at 64: the right and bottom edge
    // tiles are partial and stored compacted.
    let opts = CreateOptions::new(100, 100, 1, DataType::U8).tile_size(64);
    let ds = Dataset::create(&path, opts)?;
    ds.set_geo_transform(GeoTransform::from_coefficients([
        400000.0, 10.0, 0.0, 6500000.0, 0.0, -10.0,
    ]))?;
    ds.set_projection("PROJCS[\"WGS 84 / UTM zone 55S\"]")?;

    let band = ds.band(1)?;
    println!(
        "writing {} x {} tiles of {} px",
        band.tiles_across(),
        band.tiles_down(),
        band.tile_size()
    );

    for y in 0..band.tiles_down() {
        for x in 0..band.tiles_across() {
            let mut block = vec![0u8; band.block_buffer_len()];
            for (i, px) in block.iter_mut().enumerate() {
                *px = (i % 251) as u8;
            }
            band.write_block(x, y, &block)?;
        }
    }

    band.set_no_data(0.0)?;
    band.set_metadata_item("DESCRIPTION", "demo band")?;
    ds.close()?;

    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    println!("sealed {} ({} bytes)", path.display(), size);

    // Read it back.
    let ds = Dataset::open(&path)?;
    let band = ds.band(1)?;
    let mut block = vec![0u8; band.block_buffer_len()];
    band.read_block(0, 0, &mut block)?;
    println!(
        "reopened: no-data {:?}, first pixels {:?}",
        band.no_data(),
        &block[..8]
    );

    std::fs::remove_file(&path).ok();
    Ok(())
}
