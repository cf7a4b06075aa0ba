//! Build a container with a reduced-resolution pyramid.
//!
//! Run with: cargo run --example pyramid

use emu::{CreateOptions, DataType, Dataset, Result};

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("emu_pyramid_demo.emu");

    let opts = CreateOptions::new(2048, 2048, 1, DataType::U16).tile_size(512);
    let ds = Dataset::create(&path, opts)?;

    // Overviews are fixed before the first tile is written.
    ds.build_overviews(&[1], &[2, 4, 8])?;

    let band = ds.band(1)?;
    let mut levels = vec![band];
    for i in 0..band.overview_count() {
        levels.push(band.overview(i).expect("overview just created"));
    }

    for level in &levels {
        let mut block = vec![0u8; level.block_buffer_len()];
        let value = (0xBE00 + level.level() as u16).to_le_bytes();
        for chunk in block.chunks_exact_mut(2) {
            chunk.copy_from_slice(&value);
        }
        for y in 0..level.tiles_down() {
            for x in 0..level.tiles_across() {
                level.write_block(x, y, &block)?;
            }
        }
        println!(
            "level {}: {} x {} px, tile {}, {} tiles",
            level.level(),
            level.x_size(),
            level.y_size(),
            level.tile_size(),
            level.tiles_across() * level.tiles_down()
        );
    }
    ds.close()?;

    let ds = Dataset::open(&path)?;
    let band = ds.band(1)?;
    println!("reopened with {} overview(s)", band.overview_count());
    for i in 0..band.overview_count() {
        let ovr = band.overview(i).expect("listed overview");
        let mut block = vec![0u8; ovr.block_buffer_len()];
        ovr.read_block(0, 0, &mut block)?;
        let first = u16::from_le_bytes([block[0], block[1]]);
        println!("  overview {}: {} x {}, first pixel {:#06x}", i, ovr.x_size(), ovr.y_size(), first);
    }

    std::fs::remove_file(&path).ok();
    Ok(())
}
