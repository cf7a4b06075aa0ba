//! Attach a raster attribute table to a thematic band.
//!
//! Run with: cargo run --example attributes

use emu::{CreateOptions, DataType, Dataset, RatFieldType, Result};

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("emu_attributes_demo.emu");

    let opts = CreateOptions::new(64, 64, 1, DataType::U8).tile_size(64).thematic(true);
    let ds = Dataset::create(&path, opts)?;

    let band = ds.band(1)?;
    band.write_block(0, 0, &vec![3u8; band.block_buffer_len()])?;

    let rat = band.rat();
    let hist = rat.create_column("Histogram", RatFieldType::Integer)?;
    let name = rat.create_column("Name", RatFieldType::String)?;
    let red = rat.create_column("Red", RatFieldType::Integer)?;
    rat.set_row_count(5)?;

    rat.write_i64(hist, 0, &[120, 48, 1024, 7, 0])?;
    rat.write_strings(name, 0, &["water", "forest", "pasture", "urban", "cloud"])?;
    // sparse write: only classes 1..3 get a colour
    rat.write_i64(red, 1, &[34, 160])?;
    ds.close()?;

    let ds = Dataset::open(&path)?;
    let band = ds.band(1)?;
    println!("band thematic: {}", band.is_thematic());

    let rat = band.rat();
    println!("{} columns, {} rows", rat.column_count(), rat.row_count());
    let names = rat.read_strings(name, 0, 5)?;
    let counts = rat.read_i64(hist, 0, 5)?;
    let reds = rat.read_i64(red, 0, 5)?;
    for row in 0..5usize {
        println!("  class {}: {:10} count {:5} red {}", row, names[row], counts[row], reds[row]);
    }

    std::fs::remove_file(&path).ok();
    Ok(())
}
