//! The tile index: (level, band, x, y) -> payload location.
//!
//! Tiles are appended to the payload region in whatever order the
//! application writes them; the index is the only record of where each
//! one landed. It lives in memory during a session and is serialized
//! into the footer on close.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Identifies one tile of one band at one pyramid level.
///
/// `level` 0 is the full-resolution band; overview `k` of a band is
/// level `k + 1`. Band numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Pyramid level, 0 for full resolution.
    pub level: u64,
    /// Band number (1-based).
    pub band: u64,
    /// Tile column within the level.
    pub x: u64,
    /// Tile row within the level.
    pub y: u64,
}

/// Where a tile's record lives and how big it is.
///
/// `offset` points at the record's 1-byte compression discriminant;
/// the compressed run follows immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEntry {
    /// File offset of the record's discriminant byte.
    pub offset: u64,
    /// Length of the compressed run after the discriminant.
    pub compressed_size: u64,
    /// Length of the data once decompressed. For a partial edge tile
    /// this covers only the valid extent.
    pub uncompressed_size: u64,
}

/// In-memory mapping from [`TileKey`] to [`TileEntry`].
#[derive(Debug, Default)]
pub struct TileIndex {
    map: HashMap<TileKey, TileEntry>,
}

impl TileIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where a tile was written.
    ///
    /// A key may be inserted at most once per session; a second insert
    /// is an invariant violation.
    pub fn insert(&mut self, key: TileKey, entry: TileEntry) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.map.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::invariant(format!(
                "tile level {} band {} ({}, {}) written twice",
                key.level, key.band, key.x, key.y
            ))),
        }
    }

    /// Whether a tile has already been recorded under `key`.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up a tile.
    pub fn get(&self, key: &TileKey) -> Result<TileEntry> {
        self.map.get(key).copied().ok_or(Error::IndexMissing {
            level: key.level,
            band: key.band,
            x: key.x,
            y: key.y,
        })
    }

    /// Number of tiles recorded.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether any tile has been recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates all entries. The order is arbitrary but stable for the
    /// duration of one serialization pass.
    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &TileEntry)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(level: u64, band: u64, x: u64, y: u64) -> TileKey {
        TileKey { level, band, x, y }
    }

    fn entry(offset: u64) -> TileEntry {
        TileEntry { offset, compressed_size: 10, uncompressed_size: 100 }
    }

    #[test]
    fn test_insert_and_get() {
        let mut index = TileIndex::new();
        index.insert(key(0, 1, 2, 3), entry(11)).unwrap();

        let found = index.get(&key(0, 1, 2, 3)).unwrap();
        assert_eq!(found.offset, 11);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_missing_key() {
        let index = TileIndex::new();
        let err = index.get(&key(1, 2, 3, 4)).unwrap_err();
        assert!(matches!(err, Error::IndexMissing { level: 1, band: 2, x: 3, y: 4 }));
    }

    #[test]
    fn test_double_insert_rejected() {
        let mut index = TileIndex::new();
        index.insert(key(0, 1, 0, 0), entry(11)).unwrap();
        let err = index.insert(key(0, 1, 0, 0), entry(99)).unwrap_err();
        assert!(matches!(err, Error::InvariantViolated(_)));

        // original mapping untouched
        assert_eq!(index.get(&key(0, 1, 0, 0)).unwrap().offset, 11);
    }

    #[test]
    fn test_keys_distinguish_all_fields() {
        let mut index = TileIndex::new();
        index.insert(key(0, 1, 0, 0), entry(1)).unwrap();
        index.insert(key(1, 1, 0, 0), entry(2)).unwrap();
        index.insert(key(0, 2, 0, 0), entry(3)).unwrap();
        index.insert(key(0, 1, 1, 0), entry(4)).unwrap();
        index.insert(key(0, 1, 0, 1), entry(5)).unwrap();
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_iteration_covers_all() {
        let mut index = TileIndex::new();
        for i in 0..100 {
            index.insert(key(0, 1, i, 0), entry(i * 7)).unwrap();
        }
        let mut offsets: Vec<u64> = index.iter().map(|(_, e)| e.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets.len(), 100);
        assert_eq!(offsets[99], 99 * 7);
    }
}
