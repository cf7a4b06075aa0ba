//! Key/value metadata lists and their on-disk blob encoding.
//!
//! Metadata is stored as a single compressed blob per band and per
//! dataset. The uncompressed form is a run of `KEY=VALUE` entries
//! separated by NUL bytes and terminated by an extra NUL (so the blob
//! always ends in a double NUL):
//!
//! ```text
//! KEY1=VALUE1 \0 KEY2=VALUE2 \0 \0
//! ```
//!
//! Statistics and the cloud-optimised flag are stored structurally in
//! the footer instead; their keys are filtered out before encoding.

use crate::compress::{self, CompressionType};
use crate::error::Result;

/// Metadata keys that are stored structurally and never serialized
/// into the metadata blob.
pub const RESERVED_KEYS: [&str; 5] = [
    "STATISTICS_MINIMUM",
    "STATISTICS_MAXIMUM",
    "STATISTICS_MEAN",
    "STATISTICS_STDDEV",
    "CLOUD_OPTIMISED",
];

/// An ordered key/value list with replace-on-set semantics.
///
/// Keys are unique within a list; setting an existing key replaces its
/// value in place, preserving the original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataList {
    items: Vec<(String, String)>,
}

impl MetadataList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any existing entry.
    pub fn set(&mut self, key: &str, value: &str) {
        for item in &mut self.items {
            if item.0 == key {
                item.1 = value.to_string();
                return;
            }
        }
        self.items.push((key.to_string(), value.to_string()));
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Removes `key` from the list.
    pub fn remove(&mut self, key: &str) {
        self.items.retain(|(k, _)| k != key);
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for MetadataList {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut list = MetadataList::new();
        for (k, v) in iter {
            list.set(k, v);
        }
        list
    }
}

/// Encodes a metadata list into `(uncompressed_len, compressed_bytes)`.
///
/// Returns `None` when nothing survives the reserved-key filter; the
/// caller then writes the `(0, 0)` size pair and no payload. The blob
/// carries no compression discriminant, so encoding is always zlib.
pub fn encode(list: &MetadataList) -> Result<Option<(u64, Vec<u8>)>> {
    let mut raw = Vec::new();
    for (key, value) in list.iter() {
        if RESERVED_KEYS.contains(&key) {
            continue;
        }
        raw.extend_from_slice(key.as_bytes());
        raw.push(b'=');
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
    }
    if raw.is_empty() {
        return Ok(None);
    }
    raw.push(0); // double-NUL terminator

    let compressed = compress::compress(CompressionType::Zlib, &raw)?;
    Ok(Some((raw.len() as u64, compressed.into_owned())))
}

/// Decodes a metadata blob produced by [`encode`].
pub fn decode(uncompressed_len: u64, blob: &[u8]) -> Result<MetadataList> {
    let mut raw = vec![0u8; uncompressed_len as usize];
    compress::decompress_into(CompressionType::Zlib, blob, &mut raw)?;

    let mut list = MetadataList::new();
    for entry in raw.split(|&b| b == 0) {
        if entry.is_empty() {
            break;
        }
        let entry = String::from_utf8_lossy(entry);
        match entry.split_once('=') {
            Some((key, value)) => list.set(key, value),
            None => list.set(&entry, ""),
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut list = MetadataList::new();
        list.set("a", "1");
        list.set("b", "2");
        list.set("a", "3");

        let items: Vec<_> = list.iter().collect();
        assert_eq!(items, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_get_and_remove() {
        let mut list = MetadataList::new();
        list.set("k", "v");
        assert_eq!(list.get("k"), Some("v"));
        list.remove("k");
        assert_eq!(list.get("k"), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let list: MetadataList =
            [("AREA_OR_POINT", "Area"), ("SENSOR", "fake"), ("EMPTY", "")].into_iter().collect();

        let (raw_len, blob) = encode(&list).unwrap().unwrap();
        let decoded = decode(raw_len, &blob).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_reserved_keys_filtered() {
        let mut list = MetadataList::new();
        list.set("STATISTICS_MINIMUM", "0.0");
        list.set("STATISTICS_MAXIMUM", "255.0");
        list.set("CLOUD_OPTIMISED", "YES");
        list.set("KEEP", "yes");

        let (raw_len, blob) = encode(&list).unwrap().unwrap();
        let decoded = decode(raw_len, &blob).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("KEEP"), Some("yes"));
    }

    #[test]
    fn test_all_reserved_encodes_empty() {
        let mut list = MetadataList::new();
        list.set("STATISTICS_MEAN", "1.5");
        assert!(encode(&list).unwrap().is_none());
        assert!(encode(&MetadataList::new()).unwrap().is_none());
    }

    #[test]
    fn test_value_with_equals_sign() {
        let mut list = MetadataList::new();
        list.set("EXPR", "a=b+c");

        let (raw_len, blob) = encode(&list).unwrap().unwrap();
        let decoded = decode(raw_len, &blob).unwrap();
        assert_eq!(decoded.get("EXPR"), Some("a=b+c"));
    }

    #[test]
    fn test_double_nul_terminator() {
        let mut list = MetadataList::new();
        list.set("K", "V");
        let (raw_len, blob) = encode(&list).unwrap().unwrap();

        let mut raw = vec![0u8; raw_len as usize];
        compress::decompress_into(CompressionType::Zlib, &blob, &mut raw).unwrap();
        assert_eq!(&raw[raw.len() - 2..], &[0, 0]);
    }
}
