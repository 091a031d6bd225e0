//! On-disk layout: `count`, then `hash`, `len` and `len` payload bytes per entry.
//! Every integer is a native-endian `usize`. There is no header.

use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;

use crate::error::{CacheError, CacheResult};

pub type BinaryMap = BTreeMap<usize, Arc<[u8]>>;

const TRUNCATED: &str = "binary data ended unexpectedly";

/// Entries in ascending hash order.
pub fn serialize(entries: &BinaryMap) -> Vec<u8> {
    let payload: usize = entries
        .values()
        .map(|b| b.len() + 2 * size_of::<usize>())
        .sum();
    let mut out = Vec::with_capacity(size_of::<usize>() + payload);
    out.extend_from_slice(&entries.len().to_ne_bytes());
    for (hash, binary) in entries {
        out.extend_from_slice(&hash.to_ne_bytes());
        out.extend_from_slice(&binary.len().to_ne_bytes());
        out.extend_from_slice(binary);
    }
    out
}

/// Bytes past the last declared entry are ignored.
pub fn deserialize(data: &[u8]) -> CacheResult<BinaryMap> {
    let mut reader = Reader { data, offset: 0 };
    let count = reader.read_usize()?;
    let mut entries = BinaryMap::new();
    for _ in 0..count {
        let hash = reader.read_usize()?;
        let len = reader.read_usize()?;
        entries.insert(hash, Arc::from(reader.read_bytes(len)?));
    }
    Ok(entries)
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> CacheResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CacheError::Corrupt(TRUNCATED.to_string()))?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_usize(&mut self) -> CacheResult<usize> {
        let bytes = self.read_bytes(size_of::<usize>())?;
        let mut word = [0u8; size_of::<usize>()];
        word.copy_from_slice(bytes);
        Ok(usize::from_ne_bytes(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(usize, &[u8])]) -> BinaryMap {
        entries.iter().map(|(h, b)| (*h, Arc::from(*b))).collect()
    }

    #[test]
    fn round_trip_keeps_entries() {
        let cases = [
            map(&[]),
            map(&[(7, &b""[..])]),
            map(&[(3, &b"abc"[..]), (1, &b"\x00\xff"[..])]),
        ];
        for original in cases {
            let bytes = serialize(&original);
            assert_eq!(deserialize(&bytes).expect("valid cache"), original);
        }
    }

    #[test]
    fn layout_is_count_then_sorted_entries() {
        let bytes = serialize(&map(&[(9, &b"z"[..]), (2, &b"xy"[..])]));
        let word = size_of::<usize>();
        assert_eq!(bytes.len(), word + (2 * word + 2) + (2 * word + 1));
        assert_eq!(&bytes[..word], &2usize.to_ne_bytes());
        // Lowest hash first.
        assert_eq!(&bytes[word..2 * word], &2usize.to_ne_bytes());
        assert_eq!(&bytes[3 * word..3 * word + 2], b"xy");
    }

    #[test]
    fn truncation_is_corruption() {
        let bytes = serialize(&map(&[(1, &b"payload"[..])]));
        for cut in [0, 3, bytes.len() - 1] {
            match deserialize(&bytes[..cut]) {
                Err(CacheError::Corrupt(message)) => assert_eq!(message, TRUNCATED),
                other => panic!("cut at {cut}: expected corruption, got {other:?}"),
            }
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = serialize(&map(&[(1, &b"a"[..])]));
        bytes.extend_from_slice(b"junk");
        assert_eq!(deserialize(&bytes).expect("valid prefix").len(), 1);
    }
}
