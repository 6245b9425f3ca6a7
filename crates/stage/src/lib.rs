//! In-memory staged delta for one in-flight import.
//!
//! The stage is an ordered multimap from block hash to the set of
//! occurrences being added by the current operation. Nothing in it is
//! durable: committing flushes it to a segment file, rolling back simply
//! drops it. This is what makes an import all-or-nothing — uncommitted
//! records never touch disk.

use std::collections::{BTreeMap, BTreeSet};

/// One place a block hash occurs: a source and a byte offset within it.
///
/// Ordering is `(source_id, offset)`, which fixes the on-disk occurrence
/// order inside a segment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Occurrence {
    pub source_id: u64,
    pub offset: u64,
}

impl Occurrence {
    pub fn new(source_id: u64, offset: u64) -> Self {
        Self { source_id, offset }
    }
}

/// Ordered multimap of staged `hash -> {occurrence}` additions.
#[derive(Debug, Default)]
pub struct Stage {
    map: BTreeMap<Vec<u8>, BTreeSet<Occurrence>>,
    /// Total staged (hash, occurrence) tuples across all keys.
    entries: u64,
    approx_size: usize,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages one occurrence under a hash. Returns `false` if the exact
    /// tuple is already staged (the caller counts it as a duplicate).
    pub fn insert(&mut self, hash: Vec<u8>, occ: Occurrence) -> bool {
        let hash_len = hash.len();
        let set = self.map.entry(hash).or_default();
        let added = set.insert(occ);
        if added {
            self.entries += 1;
            // key bytes are only counted once per distinct hash
            if set.len() == 1 {
                self.approx_size += hash_len;
            }
            self.approx_size += 16;
        }
        added
    }

    /// Returns `true` if the exact tuple is staged.
    pub fn contains(&self, hash: &[u8], occ: &Occurrence) -> bool {
        self.map.get(hash).is_some_and(|set| set.contains(occ))
    }

    /// Returns `true` if any occurrence is staged under this hash.
    pub fn contains_key(&self, hash: &[u8]) -> bool {
        self.map.contains_key(hash)
    }

    /// Staged occurrences for a hash, in `(source_id, offset)` order.
    pub fn get(&self, hash: &[u8]) -> Option<&BTreeSet<Occurrence>> {
        self.map.get(hash)
    }

    /// Ordered iterator over staged entries, ascending by hash.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &BTreeSet<Occurrence>)> {
        self.map.iter()
    }

    /// Number of distinct staged hashes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Total staged tuples (one hash may carry many occurrences).
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drops all staged entries. This is the rollback primitive.
    pub fn clear(&mut self) {
        self.map.clear();
        self.entries = 0;
        self.approx_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut s = Stage::new();
        assert!(s.insert(b"hash-a".to_vec(), Occurrence::new(1, 0)));
        assert!(s.insert(b"hash-a".to_vec(), Occurrence::new(1, 4096)));
        assert!(s.insert(b"hash-b".to_vec(), Occurrence::new(2, 0)));

        assert_eq!(s.len(), 2);
        assert_eq!(s.entry_count(), 3);
        assert!(s.contains(b"hash-a", &Occurrence::new(1, 4096)));
        assert!(!s.contains(b"hash-a", &Occurrence::new(2, 4096)));
    }

    #[test]
    fn duplicate_tuple_is_rejected() {
        let mut s = Stage::new();
        assert!(s.insert(b"h".to_vec(), Occurrence::new(1, 0)));
        assert!(!s.insert(b"h".to_vec(), Occurrence::new(1, 0)));
        assert_eq!(s.entry_count(), 1);
    }

    #[test]
    fn same_hash_different_sources_both_kept() {
        // The common case: identical block content in two sources.
        let mut s = Stage::new();
        assert!(s.insert(b"h".to_vec(), Occurrence::new(1, 0)));
        assert!(s.insert(b"h".to_vec(), Occurrence::new(2, 0)));
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(b"h").unwrap().len(), 2);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut s = Stage::new();
        s.insert(b"bb".to_vec(), Occurrence::new(1, 0));
        s.insert(b"aa".to_vec(), Occurrence::new(1, 0));
        s.insert(b"cc".to_vec(), Occurrence::new(1, 0));

        let keys: Vec<_> = s.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);
    }

    #[test]
    fn occurrences_ordered_by_source_then_offset() {
        let mut s = Stage::new();
        s.insert(b"h".to_vec(), Occurrence::new(2, 0));
        s.insert(b"h".to_vec(), Occurrence::new(1, 8192));
        s.insert(b"h".to_vec(), Occurrence::new(1, 0));

        let occs: Vec<_> = s.get(b"h").unwrap().iter().copied().collect();
        assert_eq!(
            occs,
            vec![
                Occurrence::new(1, 0),
                Occurrence::new(1, 8192),
                Occurrence::new(2, 0)
            ]
        );
    }

    #[test]
    fn clear_discards_everything() {
        let mut s = Stage::new();
        s.insert(b"h".to_vec(), Occurrence::new(1, 0));
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.entry_count(), 0);
        assert_eq!(s.approx_size(), 0);
    }

    #[test]
    fn approx_size_tracks_growth() {
        let mut s = Stage::new();
        assert_eq!(s.approx_size(), 0);
        s.insert(vec![0u8; 16], Occurrence::new(1, 0));
        assert_eq!(s.approx_size(), 32);
        s.insert(vec![0u8; 16], Occurrence::new(1, 4096));
        assert_eq!(s.approx_size(), 48);
    }
}
