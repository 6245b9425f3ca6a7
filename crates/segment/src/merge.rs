//! Merge iterator over multiple [`SegmentReader`]s.
//!
//! Produces `(hash, occurrences)` pairs in ascending hash order. When the
//! same hash appears in multiple segments, the occurrence lists are
//! **unioned** and deduplicated — a hash database only ever grows, so unlike
//! a key-value store there is no "newest wins": every `(source_id, offset)`
//! tuple from every segment survives the merge exactly once.
//!
//! This is the core primitive for compaction and for `iter_all()` during a
//! database-to-database merge: walk N input segments in sorted order and
//! stream the combined records out.

use anyhow::Result;
use stage::Occurrence;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use crate::SegmentReader;

/// A pending hash from one segment source, used for heap-based merge
/// ordering.
///
/// Only the `key` and `source` are stored — the occurrence list is read
/// lazily from disk when the key reaches the top of the heap.
struct HeapEntry {
    key: Vec<u8>,
    /// Index into the `readers` / `key_iters` arrays.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* hash first,
        // so reverse the key comparison. On tie, prefer the entry from
        // the source with the lower index (arbitrary but deterministic).
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges multiple segments into a single sorted stream of
/// `(hash, occurrences)` pairs with per-hash occurrence-set union.
pub struct MergeIterator<'a> {
    readers: &'a [SegmentReader],
    /// Per-reader: sorted hashes remaining to be yielded.
    key_iters: Vec<std::vec::IntoIter<Vec<u8>>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeIterator<'a> {
    /// Creates a new merge iterator over the given segment readers.
    ///
    /// Each reader's hashes are loaded into memory (they're already in the
    /// in-memory index). The first hash from each reader is pushed onto a
    /// min-heap.
    pub fn new(readers: &'a [SegmentReader]) -> Self {
        let mut key_iters: Vec<std::vec::IntoIter<Vec<u8>>> = Vec::with_capacity(readers.len());
        let mut heap = BinaryHeap::new();

        for (i, reader) in readers.iter().enumerate() {
            let keys: Vec<Vec<u8>> = reader.keys().map(|k| k.to_vec()).collect();
            let mut iter = keys.into_iter();
            if let Some(first_key) = iter.next() {
                heap.push(HeapEntry {
                    key: first_key,
                    source: i,
                });
            }
            key_iters.push(iter);
        }

        Self {
            readers,
            key_iters,
            heap,
        }
    }

    /// Returns the next `(hash, occurrences)` in sorted order, or `None`
    /// when all sources are exhausted.
    ///
    /// Duplicate hashes (same hash in multiple segments) are resolved by
    /// unioning their occurrence lists; the result is sorted by
    /// `(source_id, offset)` and free of duplicates.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<Occurrence>)>> {
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };

        let mut union: BTreeSet<Occurrence> = BTreeSet::new();
        if let Some(occs) = self.readers[top.source].get(&top.key)? {
            union.extend(occs);
        }

        // Advance this source's iterator.
        if let Some(next_key) = self.key_iters[top.source].next() {
            self.heap.push(HeapEntry {
                key: next_key,
                source: top.source,
            });
        }

        // Drain all heap entries carrying the same hash and fold their
        // occurrences into the union.
        let key = top.key;
        while let Some(peek) = self.heap.peek() {
            if peek.key != key {
                break;
            }
            let dup = self.heap.pop().expect("peeked entry must pop");

            if let Some(occs) = self.readers[dup.source].get(&dup.key)? {
                union.extend(occs);
            }

            if let Some(next_key) = self.key_iters[dup.source].next() {
                self.heap.push(HeapEntry {
                    key: next_key,
                    source: dup.source,
                });
            }
        }

        Ok(Some((key, union.into_iter().collect())))
    }

    /// Collects all remaining entries into a `Vec`.
    ///
    /// Useful for testing; compaction streams via [`next_entry`] instead.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, Vec<Occurrence>)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
