/// Read path: `lookup()`, `contains_hash()`, `count()`, and `merge_iter()`.
///
/// Occurrence lists are unioned across every segment plus the stage. There
/// is no shadowing between layers: the store only grows, so every committed
/// tuple is live.
use anyhow::Result;
use segment::MergeIterator;
use stage::Occurrence;
use std::collections::BTreeSet;

use crate::Store;

impl Store {
    /// All occurrences of a block hash, or `None` if unknown.
    ///
    /// The writer's view: staged occurrences are included so an import can
    /// observe its own uncommitted inserts. A read-only handle has an empty
    /// stage, so this is exactly the committed state there.
    ///
    /// # Errors
    ///
    /// Returns an error if any segment read fails (corruption, I/O).
    pub fn lookup(&self, hash: &[u8]) -> Result<Option<Vec<Occurrence>>> {
        let mut union: BTreeSet<Occurrence> = BTreeSet::new();

        for seg in &self.segments {
            if let Some(occs) = seg.get(hash)? {
                union.extend(occs);
            }
        }
        if let Some(staged) = self.stage.get(hash) {
            union.extend(staged.iter().copied());
        }

        if union.is_empty() {
            Ok(None)
        } else {
            Ok(Some(union.into_iter().collect()))
        }
    }

    /// Returns `true` if the hash has at least one occurrence.
    ///
    /// Cheap membership probe: bloom filters and in-memory indexes only,
    /// no disk reads.
    #[must_use]
    pub fn contains_hash(&self, hash: &[u8]) -> bool {
        self.stage.contains_key(hash) || self.segments.iter().any(|s| s.contains_key(hash))
    }

    /// Number of occurrences of a hash across the store. Zero if unknown.
    pub fn count(&self, hash: &[u8]) -> Result<u64> {
        Ok(self.lookup(hash)?.map(|v| v.len() as u64).unwrap_or(0))
    }

    /// Sorted streaming iterator over all **committed** entries, with
    /// per-hash occurrence union across segments.
    ///
    /// This is the export and database-merge primitive. Staged entries are
    /// deliberately excluded: exports reflect the committed state only.
    #[must_use]
    pub fn merge_iter(&self) -> MergeIterator<'_> {
        MergeIterator::new(&self.segments)
    }
}
