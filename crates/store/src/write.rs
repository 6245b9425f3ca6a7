/// Write path: `insert()`, `commit()`, and `rollback()`.
///
/// All mutations accumulate in the in-memory stage. Nothing touches disk
/// until `commit()`, which makes every import all-or-nothing: a failure at
/// any point before the manifest rename leaves the committed state exactly
/// as it was.
use anyhow::{ensure, Result};
use log::{debug, info};
use segment::{SegmentReader, SegmentWriter};
use stage::Occurrence;

use crate::{segment_filename, Store, MAX_HASH_SIZE};

impl Store {
    /// Stages one `(hash, source_id, offset)` tuple.
    ///
    /// Returns `true` if the tuple is new to the store (neither committed
    /// nor already staged), `false` for an exact duplicate. The return
    /// value drives the import's inserted/duplicate counters, so the check
    /// is exact, not probabilistic: the bloom filter only short-circuits
    /// definite misses.
    pub fn insert(&mut self, hash: &[u8], occ: Occurrence) -> Result<bool> {
        ensure!(!self.read_only, "store is read-only");
        ensure!(!hash.is_empty(), "hash must not be empty");
        ensure!(
            hash.len() <= MAX_HASH_SIZE,
            "hash too large: {} bytes (max {})",
            hash.len(),
            MAX_HASH_SIZE
        );

        if self.stage.contains(hash, &occ) {
            return Ok(false);
        }
        for seg in &self.segments {
            if seg.contains(hash, &occ)? {
                return Ok(false);
            }
        }

        // Track whether this hash is new to the whole store before the
        // stage insert makes it staged.
        let new_hash = !self.stage.contains_key(hash)
            && !self.segments.iter().any(|s| s.contains_key(hash));

        self.stage.insert(hash.to_vec(), occ);
        if new_hash {
            self.staged_distinct += 1;
        }
        Ok(true)
    }

    /// Publishes everything staged — hashes and sources — as one atomic
    /// commit.
    ///
    /// A no-op if nothing is staged.
    ///
    /// # Steps
    ///
    /// 1. Bump the generation counter.
    /// 2. Write the staged hashes to `seg-<gen>.seg` (atomic inside the
    ///    segment writer).
    /// 3. Write the new registry generation `sources-<gen>.reg`, if any
    ///    sources or names were staged. The registry delta stays staged.
    /// 4. Rename the new MANIFEST into place — the commit point.
    /// 5. Fold the staged registry delta into its committed table, open the
    ///    new segment, clear the stage, sweep stale registry generations,
    ///    and maybe auto-compact.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure. Before the manifest rename the
    /// committed state is untouched; leftover files are swept on next open.
    pub fn commit(&mut self) -> Result<()> {
        ensure!(!self.read_only, "store is read-only");
        if !self.has_pending() {
            return Ok(());
        }

        let generation = self
            .manifest
            .generation
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("generation counter overflow"))?;

        let mut manifest = self.manifest.clone();
        manifest.generation = generation;

        let mut new_segment_path = None;
        if !self.stage.is_empty() {
            let name = segment_filename(generation);
            let path = self.dir.join(&name);
            SegmentWriter::write_from_stage(&path, &self.stage)?;
            manifest.add_segment(name);
            manifest.total_entries += self.stage.entry_count();
            manifest.distinct_hashes += self.staged_distinct;
            new_segment_path = Some(path);
        }

        if self.registry.has_staged_state() {
            self.registry.write_generation(generation)?;
            manifest.registry_generation = generation;
        }

        // The rename inside save() is the commit point. Everything written
        // so far is orphaned (and swept on the next open) if it fails, and
        // the in-memory delta stays staged so rollback() still discards it.
        manifest.save()?;
        let old_registry_generation = self.manifest.registry_generation;
        self.manifest = manifest;
        self.registry.finalize_commit();

        if let Some(path) = new_segment_path {
            let reader = SegmentReader::open(&path)?;
            self.segments.insert(0, reader);
        }

        info!(
            "committed generation {}: {} tuples staged, {} segments, {} sources",
            generation,
            self.stage.entry_count(),
            self.segments.len(),
            self.registry.len()
        );

        self.stage.clear();
        self.staged_distinct = 0;

        if self.manifest.registry_generation != old_registry_generation {
            registry::Registry::sweep_generations(&self.dir, self.manifest.registry_generation);
        }

        if self.compaction_trigger > 0 && self.segments.len() >= self.compaction_trigger {
            self.compact()?;
        }

        Ok(())
    }

    /// Discards everything staged: hashes, sources, and source names.
    /// The committed state is untouched.
    pub fn rollback(&mut self) {
        debug!(
            "rolling back {} staged tuples, {} staged sources",
            self.stage.entry_count(),
            self.registry.staged_count()
        );
        self.stage.clear();
        self.registry.rollback();
        self.staged_distinct = 0;
    }
}
