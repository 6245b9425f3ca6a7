/// Compaction: merges all segments into a single segment.
///
/// Uses [`MergeIterator`] for sorted streaming with per-hash occurrence
/// union. Nothing is dropped during the merge — the store has no deletes,
/// so compaction only reduces file count and read amplification. The result
/// is written atomically, the manifest is updated, and the old files are
/// deleted.
use anyhow::Result;
use log::info;
use segment::{MergeIterator, SegmentReader, SegmentWriter};

use crate::{segment_filename, Store};

impl Store {
    /// Compacts all segments into a single merged segment.
    ///
    /// A no-op when the store has one segment or fewer. Counters are
    /// unchanged: a tuple lives in exactly one segment, so the union merge
    /// moves entries without adding or losing any.
    ///
    /// # When to compact
    ///
    /// Called automatically when the segment count reaches
    /// `compaction_trigger` after a commit, or manually by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure during merge, write, or cleanup.
    pub fn compact(&mut self) -> Result<()> {
        anyhow::ensure!(!self.read_only, "store is read-only");
        if self.segments.len() <= 1 {
            return Ok(());
        }

        let generation = self
            .manifest
            .generation
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("generation counter overflow"))?;
        let name = segment_filename(generation);
        let path = self.dir.join(&name);

        // Over-estimate: per-segment distinct counts may overlap across
        // segments. Safe for bloom sizing.
        let estimated_keys: usize = self.segments.iter().map(|r| r.len()).sum();

        // Stream directly from MergeIterator into the segment writer without
        // materializing the dataset. A merge error inside the adapter is
        // carried out through `merge_error`.
        let mut merge_error: Option<anyhow::Error> = None;
        let write_result = {
            let mut merge = MergeIterator::new(&self.segments);
            let streaming_iter = std::iter::from_fn(|| match merge.next_entry() {
                Ok(next) => next,
                Err(e) => {
                    merge_error = Some(e);
                    None
                }
            });
            SegmentWriter::write_from_iterator(&path, estimated_keys, streaming_iter)
        };

        if let Some(e) = merge_error {
            let _ = std::fs::remove_file(path.with_extension("seg.tmp"));
            return Err(e);
        }
        write_result?;

        let old_names = self.manifest.segments.clone();
        let mut manifest = self.manifest.clone();
        manifest.generation = generation;
        manifest.replace_segments(name);
        manifest.save()?;
        self.manifest = manifest;

        // Drop old readers (releases file handles) before deleting files.
        let old_readers = std::mem::take(&mut self.segments);
        drop(old_readers);
        for old in &old_names {
            let _ = std::fs::remove_file(self.dir.join(old));
        }

        let reader = SegmentReader::open(&path)?;
        self.segments = vec![reader];

        info!(
            "compacted {} segments into {} (generation {})",
            old_names.len(),
            self.manifest.segments[0],
            generation
        );

        Ok(())
    }
}
