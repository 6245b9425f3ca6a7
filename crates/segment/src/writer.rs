use anyhow::Result;
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use stage::{Occurrence, Stage};
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use crate::format::write_footer;

/// Default bloom filter false positive rate (1%).
const BLOOM_FPR: f64 = 0.01;

/// Writes a staged delta (or any sorted hash stream) to disk as an immutable
/// segment file.
///
/// The writer is stateless — all work happens inside the static methods. The
/// write is crash-safe: data is first written to a temporary file, fsynced,
/// and then atomically renamed to the final path. A crash mid-write leaves
/// only a `.seg.tmp` file, which the store sweeps up on open.
pub struct SegmentWriter {}

impl SegmentWriter {
    /// Flushes `stage` to a new segment file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is empty (writing an empty segment is
    /// not useful and likely indicates a logic bug) or on any I/O failure.
    pub fn write_from_stage(path: &Path, stage: &Stage) -> Result<()> {
        if stage.is_empty() {
            anyhow::bail!("refusing to write an empty segment (empty stage)");
        }
        let iter = stage
            .iter()
            .map(|(k, occs)| (k.clone(), occs.iter().copied().collect::<Vec<_>>()));
        Self::write_internal(path, stage.len(), iter)
    }

    /// Writes a segment from an iterator of `(hash, occurrences)` pairs.
    ///
    /// This is the **streaming compaction** entry point: entries are consumed
    /// one at a time and written directly to disk, keeping memory usage
    /// proportional to the bloom filter + index, not the data volume.
    ///
    /// # Arguments
    ///
    /// * `path` — destination `.seg` file path.
    /// * `expected_keys` — estimated number of distinct hashes (sizes the
    ///   bloom filter; over-estimating is safe).
    /// * `iter` — yields `(hash, occurrences)` in **ascending hash order**
    ///   with occurrences sorted by `(source_id, offset)` and free of
    ///   duplicates. The caller is responsible for both.
    pub fn write_from_iterator<I>(path: &Path, expected_keys: usize, iter: I) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, Vec<Occurrence>)>,
    {
        Self::write_internal(path, expected_keys.max(1), iter)
    }

    fn write_internal<I>(path: &Path, expected_keys: usize, iter: I) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, Vec<Occurrence>)>,
    {
        // Create temporary file next to target for atomic rename later
        let tmp_path = path.with_extension("seg.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        // Build bloom filter from all hashes
        let mut bloom = BloomFilter::new(expected_keys.max(1), BLOOM_FPR);

        // Keep an in-memory index: (hash, offset)
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();

        // Running total of (hash, source_id, offset) tuples for the footer.
        let mut entry_total: u64 = 0;

        // Reusable buffer for computing per-record CRC32 checksums.
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        // Write DATA section
        for (key, occs) in iter {
            entry_total += occs.len() as u64;

            // Build the record body into a buffer so we can CRC it.
            record_buf.clear();
            record_buf.write_u32::<LittleEndian>(key.len() as u32)?;
            record_buf.extend_from_slice(&key);
            record_buf.write_u32::<LittleEndian>(occs.len() as u32)?;
            for occ in &occs {
                record_buf.write_u64::<LittleEndian>(occ.source_id)?;
                record_buf.write_u64::<LittleEndian>(occ.offset)?;
            }

            // Compute CRC32 over the record body.
            let mut hasher = Crc32::new();
            hasher.update(&record_buf);
            let crc = hasher.finalize();

            // Write: [crc32][record body]
            let offset = file.stream_position()?;
            file.write_u32::<LittleEndian>(crc)?;
            file.write_all(&record_buf)?;

            bloom.insert(&key);

            // record in index (offset points to the CRC prefix)
            index.push((key, offset));
        }

        if index.is_empty() {
            // Clean up the temp file and bail — nothing to write.
            drop(file);
            let _ = std::fs::remove_file(&tmp_path);
            anyhow::bail!("refusing to write an empty segment (no entries)");
        }

        // Write BLOOM section
        let bloom_offset = file.stream_position()?;
        bloom.write_to(&mut file)?;

        // Write INDEX section and remember its offset
        let index_offset = file.stream_position()?;

        for (key, data_offset) in &index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*data_offset)?;
        }

        // Write FOOTER (entry_total + bloom_offset + index_offset + magic)
        write_footer(&mut file, entry_total, bloom_offset, index_offset)?;

        // Flush BufWriter, then sync the underlying file
        file.flush()?;
        file.into_inner()?.sync_all()?;

        // Atomically move into place
        rename(&tmp_path, path)?;

        // Fsync the parent directory to ensure the rename is durable.
        // On ext4/XFS a crash after rename but before dir sync can lose
        // the directory entry.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}
