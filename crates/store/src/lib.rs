//! # Store - Cairn Storage Engine
//!
//! The central orchestrator that ties together the [`stage`], [`segment`],
//! and [`registry`] crates into a complete block-hash store.
//!
//! ## Architecture
//!
//! ```text
//! Import pipeline
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                    STORE                      │
//! │                                               │
//! │ write.rs → dedup check → Stage insert         │
//! │              |                                │
//! │              |  commit()                      │
//! │              v                                │
//! │        new segment + registry generation      │
//! │              |                                │
//! │              v                                │
//! │        MANIFEST rename  (the commit point)    │
//! │              |                                │
//! │              |  (segment count >= trigger?)   │
//! │              v            yes                 │
//! │           compact() → single merged segment   │
//! │                                               │
//! │ read.rs → Stage ∪ segments (occurrence union) │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                            |
//! |----------------|----------------------------------------------------|
//! | [`lib.rs`]     | `Store` struct, constructors, accessors, `Debug`   |
//! | [`recovery`]   | tmp file cleanup, orphan segment/generation sweep  |
//! | [`write`]      | `insert()`, `commit()`, `rollback()`               |
//! | [`read`]       | `lookup()`, `contains_hash()`, `merge_iter()`      |
//! | [`compaction`] | full merge of all segments into one                |
//! | [`manifest`]   | persistent segment list + counters (atomic ops)    |
//!
//! ## Crash Safety
//!
//! A commit writes the new segment file and the new registry generation
//! first, each atomically (temp + fsync + rename). Neither is visible until
//! the MANIFEST, which names both, is renamed into place. A crash at any
//! earlier point leaves only orphan files, which [`Store::open`] sweeps.
//! There is no write-ahead log: an uncommitted import lives purely in the
//! in-memory stage, so a crash rolls it back by definition.

mod compaction;
mod manifest;
mod read;
mod recovery;
mod write;

use anyhow::{Context, Result};
use manifest::Manifest;
use registry::Registry;
use segment::SegmentReader;
use stage::Stage;
use std::path::{Path, PathBuf};

/// Maximum allowed block-hash size in bytes.
pub const MAX_HASH_SIZE: usize = 64;

/// Default number of segments that triggers automatic compaction after a
/// commit. Set to `0` to disable auto-compaction.
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;

/// Committed counters of a store, as recorded in its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Distinct block hashes across all segments.
    pub distinct_hashes: u64,
    /// Total `(hash, source_id, offset)` tuples across all segments.
    pub total_entries: u64,
    /// Number of segment files.
    pub segment_count: usize,
    /// Number of registered sources.
    pub source_count: usize,
}

/// The block-hash storage engine: immutable segments plus one in-memory
/// staged delta.
///
/// # Write Path
///
/// 1. [`insert`](Store::insert) checks the exact tuple against the stage and
///    every committed segment; only genuinely new tuples are staged.
/// 2. [`commit`](Store::commit) flushes the stage to a new segment, writes
///    the new registry generation, and publishes both with one atomic
///    manifest rename.
/// 3. If the segment count reaches the compaction trigger, all segments are
///    merged into one.
///
/// # Read Path
///
/// Occurrence lists for a hash are the union across every segment plus the
/// stage. Segments never shadow each other: the store only grows.
///
/// # Recovery
///
/// On [`Store::open`], leftover temp files and orphan segments or registry
/// generations not named by the manifest are deleted.
pub struct Store {
    pub(crate) dir: PathBuf,
    pub(crate) manifest: Manifest,
    /// Committed segments, newest first.
    pub(crate) segments: Vec<SegmentReader>,
    /// The in-flight delta. Dropping it (or the whole store) without a
    /// commit is the rollback.
    pub(crate) stage: Stage,
    pub(crate) registry: Registry,
    /// Distinct staged hashes not present in any committed segment; folded
    /// into the manifest's `distinct_hashes` on commit.
    pub(crate) staged_distinct: u64,
    /// Number of segments that triggers automatic compaction after a commit.
    /// Set to `0` to disable auto-compaction (caller must invoke `compact()`).
    pub(crate) compaction_trigger: usize,
    pub(crate) read_only: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("generation", &self.manifest.generation)
            .field("segment_count", &self.segments.len())
            .field("distinct_hashes", &self.manifest.distinct_hashes)
            .field("total_entries", &self.manifest.total_entries)
            .field("staged_entries", &self.stage.entry_count())
            .field("compaction_trigger", &self.compaction_trigger)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Store {
    /// Opens (or creates) a store directory for writing.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the directory if it does not exist.
    /// 2. Delete leftover `.tmp` files from interrupted commits.
    /// 3. Load the manifest (empty manifest for a fresh store).
    /// 4. Open every segment the manifest names; a missing or corrupt
    ///    segment is an error, not a skip.
    /// 5. Open the registry at the manifest's registry generation.
    /// 6. Sweep orphan segment files and registry generations that lost the
    ///    race with a crash.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store dir {}", dir.display()))?;

        recovery::cleanup_tmp_files(&dir);

        let manifest = Manifest::load_or_create(&dir)?;
        let segments = Self::open_segments(&dir, &manifest)?;
        let registry = Registry::open(&dir, manifest.registry_generation)
            .with_context(|| format!("failed to open source registry in {}", dir.display()))?;

        recovery::sweep_orphans(&dir, &manifest);

        Ok(Self {
            dir,
            manifest,
            segments,
            stage: Stage::new(),
            registry,
            staged_distinct: 0,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            read_only: false,
        })
    }

    /// Opens a store for reading only.
    ///
    /// No cleanup or sweeping happens on this path: a concurrent writer may
    /// be mid-commit, and its temp files are not ours to delete. The
    /// returned handle sees the committed state as of the manifest it read;
    /// later commits by a writer are not visible because segments and
    /// registry generations are immutable once written.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest = Manifest::load_or_create(&dir)?;
        let segments = Self::open_segments(&dir, &manifest)?;
        let registry = Registry::open(&dir, manifest.registry_generation)
            .with_context(|| format!("failed to open source registry in {}", dir.display()))?;

        Ok(Self {
            dir,
            manifest,
            segments,
            stage: Stage::new(),
            registry,
            staged_distinct: 0,
            compaction_trigger: 0,
            read_only: true,
        })
    }

    fn open_segments(dir: &Path, manifest: &Manifest) -> Result<Vec<SegmentReader>> {
        let mut segments = Vec::with_capacity(manifest.segments.len());
        for filename in &manifest.segments {
            let path = dir.join(filename);
            let reader = SegmentReader::open(&path)
                .with_context(|| format!("failed to open segment {}", path.display()))?;
            segments.push(reader);
        }
        Ok(segments)
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Committed counters plus the current source count.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            distinct_hashes: self.manifest.distinct_hashes,
            total_entries: self.manifest.total_entries,
            segment_count: self.segments.len(),
            source_count: self.registry.len(),
        }
    }

    /// The source registry (shared view: committed plus staged sources).
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access to the registry for staging sources. Staged sources
    /// commit and roll back together with staged hashes.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Number of committed segment files.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total staged tuples awaiting commit.
    #[must_use]
    pub fn staged_entry_count(&self) -> u64 {
        self.stage.entry_count()
    }

    /// Returns `true` if a commit would write anything.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.stage.is_empty() || self.registry.has_staged_state()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the current compaction trigger threshold.
    #[must_use]
    pub fn compaction_trigger(&self) -> usize {
        self.compaction_trigger
    }

    /// Updates the compaction trigger. Set to `0` to disable auto-compaction.
    pub fn set_compaction_trigger(&mut self, trigger: usize) {
        self.compaction_trigger = trigger;
    }
}

/// Segment filename for a commit generation: `seg-0000000007.seg`.
pub(crate) fn segment_filename(generation: u64) -> String {
    format!("seg-{:010}.seg", generation)
}

#[cfg(test)]
mod tests;
