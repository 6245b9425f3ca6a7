//! # HashDb - Cairn Database Facade
//!
//! Ties the [`store`], [`registry`], and [`digestlist`] crates into the
//! complete block-hash database: settings, exclusive writer locking, the
//! import pipeline, export and database-to-database merge, and the query
//! interface.
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | [`lib.rs`]   | `HashDb` struct, constructors, lock, stats, `Drop`   |
//! | [`settings`] | `settings.json` record (algorithm + block size)      |
//! | [`error`]    | the `DbError` type                                   |
//! | [`import`]   | DFXML and JSON-lines import pipelines                |
//! | [`export`]   | JSON-lines export                                    |
//! | [`merge`]    | database-to-database merge                           |
//! | [`query`]    | `lookup()`, `lookup_sources()`, `count()`            |
//!
//! ## Atomicity
//!
//! Every import or merge either commits completely or leaves the database
//! observably unchanged. Staged state lives in memory; the storage engine's
//! manifest rename is the single commit point for hashes and sources alike.
//!
//! ## Concurrency
//!
//! One writer per database directory, enforced with a `LOCK` file created
//! exclusively and removed on drop. Readers take no lock: they snapshot the
//! committed manifest at open and never observe an import in progress.

mod error;
mod export;
mod import;
mod merge;
mod query;
mod settings;

pub use error::DbError;
pub use import::ImportOptions;
pub use query::SourceHit;
pub use settings::Settings;

pub use digestlist::HashAlgorithm;
pub use stage::Occurrence;

use log::{info, warn};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use store::Store;

/// Name of the writer lock file within the database directory.
pub const LOCK_FILENAME: &str = "LOCK";

/// Exact change counters returned by import and merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSet {
    /// New `(hash, source, offset)` tuples added.
    pub hashes_inserted: u64,
    /// Tuples the database already had.
    pub hashes_already_present: u64,
    /// New sources registered.
    pub sources_inserted: u64,
    /// Source records that resolved to an already-registered source.
    pub sources_already_present: u64,
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hashes_inserted: {}", self.hashes_inserted)?;
        writeln!(f, "hashes_already_present: {}", self.hashes_already_present)?;
        writeln!(f, "sources_inserted: {}", self.sources_inserted)?;
        write!(f, "sources_already_present: {}", self.sources_already_present)
    }
}

/// Database configuration and counters, as of the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub algorithm: HashAlgorithm,
    /// 0 until the first import establishes it.
    pub block_size: u32,
    pub distinct_hashes: u64,
    pub total_entries: u64,
    pub source_count: usize,
    pub segment_count: usize,
}

/// Exclusive writer lock. The file holds the owning pid for diagnostics;
/// dropping the guard removes it.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(dir: &Path) -> Result<Self, DbError> {
        let path = dir.join(LOCK_FILENAME);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                let holder = holder.trim();
                Err(DbError::Locked(if holder.is_empty() {
                    path.display().to_string()
                } else {
                    format!("{} (held by pid {})", path.display(), holder)
                }))
            }
            Err(e) => Err(DbError::Io(e)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// A block-hash database handle.
///
/// Writer handles ([`create`](HashDb::create), [`open`](HashDb::open)) hold
/// the directory lock for their lifetime. Read-only handles
/// ([`open_read_only`](HashDb::open_read_only)) are lock-free snapshots.
pub struct HashDb {
    dir: PathBuf,
    settings: Settings,
    store: Store,
    /// `None` for read-only handles.
    #[allow(dead_code)]
    lock: Option<LockFile>,
}

impl fmt::Debug for HashDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashDb")
            .field("dir", &self.dir)
            .field("algorithm", &self.settings.algorithm)
            .field("block_size", &self.settings.block_size)
            .field("read_only", &self.lock.is_none())
            .finish()
    }
}

impl HashDb {
    /// Creates a new database.
    ///
    /// `block_size` of 0 defers the choice to the first import; a non-zero
    /// value fixes it now. Fails if the directory already holds a database.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        algorithm: HashAlgorithm,
        block_size: u32,
    ) -> Result<Self, DbError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        if Settings::path(&dir).exists() {
            return Err(DbError::Corrupt(format!(
                "{} already holds a database",
                dir.display()
            )));
        }

        let lock = LockFile::acquire(&dir)?;
        let settings = Settings {
            algorithm,
            block_size,
        };
        settings.save(&dir)?;
        let store = Store::open(&dir)?;

        info!(
            "created database at {} (algorithm {}, block size {})",
            dir.display(),
            algorithm,
            block_size
        );

        Ok(Self {
            dir,
            settings,
            store,
            lock: Some(lock),
        })
    }

    /// Opens an existing database for writing, taking the directory lock.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, DbError> {
        let dir = dir.as_ref().to_path_buf();
        let settings = Settings::load(&dir)?;
        let lock = LockFile::acquire(&dir)?;
        let store = Store::open(&dir)?;

        Ok(Self {
            dir,
            settings,
            store,
            lock: Some(lock),
        })
    }

    /// Opens a read-only snapshot of the committed state.
    ///
    /// Takes no lock; a writer committing concurrently is never partially
    /// visible because this handle keeps reading the manifest generation it
    /// opened with.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self, DbError> {
        let dir = dir.as_ref().to_path_buf();
        let settings = Settings::load(&dir)?;
        let store = Store::open_read_only(&dir)?;

        Ok(Self {
            dir,
            settings,
            store,
            lock: None,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The database settings (algorithm, block size).
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Settings plus committed counters.
    #[must_use]
    pub fn stats(&self) -> DbStats {
        let s = self.store.stats();
        DbStats {
            algorithm: self.settings.algorithm,
            block_size: self.settings.block_size,
            distinct_hashes: s.distinct_hashes,
            total_entries: s.total_entries,
            source_count: s.source_count,
            segment_count: s.segment_count,
        }
    }

    /// Fixes the block size if it is still unestablished, persisting the
    /// settings. Called by import/merge before committing data at that size.
    fn establish_block_size(&mut self, block_size: u32) -> Result<(), DbError> {
        if self.settings.block_size == block_size {
            return Ok(());
        }
        debug_assert_eq!(self.settings.block_size, 0);
        self.settings.block_size = block_size;
        self.settings.save(&self.dir)?;
        info!("block size established at {}", block_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
