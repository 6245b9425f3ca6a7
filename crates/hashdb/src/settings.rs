//! Per-database settings record.
//!
//! The digest algorithm is fixed at creation; the block size is fixed by
//! the first import (0 means not yet established). Both are immutable
//! afterwards, so every hash in the database has the same width and every
//! block record the same length.

use digestlist::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::DbError;

/// Name of the settings file within the database directory.
pub const SETTINGS_FILENAME: &str = "settings.json";

/// The previous settings are kept here when the file is rewritten.
const SETTINGS_BACKUP_FILENAME: &str = "settings.json.old";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Digest algorithm; fixes the byte width of every hash.
    pub algorithm: HashAlgorithm,
    /// Block size in bytes. 0 = not yet established (no import has
    /// happened); set once by the first import, immutable afterwards.
    pub block_size: u32,
}

impl Settings {
    pub(crate) fn path(dir: &Path) -> PathBuf {
        dir.join(SETTINGS_FILENAME)
    }

    /// Loads settings from `dir/settings.json`.
    ///
    /// A missing file means the directory is not a database.
    pub(crate) fn load(dir: &Path) -> Result<Self, DbError> {
        let path = Self::path(dir);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DbError::Corrupt(format!("not a database (no {})", path.display()))
            } else {
                DbError::Io(e)
            }
        })?;
        serde_json::from_str(&data)
            .map_err(|e| DbError::Corrupt(format!("unreadable {}: {}", path.display(), e)))
    }

    /// Writes settings atomically, keeping the previous copy as
    /// `settings.json.old`.
    pub(crate) fn save(&self, dir: &Path) -> Result<(), DbError> {
        let path = Self::path(dir);

        // Back up the old settings before replacing them.
        if path.exists() {
            std::fs::rename(&path, dir.join(SETTINGS_BACKUP_FILENAME))?;
        }

        let tmp = path.with_extension("json.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let data = serde_json::to_string_pretty(self)
                .map_err(|e| DbError::Corrupt(format!("settings serialization: {}", e)))?;
            f.write_all(data.as_bytes())?;
            f.write_all(b"\n")?;
            f.flush()?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }

    /// The established block size, or `None` before the first import.
    #[must_use]
    pub fn established_block_size(&self) -> Option<u32> {
        if self.block_size == 0 {
            None
        } else {
            Some(self.block_size)
        }
    }
}
