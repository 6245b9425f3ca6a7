/// # Manifest - Committed Store State
///
/// Names everything that is committed: the segment files, the registry
/// generation, and the exact counters. Renaming a new manifest into place
/// is the single commit point of the store.
///
/// ## File Format
///
/// A simple text file, counters first, then one segment entry per line
/// (newest first):
///
/// ```text
/// generation=3
/// registry=3
/// distinct_hashes=120
/// total_entries=148
/// seg:seg-0000000003.seg
/// seg:seg-0000000001.seg
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to a `.tmp` file, fsync,
/// rename over the existing manifest, fsync the directory. A reader sees
/// either the old committed state or the new one, never a mix.
use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the store directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// In-memory representation of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Path to the manifest file on disk.
    path: PathBuf,
    /// Monotonic commit counter; also names new segment and registry files.
    pub generation: u64,
    /// Generation of the current registry file (`sources-<gen>.reg`).
    /// Zero means no registry file exists yet.
    pub registry_generation: u64,
    /// Distinct block hashes across all segments.
    pub distinct_hashes: u64,
    /// Total `(hash, source_id, offset)` tuples across all segments.
    pub total_entries: u64,
    /// Segment filenames, newest first.
    pub segments: Vec<String>,
}

impl Manifest {
    /// Loads an existing manifest from `dir/MANIFEST`, or creates an empty
    /// one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest file exists but cannot be parsed.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);

        if !path.exists() {
            return Ok(Self {
                path,
                generation: 0,
                registry_generation: 0,
                distinct_hashes: 0,
                total_entries: 0,
                segments: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut generation = None;
        let mut registry_generation = None;
        let mut distinct_hashes = None;
        let mut total_entries = None;
        let mut segments = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();

            // Skip empty lines and comments.
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(filename) = trimmed.strip_prefix("seg:") {
                if filename.is_empty() {
                    bail!("manifest line {}: empty segment name", line_num + 1);
                }
                segments.push(filename.to_string());
                continue;
            }

            let (key, value) = trimmed.split_once('=').ok_or_else(|| {
                anyhow::anyhow!(
                    "manifest line {}: invalid format (expected 'key=value' or 'seg:<filename>'): {}",
                    line_num + 1,
                    trimmed
                )
            })?;
            let parsed: u64 = value.parse().with_context(|| {
                format!("manifest line {}: bad value for '{}'", line_num + 1, key)
            })?;
            match key {
                "generation" => generation = Some(parsed),
                "registry" => registry_generation = Some(parsed),
                "distinct_hashes" => distinct_hashes = Some(parsed),
                "total_entries" => total_entries = Some(parsed),
                other => bail!("manifest line {}: unknown field '{}'", line_num + 1, other),
            }
        }

        Ok(Self {
            path,
            generation: generation
                .ok_or_else(|| anyhow::anyhow!("manifest missing 'generation' field"))?,
            registry_generation: registry_generation
                .ok_or_else(|| anyhow::anyhow!("manifest missing 'registry' field"))?,
            distinct_hashes: distinct_hashes
                .ok_or_else(|| anyhow::anyhow!("manifest missing 'distinct_hashes' field"))?,
            total_entries: total_entries
                .ok_or_else(|| anyhow::anyhow!("manifest missing 'total_entries' field"))?,
            segments,
        })
    }

    /// Persists the current manifest state to disk atomically.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| {
                    format!("failed to create manifest tmp at {}", tmp_path.display())
                })?;

            writeln!(f, "# Cairn store manifest")?;
            writeln!(f, "# Format: key=value, then 'seg:<filename>' newest first")?;
            writeln!(f, "generation={}", self.generation)?;
            writeln!(f, "registry={}", self.registry_generation)?;
            writeln!(f, "distinct_hashes={}", self.distinct_hashes)?;
            writeln!(f, "total_entries={}", self.total_entries)?;
            for filename in &self.segments {
                writeln!(f, "seg:{}", filename)?;
            }

            f.flush()?;
            f.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to publish manifest at {}", self.path.display()))?;

        // Fsync the parent directory so the rename survives a crash.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Records a new segment at the front (newest first). Does **not** save.
    pub fn add_segment(&mut self, filename: String) {
        self.segments.insert(0, filename);
    }

    /// Replaces all segment entries with the single compacted segment.
    pub fn replace_segments(&mut self, filename: String) {
        self.segments.clear();
        self.segments.push(filename);
    }
}
