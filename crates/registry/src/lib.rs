//! # Source Registry
//!
//! Durable table of sources (files or media) that have contributed block
//! hashes to the database. A source is identified by its whole-file hash;
//! two imports naming the same file hash always resolve to the same
//! `source_id`, no matter what the file was called at the time.
//!
//! ## Staged writes
//!
//! New sources and new provenance names are **staged** in memory until the
//! enclosing operation commits. A commit writes a complete new generation
//! file `sources-<generation>.reg` (temp + fsync + atomic rename); the
//! store's manifest then names the live generation, so registry and hash
//! index commit as one atomic unit. Rolling back simply drops the staged
//! state — allocated ids vanish with it, leaving no holes.
//!
//! ## Generation file format
//!
//! ```text
//! [magic: u32 LE "CREG"][source_count: u64 LE]
//! then per source:
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[source_id: u64][hash_len: u32][file_hash][filesize: u64]
//! [name_count: u32]` then `name_count` × `[repo_len: u32][repository_name]
//! [name_len: u32][filename]`. `record_len` includes the 4-byte CRC but not
//! itself. The file is rewritten whole at every commit; it is tiny next to
//! the hash index (one record per source, not per block).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Magic number identifying registry generation files (ASCII "CREG").
pub const REGISTRY_MAGIC: u32 = 0x4352_4547;

/// Upper bound on a single source record (hash + names). Anything larger is
/// corruption.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

/// A provenance name under which a source was seen: repository + filename.
///
/// Names are recorded, never used as a lookup key. The same source imported
/// from two evidence sets keeps both name pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceName {
    pub repository_name: String,
    pub filename: String,
}

/// External identity of a source as seen by the parser: enough to resolve
/// or create a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Whole-file hash identifying the source (raw digest bytes).
    pub file_hash: Vec<u8>,
    /// Length of the source in bytes.
    pub filesize: u64,
    /// Provenance names observed for this source (may be empty).
    pub names: Vec<SourceName>,
}

/// One registered source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Database-local id: monotonic, assigned once, never reused.
    pub source_id: u64,
    /// Whole-file hash (raw digest bytes).
    pub file_hash: Vec<u8>,
    /// Length of the source in bytes.
    pub filesize: u64,
    /// Distinct provenance names, ordered.
    pub names: BTreeSet<SourceName>,
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A generation file failed validation.
    #[error("corrupt registry file: {0}")]
    Corrupt(String),

    /// The same identifying hash was presented with an inconsistent length.
    /// This is a data-integrity problem in the input, never ignored.
    #[error(
        "source identity conflict for file hash {file_hash_hex}: \
         registered filesize {existing} but import says {incoming}"
    )]
    Conflict {
        file_hash_hex: String,
        existing: u64,
        incoming: u64,
    },
}

/// The source registry: committed sources plus the staged delta of the
/// operation in flight.
#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    /// Committed sources, indexed by `source_id - 1`.
    committed: Vec<Source>,
    /// Staged new sources, ids following the committed range.
    staged: Vec<Source>,
    /// file_hash -> source_id over committed + staged.
    by_hash: BTreeMap<Vec<u8>, u64>,
    /// Names added to *committed* sources by the in-flight operation.
    staged_names: BTreeMap<u64, BTreeSet<SourceName>>,
    /// Filesizes learned for *committed* sources that were registered with
    /// size 0 (unknown).
    staged_filesizes: BTreeMap<u64, u64>,
}

impl Registry {
    /// Creates an empty registry for a fresh database.
    pub fn create<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            committed: Vec::new(),
            staged: Vec::new(),
            by_hash: BTreeMap::new(),
            staged_names: BTreeMap::new(),
            staged_filesizes: BTreeMap::new(),
        }
    }

    /// Opens the registry at the given committed generation.
    ///
    /// Generation 0 means no sources file has ever been committed; the
    /// registry starts empty.
    pub fn open<P: AsRef<Path>>(dir: P, generation: u64) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        let mut reg = Self::create(&dir);
        if generation == 0 {
            return Ok(reg);
        }

        let path = generation_path(&dir, generation);
        let file = File::open(&path)?;
        let mut r = BufReader::new(file);

        let magic = r.read_u32::<LittleEndian>()?;
        if magic != REGISTRY_MAGIC {
            return Err(RegistryError::Corrupt(format!(
                "bad magic {:#x} in {}",
                magic,
                path.display()
            )));
        }
        let count = r.read_u64::<LittleEndian>()?;

        let mut body = Vec::with_capacity(256);
        for i in 0..count {
            let record_len = r.read_u32::<LittleEndian>()?;
            if record_len <= 4 || record_len > MAX_RECORD_BYTES {
                return Err(RegistryError::Corrupt(format!(
                    "record {} has absurd length {}",
                    i, record_len
                )));
            }
            let crc = r.read_u32::<LittleEndian>()?;

            body.clear();
            body.resize((record_len - 4) as usize, 0);
            r.read_exact(&mut body)?;

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(RegistryError::Corrupt(format!("record {} fails CRC", i)));
            }

            let source = decode_source(&body)
                .map_err(|e| RegistryError::Corrupt(format!("record {}: {}", i, e)))?;

            // ids are written in order, densely, starting at 1
            if source.source_id != reg.committed.len() as u64 + 1 {
                return Err(RegistryError::Corrupt(format!(
                    "record {} has out-of-order source_id {}",
                    i, source.source_id
                )));
            }
            reg.by_hash
                .insert(source.file_hash.clone(), source.source_id);
            reg.committed.push(source);
        }

        debug!(
            "opened registry generation {} with {} sources",
            generation,
            reg.committed.len()
        );
        Ok(reg)
    }

    /// Resolves a descriptor to a source id, staging a new source if the
    /// identifying hash has never been seen.
    ///
    /// Returns `(source_id, created)`. On a hit the stored filesize must
    /// match the descriptor's; a mismatch is a [`RegistryError::Conflict`].
    /// Size 0 means unknown on either side: an unknown registered size
    /// adopts the incoming one, and an unknown incoming size matches
    /// anything. New provenance names on a hit are staged against the
    /// existing source.
    pub fn resolve_or_create(
        &mut self,
        desc: &SourceDescriptor,
    ) -> Result<(u64, bool), RegistryError> {
        if let Some(&id) = self.by_hash.get(&desc.file_hash) {
            let current = self
                .staged_filesizes
                .get(&id)
                .copied()
                .unwrap_or_else(|| self.source_ref(id).filesize);
            if desc.filesize != 0 && current != desc.filesize {
                if current != 0 {
                    return Err(RegistryError::Conflict {
                        file_hash_hex: hex::encode(&desc.file_hash),
                        existing: current,
                        incoming: desc.filesize,
                    });
                }
                // Size was unknown when the source was first seen
                // (hash-only import); adopt the incoming size.
                if id > self.committed.len() as u64 {
                    self.source_mut(id).filesize = desc.filesize;
                } else {
                    self.staged_filesizes.insert(id, desc.filesize);
                }
            }
            // Stage any names we have not recorded yet.
            let is_staged_source = id > self.committed.len() as u64;
            for name in &desc.names {
                if is_staged_source {
                    self.source_mut(id).names.insert(name.clone());
                } else if !self.source_ref(id).names.contains(name) {
                    self.staged_names.entry(id).or_default().insert(name.clone());
                }
            }
            return Ok((id, false));
        }

        let id = (self.committed.len() + self.staged.len()) as u64 + 1;
        let source = Source {
            source_id: id,
            file_hash: desc.file_hash.clone(),
            filesize: desc.filesize,
            names: desc.names.iter().cloned().collect(),
        };
        self.by_hash.insert(desc.file_hash.clone(), id);
        self.staged.push(source);
        Ok((id, true))
    }

    /// Looks up a source by id (committed or staged).
    pub fn lookup(&self, source_id: u64) -> Option<&Source> {
        let idx = source_id.checked_sub(1)? as usize;
        if idx < self.committed.len() {
            Some(&self.committed[idx])
        } else {
            self.staged.get(idx - self.committed.len())
        }
    }

    /// Looks up a source by its identifying whole-file hash.
    pub fn lookup_by_hash(&self, file_hash: &[u8]) -> Option<&Source> {
        self.by_hash.get(file_hash).and_then(|&id| self.lookup(id))
    }

    /// Iterates committed sources in file-hash order (the export order).
    pub fn iter_by_hash(&self) -> impl Iterator<Item = &Source> {
        self.by_hash
            .iter()
            .filter(|&(_, &id)| id <= self.committed.len() as u64)
            .map(move |(_, &id)| &self.committed[(id - 1) as usize])
    }

    /// Number of committed sources.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Number of sources staged by the in-flight operation.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Returns `true` if the in-flight operation has anything to commit.
    pub fn has_staged_state(&self) -> bool {
        !self.staged.is_empty()
            || !self.staged_names.is_empty()
            || !self.staged_filesizes.is_empty()
    }

    /// Writes the next generation file and folds the staged delta into the
    /// committed state.
    ///
    /// The caller supplies the generation number (the store's manifest owns
    /// the numbering so that registry and index commit together). A caller
    /// with its own commit point should use
    /// [`write_generation`](Registry::write_generation) and
    /// [`finalize_commit`](Registry::finalize_commit) separately instead.
    pub fn commit(&mut self, generation: u64) -> Result<(), RegistryError> {
        self.write_generation(generation)?;
        self.finalize_commit();
        Ok(())
    }

    /// Writes the generation file for the committed-plus-staged view. The
    /// in-memory tables are untouched: the delta stays staged, so a failure
    /// here (or in a later step of the caller's commit sequence) can still
    /// be [`rollback`](Registry::rollback)-ed without leaking source ids.
    ///
    /// The write is crash-safe: temp file, fsync, atomic rename. Call
    /// [`finalize_commit`](Registry::finalize_commit) only once the caller's
    /// own commit point has succeeded — for the store, once the manifest
    /// naming this generation has been renamed into place.
    pub fn write_generation(&self, generation: u64) -> Result<(), RegistryError> {
        let path = generation_path(&self.dir, generation);
        let tmp_path = path.with_extension("reg.tmp");
        {
            let raw = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut w = BufWriter::new(raw);

            w.write_u32::<LittleEndian>(REGISTRY_MAGIC)?;
            w.write_u64::<LittleEndian>((self.committed.len() + self.staged.len()) as u64)?;

            let mut body = Vec::with_capacity(256);
            for source in &self.committed {
                body.clear();
                let names = self.staged_names.get(&source.source_id);
                let filesize = self.staged_filesizes.get(&source.source_id);
                if names.is_none() && filesize.is_none() {
                    encode_source(source, &mut body)?;
                } else {
                    // Staged metadata on a committed source: serialize the
                    // post-commit view without mutating the table.
                    let mut view = source.clone();
                    if let Some(names) = names {
                        view.names.extend(names.iter().cloned());
                    }
                    if let Some(&filesize) = filesize {
                        view.filesize = filesize;
                    }
                    encode_source(&view, &mut body)?;
                }
                write_record(&mut w, &body)?;
            }
            for source in &self.staged {
                body.clear();
                encode_source(source, &mut body)?;
                write_record(&mut w, &body)?;
            }

            w.flush()?;
            w.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(
            "wrote registry generation {} ({} sources)",
            generation,
            self.committed.len() + self.staged.len()
        );
        Ok(())
    }

    /// Folds the staged delta into the committed table. The generation file
    /// from [`write_generation`](Registry::write_generation) must already be
    /// durable and published; after this call the delta can no longer be
    /// rolled back.
    pub fn finalize_commit(&mut self) {
        for (id, names) in std::mem::take(&mut self.staged_names) {
            self.committed[(id - 1) as usize].names.extend(names);
        }
        for (id, filesize) in std::mem::take(&mut self.staged_filesizes) {
            self.committed[(id - 1) as usize].filesize = filesize;
        }
        self.committed.append(&mut self.staged);
    }

    /// Discards the staged delta. Ids allocated since the last commit are
    /// forgotten along with it.
    pub fn rollback(&mut self) {
        for source in self.staged.drain(..) {
            self.by_hash.remove(&source.file_hash);
        }
        self.staged_names.clear();
        self.staged_filesizes.clear();
    }

    /// Removes generation files other than `keep` (best effort, used by the
    /// store's recovery sweep).
    pub fn sweep_generations<P: AsRef<Path>>(dir: P, keep: u64) {
        let keep_name = format!("sources-{:010}.reg", keep);
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    let is_reg = name.starts_with("sources-")
                        && (name.ends_with(".reg") || name.ends_with(".reg.tmp"));
                    if is_reg && name != keep_name {
                        debug!("sweeping stale registry file {}", name);
                        let _ = std::fs::remove_file(&p);
                    }
                }
            }
        }
    }

    fn source_ref(&self, id: u64) -> &Source {
        self.lookup(id).expect("id resolved from by_hash must exist")
    }

    fn source_mut(&mut self, id: u64) -> &mut Source {
        let idx = (id - 1) as usize;
        if idx < self.committed.len() {
            &mut self.committed[idx]
        } else {
            let sidx = idx - self.committed.len();
            &mut self.staged[sidx]
        }
    }
}

/// Path of a registry generation file within the database directory.
pub fn generation_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("sources-{:010}.reg", generation))
}

fn write_record<W: Write>(w: &mut W, body: &[u8]) -> io::Result<()> {
    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc = hasher.finalize();

    w.write_u32::<LittleEndian>((body.len() + 4) as u32)?;
    w.write_u32::<LittleEndian>(crc)?;
    w.write_all(body)
}

fn encode_source(source: &Source, body: &mut Vec<u8>) -> io::Result<()> {
    body.write_u64::<LittleEndian>(source.source_id)?;
    body.write_u32::<LittleEndian>(source.file_hash.len() as u32)?;
    body.extend_from_slice(&source.file_hash);
    body.write_u64::<LittleEndian>(source.filesize)?;
    body.write_u32::<LittleEndian>(source.names.len() as u32)?;
    for name in &source.names {
        body.write_u32::<LittleEndian>(name.repository_name.len() as u32)?;
        body.extend_from_slice(name.repository_name.as_bytes());
        body.write_u32::<LittleEndian>(name.filename.len() as u32)?;
        body.extend_from_slice(name.filename.as_bytes());
    }
    Ok(())
}

fn decode_source(body: &[u8]) -> Result<Source, String> {
    let mut r = body;
    let err = |what: &str| format!("truncated {}", what);

    let source_id = r.read_u64::<LittleEndian>().map_err(|_| err("source_id"))?;
    let hash_len = r.read_u32::<LittleEndian>().map_err(|_| err("hash_len"))? as usize;
    if hash_len > r.len() {
        return Err(err("file_hash"));
    }
    let mut file_hash = vec![0u8; hash_len];
    r.read_exact(&mut file_hash).map_err(|_| err("file_hash"))?;
    let filesize = r.read_u64::<LittleEndian>().map_err(|_| err("filesize"))?;
    let name_count = r.read_u32::<LittleEndian>().map_err(|_| err("name_count"))?;

    let mut names = BTreeSet::new();
    for _ in 0..name_count {
        let repo = read_string(&mut r).map_err(|_| err("repository_name"))?;
        let file = read_string(&mut r).map_err(|_| err("filename"))?;
        names.insert(SourceName {
            repository_name: repo,
            filename: file,
        });
    }

    Ok(Source {
        source_id,
        file_hash,
        filesize,
        names,
    })
}

fn read_string(r: &mut &[u8]) -> io::Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > r.len() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short string"));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
