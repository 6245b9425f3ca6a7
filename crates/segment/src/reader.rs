use anyhow::{bail, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use stage::Occurrence;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::format::{read_footer, Footer, FOOTER_BYTES};

/// Maximum key size we'll allocate during reads. Block hashes are at most 64
/// bytes (SHA-512 headroom); anything larger is corruption.
const MAX_KEY_BYTES: usize = 64;
/// Maximum occurrences per record we'll allocate during reads (256M tuples,
/// 4 GiB). Prevents OOM on corrupt files.
const MAX_OCCURRENCES: usize = 256 * 1024 * 1024;

/// Reads a segment file for block-hash lookups.
///
/// On [`open`](SegmentReader::open) the entire **index** is loaded into
/// memory as a `BTreeMap<Vec<u8>, u64>` (hash → data-section byte offset),
/// along with the bloom filter for fast negative lookups.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that `get` can be called through a shared `&self`
/// reference. Point lookups require only a single seek + read per call.
pub struct SegmentReader {
    /// Path to the `.seg` file on disk (kept for diagnostics).
    #[allow(dead_code)]
    path: PathBuf,
    /// In-memory index mapping each hash to its byte offset in the data section.
    index: BTreeMap<Vec<u8>, u64>,
    /// Bloom filter over all hashes in the file.
    bloom: BloomFilter,
    /// Persistent file handle, wrapped in Mutex for interior mutability.
    file: Mutex<BufReader<File>>,
    footer: Footer,
}

impl SegmentReader {
    /// Opens a segment file and loads its index and bloom filter into memory.
    ///
    /// # Validation
    ///
    /// - The file must be at least 28 bytes (footer).
    /// - The footer magic must be `CSG1`.
    /// - The `index_offset` must point inside the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is too small, the magic is wrong, or any
    /// I/O operation fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf)?;
        let filesize = f.metadata()?.len();

        if filesize < FOOTER_BYTES {
            bail!("segment file too small: {}", path_buf.display());
        }

        let footer = read_footer(&mut f)?;

        if footer.index_offset >= filesize || footer.bloom_offset >= footer.index_offset {
            bail!("invalid section offsets in {}", path_buf.display());
        }

        // Load the bloom filter
        f.seek(SeekFrom::Start(footer.bloom_offset))?;
        let bloom = BloomFilter::read_from(&mut f)?;

        // Read index entries from index_offset up to footer start
        f.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index = BTreeMap::new();

        while f.stream_position()? < (filesize - FOOTER_BYTES) {
            let key_len = f.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!(
                    "corrupt index: key_len {} exceeds maximum {}",
                    key_len,
                    MAX_KEY_BYTES
                );
            }
            let mut key = vec![0u8; key_len];
            f.read_exact(&mut key)?;
            let data_offset = f.read_u64::<LittleEndian>()?;
            index.insert(key, data_offset);
        }

        // Rewind to start for future reads
        f.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path_buf,
            index,
            bloom,
            file: Mutex::new(BufReader::new(f)),
            footer,
        })
    }

    /// Looks up all occurrences of a block hash in this segment.
    ///
    /// The bloom filter is checked first; a negative result means the hash is
    /// **definitely not** in this segment, avoiding the index lookup and
    /// disk I/O entirely.
    ///
    /// Returns `Ok(Some(occurrences))` sorted by `(source_id, offset)`, or
    /// `Ok(None)` if the hash is not present.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, CRC mismatch, or if the on-disk key
    /// does not match the requested hash (index corruption).
    pub fn get(&self, hash: &[u8]) -> Result<Option<Vec<Occurrence>>> {
        // Fast path: bloom filter says "definitely not here"
        if !self.bloom.may_contain(hash) {
            return Ok(None);
        }

        let offset = match self.index.get(hash) {
            Some(&o) => o,
            None => return Ok(None),
        };

        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(offset))?;

        // Record layout: [crc32: u32][key_len: u32][key][occ_count: u32][occurrences]
        let stored_crc = f.read_u32::<LittleEndian>()?;

        let key_len = f.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!(
                "corrupt data: key_len {} exceeds maximum {}",
                key_len,
                MAX_KEY_BYTES
            );
        }
        let mut key_buf = vec![0u8; key_len];
        f.read_exact(&mut key_buf)?;

        // Sanity: the key read should match the requested hash
        if key_buf.as_slice() != hash {
            bail!("index pointed to mismatching hash at offset {}", offset);
        }

        let occ_count = f.read_u32::<LittleEndian>()? as usize;
        if occ_count > MAX_OCCURRENCES {
            bail!(
                "corrupt data: occ_count {} exceeds maximum {}",
                occ_count,
                MAX_OCCURRENCES
            );
        }

        let mut occs = Vec::with_capacity(occ_count);
        let mut occ_bytes = Vec::with_capacity(occ_count * 16);
        for _ in 0..occ_count {
            let source_id = f.read_u64::<LittleEndian>()?;
            let off = f.read_u64::<LittleEndian>()?;
            occ_bytes.extend_from_slice(&source_id.to_le_bytes());
            occ_bytes.extend_from_slice(&off.to_le_bytes());
            occs.push(Occurrence::new(source_id, off));
        }

        // Verify the CRC32 over the reconstructed record body:
        // key_len + key + occ_count + occurrences.
        let mut hasher = Crc32::new();
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&key_buf);
        hasher.update(&(occ_count as u32).to_le_bytes());
        hasher.update(&occ_bytes);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x} (data corruption)",
                offset,
                stored_crc,
                actual_crc
            );
        }

        Ok(Some(occs))
    }

    /// Returns `true` if the exact `(hash, source_id, offset)` tuple exists.
    ///
    /// This drives the import dedup counters. The occurrence list is sorted,
    /// so the check is a binary search after the record read.
    pub fn contains(&self, hash: &[u8], occ: &Occurrence) -> Result<bool> {
        match self.get(hash)? {
            Some(occs) => Ok(occs.binary_search(occ).is_ok()),
            None => Ok(false),
        }
    }

    /// Returns `true` if the hash has at least one occurrence in this
    /// segment. Pure in-memory check (bloom filter + index), no disk I/O.
    #[must_use]
    pub fn contains_key(&self, hash: &[u8]) -> bool {
        self.bloom.may_contain(hash) && self.index.contains_key(hash)
    }

    /// Total `(hash, source_id, offset)` tuples in this segment.
    #[must_use]
    pub fn entry_total(&self) -> u64 {
        self.footer.entry_total
    }

    /// Returns the number of distinct hashes in this segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the segment contains zero hashes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns an iterator over all hashes in the in-memory index.
    ///
    /// Hashes are yielded in ascending sorted order (guaranteed by `BTreeMap`).
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(|k| k.as_slice())
    }
}
