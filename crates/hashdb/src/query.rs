//! Query interface: occurrences of a block hash, with or without joined
//! source metadata.

use registry::SourceName;
use stage::Occurrence;

use crate::{DbError, HashDb};

/// One occurrence of a looked-up hash, joined with its source's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHit {
    pub source_id: u64,
    /// Byte offset of the block within the source.
    pub offset: u64,
    /// Identifying whole-file hash of the source.
    pub file_hash: Vec<u8>,
    pub filesize: u64,
    /// Provenance names, ordered.
    pub names: Vec<SourceName>,
}

impl HashDb {
    /// All `(source_id, offset)` occurrences of a block hash, sorted.
    /// Empty if the hash is unknown.
    pub fn lookup(&self, hash: &[u8]) -> Result<Vec<Occurrence>, DbError> {
        Ok(self.store.lookup(hash)?.unwrap_or_default())
    }

    /// Occurrences joined with registry metadata.
    pub fn lookup_sources(&self, hash: &[u8]) -> Result<Vec<SourceHit>, DbError> {
        let occs = self.lookup(hash)?;
        let registry = self.store.registry();

        let mut hits = Vec::with_capacity(occs.len());
        for occ in occs {
            let source = registry.lookup(occ.source_id).ok_or_else(|| {
                DbError::Corrupt(format!(
                    "occurrence references unknown source {}",
                    occ.source_id
                ))
            })?;
            hits.push(SourceHit {
                source_id: occ.source_id,
                offset: occ.offset,
                file_hash: source.file_hash.clone(),
                filesize: source.filesize,
                names: source.names.iter().cloned().collect(),
            });
        }
        Ok(hits)
    }

    /// Number of occurrences of a hash. Zero if unknown.
    pub fn count(&self, hash: &[u8]) -> Result<u64, DbError> {
        Ok(self.store.count(hash)?)
    }
}
