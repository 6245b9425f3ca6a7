//! Database-to-database merge.
//!
//! The source database streams through the same resolve-or-create and
//! insert-if-absent logic an import uses: source ids are re-resolved in the
//! target by identifying file hash, never copied, so the merge is correct
//! even when the two databases allocated ids in different orders. The whole
//! merge is one atomic commit on the target.

use log::info;
use registry::SourceDescriptor;
use stage::Occurrence;
use std::collections::BTreeMap;

use crate::{ChangeSet, DbError, HashDb};

impl HashDb {
    /// Merges everything committed in `source` into this database.
    ///
    /// # Errors
    ///
    /// - [`DbError::SelfMerge`] if `source` is this database.
    /// - [`DbError::ConfigMismatch`] if the algorithms differ, or both
    ///   block sizes are established and differ. An unestablished target
    ///   adopts the source's block size.
    /// - [`DbError::SourceConflict`] if the same file hash carries
    ///   inconsistent filesizes.
    pub fn merge_from(&mut self, source: &HashDb) -> Result<ChangeSet, DbError> {
        // Canonicalized so `db` and `./db/../db` are recognized as the same
        // directory.
        let target_dir = std::fs::canonicalize(&self.dir)?;
        let source_dir = std::fs::canonicalize(&source.dir)?;
        if target_dir == source_dir {
            return Err(DbError::SelfMerge(target_dir.display().to_string()));
        }

        if source.settings.algorithm != self.settings.algorithm {
            return Err(DbError::ConfigMismatch(format!(
                "source algorithm {} vs target {}",
                source.settings.algorithm, self.settings.algorithm
            )));
        }
        let block_size = match (
            self.settings.established_block_size(),
            source.settings.established_block_size(),
        ) {
            (Some(t), Some(s)) if t != s => {
                return Err(DbError::ConfigMismatch(format!(
                    "source block size {} vs target {}",
                    s, t
                )));
            }
            (Some(t), _) => Some(t),
            (None, s) => s,
        };

        let mut change = ChangeSet::default();
        let result = self.merge_contents(source, &mut change);
        let change = self.finish_import(result, block_size, change, &source.dir)?;

        info!(
            "merged {} into {}",
            source.dir.display(),
            self.dir.display()
        );
        Ok(change)
    }

    fn merge_contents(
        &mut self,
        source: &HashDb,
        change: &mut ChangeSet,
    ) -> Result<(), DbError> {
        // Re-resolve every source in the target, remembering the id mapping
        // for the hash pass.
        let mut id_map: BTreeMap<u64, u64> = BTreeMap::new();
        for src in source.store.registry().iter_by_hash() {
            let desc = SourceDescriptor {
                file_hash: src.file_hash.clone(),
                filesize: src.filesize,
                names: src.names.iter().cloned().collect(),
            };
            let (target_id, created) = self.store.registry_mut().resolve_or_create(&desc)?;
            if created {
                change.sources_inserted += 1;
            } else {
                change.sources_already_present += 1;
            }
            id_map.insert(src.source_id, target_id);
        }

        let mut iter = source.store.merge_iter();
        while let Some((hash, occs)) = iter.next_entry()? {
            for occ in occs {
                let target_id = *id_map.get(&occ.source_id).ok_or_else(|| {
                    DbError::Corrupt(format!(
                        "occurrence references unknown source {}",
                        occ.source_id
                    ))
                })?;
                if self
                    .store
                    .insert(&hash, Occurrence::new(target_id, occ.offset))?
                {
                    change.hashes_inserted += 1;
                } else {
                    change.hashes_already_present += 1;
                }
            }
        }
        Ok(())
    }
}
