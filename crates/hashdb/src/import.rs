//! The import pipeline: digest-list files in, exact change counters out.
//!
//! Records stream through in input order. Sources resolve through the
//! registry (counting inserted vs already present), tuples insert into the
//! store (likewise). Nothing is durable until the single commit at the end;
//! any error under the default abort policy rolls the whole import back.

use digestlist::{DfxmlReader, FileRecord, JsonLinesReader, JsonRecord, ParseError};
use log::{info, warn};
use registry::SourceDescriptor;
use stage::Occurrence;
use std::path::Path;

use crate::{ChangeSet, DbError, HashDb};

/// Import policy knobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportOptions {
    /// Log and skip malformed records instead of aborting the import.
    /// Structural failures (broken XML, I/O) still abort.
    pub skip_malformed: bool,
}

impl HashDb {
    /// Imports a DFXML digest-list file with the default (abort) policy.
    pub fn import_dfxml<P: AsRef<Path>>(&mut self, path: P) -> Result<ChangeSet, DbError> {
        self.import_dfxml_with(path, ImportOptions::default())
    }

    /// Imports a DFXML digest-list file.
    ///
    /// The first import into a database with no established block size
    /// fixes it from the first block record; every later record (and every
    /// later import) must match it. Re-importing the same list is a no-op
    /// that reports every tuple as already present.
    pub fn import_dfxml_with<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: ImportOptions,
    ) -> Result<ChangeSet, DbError> {
        let path = path.as_ref();
        let expected = self.settings.established_block_size();
        let mut reader = DfxmlReader::open(path, self.settings.algorithm, expected)?;

        let mut change = ChangeSet::default();
        let mut block_size = expected;

        let result = loop {
            let record = match reader.next_file() {
                Ok(Some(record)) => record,
                Ok(None) => break Ok(()),
                Err(e @ ParseError::Malformed { .. }) if options.skip_malformed => {
                    warn!("skipping malformed record: {}", e);
                    continue;
                }
                Err(e) => break Err(DbError::from(e)),
            };
            if let Err(e) = self.apply_file_record(&record, &mut block_size, &mut change) {
                break Err(e);
            }
        };

        self.finish_import(result, block_size, change, path)
    }

    /// Imports a JSON-lines digest-list file with the default (abort)
    /// policy.
    pub fn import_json<P: AsRef<Path>>(&mut self, path: P) -> Result<ChangeSet, DbError> {
        self.import_json_with(path, ImportOptions::default())
    }

    /// Imports a JSON-lines digest-list file (the export format).
    ///
    /// JSON records carry no block length, so this path neither establishes
    /// nor validates the block size.
    pub fn import_json_with<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: ImportOptions,
    ) -> Result<ChangeSet, DbError> {
        let path = path.as_ref();
        let mut reader = JsonLinesReader::open(path, self.settings.algorithm)?;

        let mut change = ChangeSet::default();

        let result = loop {
            let record = match reader.next_record() {
                Ok(Some((_, record))) => record,
                Ok(None) => break Ok(()),
                Err(e @ ParseError::Malformed { .. }) if options.skip_malformed => {
                    warn!("skipping malformed line: {}", e);
                    continue;
                }
                Err(e) => break Err(DbError::from(e)),
            };
            if let Err(e) = self.apply_json_record(record, &mut change) {
                break Err(e);
            }
        };

        let established = self.settings.established_block_size();
        self.finish_import(result, established, change, path)
    }

    /// One DFXML fileobject: resolve its source, then stage its blocks.
    fn apply_file_record(
        &mut self,
        record: &FileRecord,
        block_size: &mut Option<u32>,
        change: &mut ChangeSet,
    ) -> Result<(), DbError> {
        let (source_id, created) = self.store.registry_mut().resolve_or_create(&record.source)?;
        if created {
            change.sources_inserted += 1;
        } else {
            change.sources_already_present += 1;
        }

        for block in &record.blocks {
            // The parser rejects byte_runs whose length disagrees with the
            // established size (or with the first run of this list), so
            // every surviving block carries the one size to establish.
            if block_size.is_none() {
                *block_size = Some(block.block_size);
            }

            let occ = Occurrence::new(source_id, block.offset);
            if self.store.insert(&block.hash, occ)? {
                change.hashes_inserted += 1;
            } else {
                change.hashes_already_present += 1;
            }
        }
        Ok(())
    }

    /// One JSON line. Source-data and source-name lines are explicit source
    /// records and count toward the source counters; a block-hash line only
    /// creates its source implicitly, so resolving an existing one is not
    /// "already present".
    fn apply_json_record(
        &mut self,
        record: JsonRecord,
        change: &mut ChangeSet,
    ) -> Result<(), DbError> {
        match record {
            JsonRecord::BlockHash {
                block_hash,
                file_hash,
                file_offset,
            } => {
                let desc = SourceDescriptor {
                    file_hash,
                    filesize: 0,
                    names: Vec::new(),
                };
                let (source_id, created) = self.store.registry_mut().resolve_or_create(&desc)?;
                if created {
                    change.sources_inserted += 1;
                }

                let occ = Occurrence::new(source_id, file_offset);
                if self.store.insert(&block_hash, occ)? {
                    change.hashes_inserted += 1;
                } else {
                    change.hashes_already_present += 1;
                }
            }
            JsonRecord::SourceData {
                file_hash,
                filesize,
            } => {
                let desc = SourceDescriptor {
                    file_hash,
                    filesize,
                    names: Vec::new(),
                };
                let (_, created) = self.store.registry_mut().resolve_or_create(&desc)?;
                if created {
                    change.sources_inserted += 1;
                } else {
                    change.sources_already_present += 1;
                }
            }
            JsonRecord::SourceName { file_hash, name } => {
                let desc = SourceDescriptor {
                    file_hash,
                    filesize: 0,
                    names: vec![name],
                };
                let (_, created) = self.store.registry_mut().resolve_or_create(&desc)?;
                if created {
                    change.sources_inserted += 1;
                } else {
                    change.sources_already_present += 1;
                }
            }
        }
        Ok(())
    }

    /// Commits on success, rolls everything back on error.
    pub(crate) fn finish_import(
        &mut self,
        result: Result<(), DbError>,
        block_size: Option<u32>,
        change: ChangeSet,
        input: &Path,
    ) -> Result<ChangeSet, DbError> {
        if let Err(e) = result {
            self.store.rollback();
            return Err(e);
        }

        if let Some(bs) = block_size {
            if let Err(e) = self.establish_block_size(bs) {
                self.store.rollback();
                return Err(e);
            }
        }
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            return Err(e.into());
        }

        info!(
            "imported {}: {} hashes inserted, {} already present, \
             {} sources inserted, {} already present",
            input.display(),
            change.hashes_inserted,
            change.hashes_already_present,
            change.sources_inserted,
            change.sources_already_present
        );
        Ok(change)
    }
}
