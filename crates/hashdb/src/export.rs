//! JSON-lines export: the committed database as text, importable by
//! [`JsonLinesReader`](digestlist::JsonLinesReader).
//!
//! Sources are written first (data line, then one name line per provenance
//! pair), in file-hash order, followed by block-hash lines in hash order.
//! Importing the output into an empty database reproduces the original
//! contents, because source lines land before the hash lines that
//! reference them.

use log::info;
use serde_json::json;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{DbError, HashDb};

impl HashDb {
    /// Writes the committed database as JSON lines.
    pub fn export_json<W: Write>(&self, out: &mut W) -> Result<(), DbError> {
        let registry = self.store.registry();

        let mut sources = 0u64;
        for source in registry.iter_by_hash() {
            let file_hash = hex::encode(&source.file_hash);
            writeln!(
                out,
                "{}",
                json!({"file_hash": file_hash, "filesize": source.filesize})
            )?;
            for name in &source.names {
                writeln!(
                    out,
                    "{}",
                    json!({
                        "file_hash": file_hash,
                        "repository_name": name.repository_name,
                        "filename": name.filename,
                    })
                )?;
            }
            sources += 1;
        }

        let mut entries = 0u64;
        let mut iter = self.store.merge_iter();
        while let Some((hash, occs)) = iter.next_entry()? {
            let block_hash = hex::encode(&hash);
            for occ in occs {
                let source = registry.lookup(occ.source_id).ok_or_else(|| {
                    DbError::Corrupt(format!(
                        "occurrence references unknown source {}",
                        occ.source_id
                    ))
                })?;
                writeln!(
                    out,
                    "{}",
                    json!({
                        "block_hash": block_hash,
                        "file_hash": hex::encode(&source.file_hash),
                        "file_offset": occ.offset,
                    })
                )?;
                entries += 1;
            }
        }

        info!("exported {} sources, {} hash entries", sources, entries);
        Ok(())
    }

    /// Exports to a file, buffered.
    pub fn export_json_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), DbError> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut out = BufWriter::new(file);
        self.export_json(&mut out)?;
        out.flush()?;
        Ok(())
    }
}
