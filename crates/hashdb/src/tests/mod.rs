mod import_tests;

use crate::{HashAlgorithm, HashDb};
use std::fmt::Write as _;
use std::path::Path;

pub(crate) const BLOCK: u64 = 4096;

/// Deterministic 32-hex-char (md5-width) block hash for tests.
pub(crate) fn block_hex(i: u64) -> String {
    format!("{:032x}", (i as u128) + 1)
}

/// Deterministic md5-width file hash, disjoint from block hashes.
pub(crate) fn file_hex(i: u64) -> String {
    format!("{:032x}", 0xf000_0000_0000u128 + i as u128)
}

/// One fileobject of a generated digest-list: filename, identifying hash,
/// and `(offset, block_hash_hex)` runs.
pub(crate) struct TestFile {
    pub name: String,
    pub file_hash: String,
    pub blocks: Vec<(u64, String)>,
}

impl TestFile {
    /// A file of `count` sequential blocks hashed as `block_hex(first..)`.
    pub fn sequential(idx: u64, count: u64, first_hash: u64) -> Self {
        Self {
            name: format!("file-{}.dat", idx),
            file_hash: file_hex(idx),
            blocks: (0..count)
                .map(|b| (b * BLOCK, block_hex(first_hash + b)))
                .collect(),
        }
    }

    pub fn filesize(&self) -> u64 {
        self.blocks.len() as u64 * BLOCK
    }
}

/// Renders a DFXML digest-list for the given files at the test block size.
pub(crate) fn dfxml_doc(files: &[TestFile]) -> String {
    let mut doc = String::from("<?xml version='1.0' encoding='UTF-8'?>\n<dfxml>\n");
    for file in files {
        writeln!(doc, "<fileobject>").unwrap();
        writeln!(doc, "<repository_name>testrepo</repository_name>").unwrap();
        writeln!(doc, "<filename>{}</filename>", file.name).unwrap();
        writeln!(doc, "<filesize>{}</filesize>", file.filesize()).unwrap();
        writeln!(doc, "<hashdigest type='md5'>{}</hashdigest>", file.file_hash).unwrap();
        writeln!(doc, "<byte_runs>").unwrap();
        for (offset, hash) in &file.blocks {
            writeln!(
                doc,
                "<byte_run file_offset='{}' len='{}'>\
                 <hashdigest type='md5'>{}</hashdigest></byte_run>",
                offset, BLOCK, hash
            )
            .unwrap();
        }
        writeln!(doc, "</byte_runs>").unwrap();
        writeln!(doc, "</fileobject>").unwrap();
    }
    doc.push_str("</dfxml>\n");
    doc
}

/// Writes a digest-list to disk and returns its path.
pub(crate) fn write_list(dir: &Path, name: &str, doc: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, doc).unwrap();
    path
}

pub(crate) fn create_db(dir: &Path) -> HashDb {
    HashDb::create(dir, HashAlgorithm::Md5, 0).expect("create db")
}

/// Export as sorted lines, for order-insensitive equality checks.
pub(crate) fn export_sorted(db: &HashDb) -> Vec<String> {
    let mut out = Vec::new();
    db.export_json(&mut out).expect("export");
    let mut lines: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect();
    lines.sort();
    lines
}
