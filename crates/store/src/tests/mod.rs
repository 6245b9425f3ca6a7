
use crate::Store;
use registry::{SourceDescriptor, SourceName};
use std::path::Path;

/// Fake 16-byte block hash for tests.
pub(crate) fn hash(i: u8) -> Vec<u8> {
    vec![i; 16]
}

pub(crate) fn open(dir: &Path) -> Store {
    Store::open(dir).expect("store open")
}

pub(crate) fn source(hash_byte: u8, filesize: u64) -> SourceDescriptor {
    SourceDescriptor {
        file_hash: vec![hash_byte; 16],
        filesize,
        names: vec![SourceName {
            repository_name: "repo".to_string(),
            filename: format!("src-{}.dat", hash_byte),
        }],
    }
}
