mod merge_tests;

use stage::{Occurrence, Stage};

/// Builds a fake 16-byte block hash from a counter.
pub(crate) fn hash(i: u64) -> Vec<u8> {
    let mut d = vec![0u8; 16];
    d[..8].copy_from_slice(&i.to_be_bytes());
    d[8..].copy_from_slice(&i.wrapping_mul(0x9e3779b97f4a7c15).to_le_bytes());
    d
}

/// Builds a stage with `n` hashes, each occurring once in source 1.
pub(crate) fn stage_with(n: u64) -> Stage {
    let mut s = Stage::new();
    for i in 0..n {
        s.insert(hash(i), Occurrence::new(1, i * 4096));
    }
    s
}
