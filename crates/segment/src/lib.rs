//! # Segment — immutable sorted block-hash table
//!
//! On-disk storage files for the Cairn hash index.
//!
//! When an import commits, the staged [`stage::Stage`] delta is written to
//! disk as a segment. Segments are *write-once, read-many* — once created
//! they are never modified, only replaced during compaction. Each key is a
//! fixed-width block hash and its value is the ordered set of occurrences
//! `(source_id, offset)` of that block.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted hash records)                            │
//! │                                                               │
//! │ crc32 (u32) | key_len (u32) | key                             │
//! │ occ_count (u32) | occ_count × (source_id u64 | offset u64)    │
//! │                                                               │
//! │ ... repeated for each distinct hash ...                       │
//! │                                                               │
//! │ The CRC32 covers everything after itself in the record        │
//! │ (key_len through the last occurrence). This detects silent    │
//! │ disk corruption on reads.                                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (serialized BloomFilter over all hashes)        │
//! │                                                               │
//! │ num_bits (u64) | num_hashes (u32)                             │
//! │ bits_len (u32) | bits (bytes)                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (hash -> data_offset mapping)                   │
//! │                                                               │
//! │ key_len (u32) | key | data_offset (u64)                       │
//! │                                                               │
//! │ ... repeated for each distinct hash ...                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 28 bytes)                                 │
//! │                                                               │
//! │ entry_total (u64 LE) | bloom_offset (u64 LE)                  │
//! │ index_offset (u64 LE) | magic (u32 LE) "CSG1"                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. `entry_total` is the total number of
//! `(hash, source_id, offset)` tuples in the file, so the store can compute
//! database-wide stats without walking the data section. Occurrences within
//! a record are sorted by `(source_id, offset)`, which makes segment files
//! for identical logical content byte-for-byte identical.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{Footer, FOOTER_BYTES, SEGMENT_MAGIC};
pub use merge::MergeIterator;
pub use reader::SegmentReader;
pub use writer::SegmentWriter;

#[cfg(test)]
mod tests;
