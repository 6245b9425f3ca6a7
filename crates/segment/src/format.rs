//! Segment binary format constants and footer read/write helpers.
//!
//! ## Footer (28 bytes) — magic `CSG1` (`0x4353_4731`)
//!
//! ```text
//! [entry_total: u64 LE][bloom_offset: u64 LE][index_offset: u64 LE][magic: u32 LE]
//! ```
//!
//! `entry_total` counts `(hash, source_id, offset)` tuples, not distinct
//! hashes; the distinct-hash count is the number of index entries.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};

/// Magic number identifying Cairn segment files (ASCII "CSG1").
pub const SEGMENT_MAGIC: u32 = 0x4353_4731;

/// Size of the footer in bytes: 8 (`entry_total`) + 8 (`bloom_offset`)
/// + 8 (`index_offset`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 8 + 4;

/// Parsed segment footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Total `(hash, source_id, offset)` tuples in the data section.
    pub entry_total: u64,
    /// Byte offset where the bloom section starts.
    pub bloom_offset: u64,
    /// Byte offset where the index section starts.
    pub index_offset: u64,
}

/// Writes the segment footer to `w`.
///
/// Layout: `[entry_total: u64][bloom_offset: u64][index_offset: u64][magic: u32 = "CSG1"]`
pub fn write_footer<W: Write>(
    w: &mut W,
    entry_total: u64,
    bloom_offset: u64,
    index_offset: u64,
) -> IoResult<()> {
    w.write_u64::<LittleEndian>(entry_total)?;
    w.write_u64::<LittleEndian>(bloom_offset)?;
    w.write_u64::<LittleEndian>(index_offset)?;
    w.write_u32::<LittleEndian>(SEGMENT_MAGIC)?;
    Ok(())
}

/// Reads and validates the segment footer from `r`.
///
/// Strategy: seek to the end to learn the file size, then read the last 28
/// bytes and check the magic. After this call the cursor position is
/// unspecified.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;

    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for segment footer",
        ));
    }

    r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
    let entry_total = r.read_u64::<LittleEndian>()?;
    let bloom_offset = r.read_u64::<LittleEndian>()?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;

    if magic != SEGMENT_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown segment magic: {:#x}", magic),
        ));
    }

    Ok(Footer {
        entry_total,
        bloom_offset,
        index_offset,
    })
}
