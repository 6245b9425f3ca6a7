//! Streaming parser for the XML digest-list format.
//!
//! The input is a `<dfxml>` document containing one `<fileobject>` per
//! source. A fileobject carries `<repository_name>` (optional),
//! `<filename>`, `<filesize>`, an optional file-level
//! `<hashdigest type='...'>`, and a `<byte_runs>` list of
//! `<byte_run file_offset='N' len='N'>` elements each holding the block's
//! `<hashdigest>`.
//!
//! Parsing is event-driven: only one fileobject is materialized at a time,
//! so memory is bounded by the largest fileobject, not the list. The
//! file-level hash may legally appear after the byte_runs (hashing tools
//! emit it last), which is why records are handed out per completed
//! fileobject rather than per byte_run.

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use registry::{SourceDescriptor, SourceName};
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use crate::{decode_digest, HashAlgorithm, ParseError, Position};

/// One block-level digest: where the block sits in its source and what it
/// hashes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub offset: u64,
    pub block_size: u32,
    pub hash: Vec<u8>,
}

/// All block records of one fileobject, with the resolved source identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub source: SourceDescriptor,
    pub blocks: Vec<BlockRecord>,
}

/// Streaming reader over the fileobjects of an XML digest-list.
///
/// Implements `Iterator<Item = Result<FileRecord, ParseError>>`. The
/// expected block size is validated per byte_run when fixed; pass `None`
/// for a database whose block size is not yet established — the first
/// byte_run of the list then fixes it, and every later run is validated
/// against it the same way. A mismatch is always a positioned
/// [`ParseError::Malformed`], so skip policies treat it like any other
/// bad record.
pub struct DfxmlReader<R: BufRead> {
    xml: Reader<R>,
    algorithm: HashAlgorithm,
    expected_block_size: Option<u32>,
    buf: Vec<u8>,
    /// Running 1-based ordinal of block records across the whole list,
    /// used as the error position.
    record_ordinal: usize,
    fileobjects_seen: usize,
    done: bool,
}

impl DfxmlReader<BufReader<File>> {
    /// Opens a digest-list file for streaming.
    pub fn open<P: AsRef<Path>>(
        path: P,
        algorithm: HashAlgorithm,
        expected_block_size: Option<u32>,
    ) -> Result<Self, ParseError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(
            BufReader::new(file),
            algorithm,
            expected_block_size,
        ))
    }
}

impl<R: BufRead> DfxmlReader<R> {
    /// Wraps any buffered reader (used by tests with in-memory input).
    pub fn from_reader(
        reader: R,
        algorithm: HashAlgorithm,
        expected_block_size: Option<u32>,
    ) -> Self {
        let mut xml = Reader::from_reader(reader);
        xml.trim_text(true);
        Self {
            xml,
            algorithm,
            expected_block_size,
            buf: Vec::with_capacity(1024),
            record_ordinal: 0,
            fileobjects_seen: 0,
            done: false,
        }
    }

    /// Advances to the next `<fileobject>` and parses it completely.
    ///
    /// Returns `Ok(None)` at end of document.
    pub fn next_file(&mut self) -> Result<Option<FileRecord>, ParseError> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            match self.xml.read_event_into(&mut self.buf)? {
                Event::Start(ref e) if e.name().as_ref() == b"fileobject" => {
                    self.fileobjects_seen += 1;
                    let record = self.parse_fileobject()?;
                    return Ok(Some(record));
                }
                Event::Eof => {
                    self.done = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Parses the body of one fileobject, from just after its start tag to
    /// its end tag.
    fn parse_fileobject(&mut self) -> Result<FileRecord, ParseError> {
        let mut repository_name: Option<String> = None;
        let mut filename: Option<String> = None;
        let mut filesize: Option<u64> = None;
        let mut file_hash: Option<Vec<u8>> = None;
        let mut blocks: Vec<BlockRecord> = Vec::new();

        // Pending byte_run attributes while we wait for its hashdigest.
        let mut pending_run: Option<(u64, u32)> = None;
        let mut pending_run_hash: Option<Vec<u8>> = None;
        // Which simple text element we are inside, if any.
        let mut text_target: Option<TextTarget> = None;

        loop {
            self.buf.clear();
            let event = self.xml.read_event_into(&mut self.buf)?;
            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"repository_name" => text_target = Some(TextTarget::RepositoryName),
                    b"filename" => text_target = Some(TextTarget::Filename),
                    b"filesize" => text_target = Some(TextTarget::Filesize),
                    b"byte_run" => {
                        self.record_ordinal += 1;
                        let pos = Position::Record(self.record_ordinal);
                        let (offset, len) = parse_byte_run_attrs(e, pos)?;
                        self.check_block_size(len, pos)?;
                        pending_run = Some((offset, len));
                        pending_run_hash = None;
                    }
                    b"hashdigest" => {
                        text_target = Some(if pending_run.is_some() {
                            TextTarget::BlockHash
                        } else {
                            TextTarget::FileHash
                        });
                    }
                    _ => {}
                },
                Event::Empty(ref e) if e.name().as_ref() == b"byte_run" => {
                    // A self-closing byte_run carries no hashdigest.
                    self.record_ordinal += 1;
                    return Err(ParseError::malformed(
                        Position::Record(self.record_ordinal),
                        "byte_run has no hashdigest",
                    ));
                }
                Event::Text(ref t) => {
                    let text = t.unescape()?.into_owned();
                    match text_target {
                        Some(TextTarget::RepositoryName) => repository_name = Some(text),
                        Some(TextTarget::Filename) => filename = Some(text),
                        Some(TextTarget::Filesize) => {
                            let n = text.trim().parse::<u64>().map_err(|_| {
                                self.fileobject_error(format!("bad filesize '{}'", text))
                            })?;
                            filesize = Some(n);
                        }
                        Some(TextTarget::BlockHash) => {
                            let pos = Position::Record(self.record_ordinal);
                            pending_run_hash =
                                Some(decode_digest(&text, self.algorithm, pos, "block hash")?);
                        }
                        Some(TextTarget::FileHash) => {
                            let pos = Position::Record(self.record_ordinal.max(1));
                            file_hash =
                                Some(decode_digest(&text, self.algorithm, pos, "file hash")?);
                        }
                        None => {}
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"byte_run" => {
                        let (offset, block_size) = pending_run.take().ok_or_else(|| {
                            ParseError::malformed(
                                Position::Record(self.record_ordinal.max(1)),
                                "byte_run end without matching start",
                            )
                        })?;
                        let hash = pending_run_hash.take().ok_or_else(|| {
                            ParseError::malformed(
                                Position::Record(self.record_ordinal),
                                "byte_run has no hashdigest",
                            )
                        })?;
                        blocks.push(BlockRecord {
                            offset,
                            block_size,
                            hash,
                        });
                    }
                    b"hashdigest" | b"repository_name" | b"filename" | b"filesize" => {
                        text_target = None;
                    }
                    b"fileobject" => break,
                    _ => {}
                },
                Event::Eof => {
                    return Err(self.fileobject_error("unexpected EOF inside fileobject"));
                }
                _ => {}
            }
        }

        let filename = filename.ok_or_else(|| self.fileobject_error("missing filename"))?;
        let filesize = filesize.ok_or_else(|| self.fileobject_error("missing filesize"))?;

        // Sources without a whole-file hash are identified by their name
        // pair: a keyed hash of (repository_name, filename) at the digest
        // width stands in as the identifying hash, so re-imports of the
        // same named source still resolve to one source_id.
        let repository = repository_name.unwrap_or_default();
        let file_hash = match file_hash {
            Some(h) => h,
            None => derived_identity(&repository, &filename, self.algorithm),
        };

        debug!(
            "parsed fileobject {} ({}, {} blocks)",
            self.fileobjects_seen,
            filename,
            blocks.len()
        );

        Ok(FileRecord {
            source: SourceDescriptor {
                file_hash,
                filesize,
                names: vec![SourceName {
                    repository_name: repository,
                    filename,
                }],
            },
            blocks,
        })
    }

    /// Validates a byte_run length against the block size. The first run of
    /// a list with no established size fixes it; every later run must
    /// match it.
    fn check_block_size(&mut self, len: u32, pos: Position) -> Result<(), ParseError> {
        match self.expected_block_size {
            Some(expected) if len != expected => Err(ParseError::malformed(
                pos,
                format!(
                    "block size {} does not match database block size {}",
                    len, expected
                ),
            )),
            Some(_) => Ok(()),
            None if len == 0 => Err(ParseError::malformed(pos, "block size 0")),
            None => {
                self.expected_block_size = Some(len);
                Ok(())
            }
        }
    }

    fn fileobject_error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::malformed(Position::Record(self.record_ordinal.max(1)), reason)
    }
}

enum TextTarget {
    RepositoryName,
    Filename,
    Filesize,
    BlockHash,
    FileHash,
}

impl<R: BufRead> Iterator for DfxmlReader<R> {
    type Item = Result<FileRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_file() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                // A structural error is not recoverable mid-stream.
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Pulls `file_offset` and `len` off a byte_run start tag.
fn parse_byte_run_attrs(e: &BytesStart<'_>, pos: Position) -> Result<(u64, u32), ParseError> {
    let mut offset: Option<u64> = None;
    let mut len: Option<u32> = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|e| ParseError::malformed(pos, format!("bad attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(ParseError::Xml)?
            .into_owned();
        match attr.key.as_ref() {
            b"file_offset" => {
                offset = Some(value.parse::<u64>().map_err(|_| {
                    ParseError::malformed(pos, format!("bad file_offset '{}'", value))
                })?);
            }
            b"len" => {
                len = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| ParseError::malformed(pos, format!("bad len '{}'", value)))?,
                );
            }
            _ => {}
        }
    }

    let offset = offset.ok_or_else(|| ParseError::malformed(pos, "missing file_offset"))?;
    let len = len.ok_or_else(|| ParseError::malformed(pos, "missing len"))?;
    Ok((offset, len))
}

/// Stable identifying hash for a source that carries no whole-file digest,
/// derived from its provenance name pair and truncated to the digest width.
fn derived_identity(repository_name: &str, filename: &str, algorithm: HashAlgorithm) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(repository_name.as_bytes());
    hasher.update(&[0]);
    hasher.update(filename.as_bytes());
    let mut out = vec![0u8; algorithm.digest_len()];
    hasher.finalize_xof().fill(&mut out);
    out
}
