//! Line-oriented JSON digest-list parser.
//!
//! Each non-empty line holds one JSON object. Lines starting with `#` are
//! comments. The object's fields identify the record kind:
//!
//! - `block_hash` present: a block occurrence
//!   (`{"block_hash": hex, "file_hash": hex, "file_offset": N}`)
//! - `filesize` present: source data (`{"file_hash": hex, "filesize": N}`)
//! - `filename` present: a source name
//!   (`{"file_hash": hex, "repository_name": s, "filename": s}`)

use registry::SourceName;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::{decode_digest, HashAlgorithm, ParseError, Position};

/// One decoded line of a JSON digest-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRecord {
    /// A single block occurrence in a source.
    BlockHash {
        block_hash: Vec<u8>,
        file_hash: Vec<u8>,
        file_offset: u64,
    },
    /// Size data for a source.
    SourceData { file_hash: Vec<u8>, filesize: u64 },
    /// A provenance name for a source.
    SourceName {
        file_hash: Vec<u8>,
        name: SourceName,
    },
}

/// Streaming reader over a JSON-lines digest-list.
///
/// Implements `Iterator<Item = Result<(Position, JsonRecord), ParseError>>`;
/// the position is the 1-based line number, carried alongside so the
/// pipeline can report which line a record came from under its skip policy.
pub struct JsonLinesReader<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
    algorithm: HashAlgorithm,
}

impl JsonLinesReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, algorithm: HashAlgorithm) -> Result<Self, ParseError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(BufReader::new(file), algorithm))
    }
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn from_reader(reader: R, algorithm: HashAlgorithm) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            algorithm,
        }
    }

    /// Reads forward to the next record line, skipping comments and blanks.
    pub fn next_record(&mut self) -> Result<Option<(Position, JsonRecord)>, ParseError> {
        loop {
            let line = match self.lines.next() {
                Some(line) => line?,
                None => return Ok(None),
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let pos = Position::Line(self.line_no);
            let record = self.parse_line(trimmed, pos)?;
            return Ok(Some((pos, record)));
        }
    }

    fn parse_line(&self, line: &str, pos: Position) -> Result<JsonRecord, ParseError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ParseError::malformed(pos, format!("bad json: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ParseError::malformed(pos, "line is not a json object"))?;

        let file_hash = obj
            .get("file_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::malformed(pos, "missing file_hash"))?;
        let file_hash = decode_digest(file_hash, self.algorithm, pos, "file_hash")?;

        if let Some(block_hash) = obj.get("block_hash") {
            let block_hash = block_hash
                .as_str()
                .ok_or_else(|| ParseError::malformed(pos, "block_hash is not a string"))?;
            let block_hash = decode_digest(block_hash, self.algorithm, pos, "block_hash")?;
            let file_offset = obj
                .get("file_offset")
                .and_then(Value::as_u64)
                .ok_or_else(|| ParseError::malformed(pos, "missing file_offset"))?;
            return Ok(JsonRecord::BlockHash {
                block_hash,
                file_hash,
                file_offset,
            });
        }

        if let Some(filesize) = obj.get("filesize") {
            let filesize = filesize
                .as_u64()
                .ok_or_else(|| ParseError::malformed(pos, "filesize is not an integer"))?;
            return Ok(JsonRecord::SourceData {
                file_hash,
                filesize,
            });
        }

        if let Some(filename) = obj.get("filename") {
            let filename = filename
                .as_str()
                .ok_or_else(|| ParseError::malformed(pos, "filename is not a string"))?
                .to_string();
            let repository_name = obj
                .get("repository_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(JsonRecord::SourceName {
                file_hash,
                name: SourceName {
                    repository_name,
                    filename,
                },
            });
        }

        Err(ParseError::malformed(
            pos,
            "object is none of block-hash, source-data, source-name",
        ))
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<(Position, JsonRecord), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
