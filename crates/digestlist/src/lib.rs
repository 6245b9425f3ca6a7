//! # Digest-list parsing
//!
//! Streaming parsers for the two external digest-list formats Cairn
//! ingests. Parsers never touch the database — they produce a lazy sequence
//! of validated records for the import pipeline to consume, and can be
//! tested against hand-built inputs on their own.
//!
//! - [`DfxmlReader`] — the XML digest-list format produced by block-hashing
//!   tools: one `<fileobject>` per source with `<byte_run>` children
//!   carrying per-block digests.
//! - [`JsonLinesReader`] — the line-oriented JSON interchange format
//!   (also what the database export writes): one object per line, identified
//!   by its fields as block-hash data, source data, or a source name.
//!
//! Both parsers are restartable from the start (reopen the file), not from
//! the middle of a stream. Malformed records are reported as [`ParseError`]
//! values tagged with a position; whether that aborts the whole import is
//! the pipeline's policy, not the parser's.

mod dfxml;
mod json;

pub use dfxml::{BlockRecord, DfxmlReader, FileRecord};
pub use json::{JsonLinesReader, JsonRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Digest algorithm configured per database at creation time.
///
/// Treated as an opaque fixed-width digest: the only property the engine
/// relies on is the output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Digest width in bytes.
    #[must_use]
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Parses an algorithm name as it appears in digest-list `type`
    /// attributes and CLI arguments (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(HashAlgorithm::Md5),
            "sha1" | "sha-1" => Some(HashAlgorithm::Sha1),
            "sha256" | "sha-256" => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Sha1 => write!(f, "sha1"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Where in the input a malformed record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// 1-based line number (JSON lines input).
    Line(usize),
    /// 1-based block-record ordinal across the whole list (DFXML input).
    Record(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Line(n) => write!(f, "line {}", n),
            Position::Record(n) => write!(f, "record {}", n),
        }
    }
}

/// Errors produced while reading a digest-list.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A record is missing required data or carries data that does not
    /// validate (bad hex, wrong digest width, missing offset).
    #[error("{position}: {reason}")]
    Malformed { position: Position, reason: String },

    /// The XML structure itself is broken.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    pub(crate) fn malformed(position: Position, reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            position,
            reason: reason.into(),
        }
    }

    /// The input position of a malformed record, if this error carries one.
    pub fn position(&self) -> Option<Position> {
        match self {
            ParseError::Malformed { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Decodes a hex digest and validates its width against the configured
/// algorithm.
pub(crate) fn decode_digest(
    hexstr: &str,
    algorithm: HashAlgorithm,
    position: Position,
    what: &str,
) -> Result<Vec<u8>, ParseError> {
    let bytes = hex::decode(hexstr.trim())
        .map_err(|e| ParseError::malformed(position, format!("bad {} hex: {}", what, e)))?;
    if bytes.len() != algorithm.digest_len() {
        return Err(ParseError::malformed(
            position,
            format!(
                "{} is {} bytes, expected {} for {}",
                what,
                bytes.len(),
                algorithm.digest_len(),
                algorithm
            ),
        ));
    }
    Ok(bytes)
}
