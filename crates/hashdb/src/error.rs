use digestlist::ParseError;
use registry::RegistryError;
use std::io;
use thiserror::Error;

/// Errors surfaced by the database facade.
#[derive(Debug, Error)]
pub enum DbError {
    /// A digest-list record failed to parse (bad hex, wrong digest width,
    /// missing fields, broken XML/JSON). Carries the input position.
    #[error("invalid input: {0}")]
    Parse(#[from] ParseError),

    /// The input disagrees with the database's fixed configuration
    /// (algorithm or block size).
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// The same identifying file hash was presented with inconsistent
    /// source metadata.
    #[error("{0}")]
    SourceConflict(String),

    /// Merging a database into itself.
    #[error("source and target are the same database: {0}")]
    SelfMerge(String),

    /// Another writer holds the database lock.
    #[error("database is locked by another writer: {0}")]
    Locked(String),

    /// On-disk state failed validation.
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Storage engine failure.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<RegistryError> for DbError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Conflict { .. } => DbError::SourceConflict(e.to_string()),
            RegistryError::Io(io) => DbError::Io(io),
            RegistryError::Corrupt(s) => DbError::Corrupt(s),
        }
    }
}
