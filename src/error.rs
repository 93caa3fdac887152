//! Error and warning types for compound file parsing and writing.
//!
//! Fatal conditions are reported through [`CfbError`]; recoverable oddities in
//! the input (a truncated final sector, trailing bytes) are accumulated as
//! [`Warning`] values on the open session instead of going through a global
//! logger.

use thiserror::Error;

/// Result type alias for compound file operations
pub type Result<T> = std::result::Result<T, CfbError>;

/// Errors that can occur while reading or writing a compound file
#[derive(Error, Debug)]
pub enum CfbError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format (bad signature, byte-order mark, sector shift)
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid data encountered while assembling or validating sectors
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A sector chain violates the allocation-table invariants.
    ///
    /// `sector` is the offending sector and `origin` the first sector of the
    /// chain being resolved, so callers can tell which stream or table the
    /// corruption belongs to.
    #[error("Corrupted chain starting at sector {origin}: {fault} (sector {sector})")]
    ChainCorruption {
        /// Offending sector index
        sector: u32,
        /// First sector of the chain being resolved
        origin: u32,
        /// What went wrong at `sector`
        fault: ChainFault,
    },

    /// Programming-contract violation (double bind, release of a free sector)
    #[error("State error: {0}")]
    State(&'static str),

    /// Stream not found
    #[error("Stream not found")]
    StreamNotFound,

    /// The entry at the given path is not a stream
    #[error("Not a stream")]
    NotStream,

    /// The entry at the given path is not a storage
    #[error("Not a storage")]
    NotStorage,

    /// Storage still has children; remove them first
    #[error("Storage is not empty")]
    StorageNotEmpty,
}

/// The specific invariant a corrupted chain violated
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFault {
    /// The chain revisits one of its own sectors
    #[error("chain loops back on itself")]
    Loop,
    /// A sector index is outside the store or allocation table
    #[error("sector index out of range")]
    OutOfRange,
    /// The chain walks onto an allocation- or extension-table sector
    #[error("chain enters a reserved table sector")]
    Reserved,
    /// The chain walks onto a sector already claimed by another chain
    #[error("sector already claimed by another chain")]
    AlreadyClaimed,
    /// The chain ends on a free sector instead of the end-of-chain sentinel
    #[error("chain ends on a free sector")]
    PrematureEnd,
}

/// Non-fatal conditions noticed while ingesting a container.
///
/// Warnings never abort processing; they are collected on the open session
/// and exposed through `CfbFile::warnings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The final sector is shorter than the declared sector size. Produced by
    /// non-conformant writers that do not pad the last sector; the short
    /// sector's actual bytes are used as-is.
    TruncatedSector {
        /// Index of the short sector
        index: u32,
        /// Bytes actually present
        actual: usize,
        /// Declared sector size
        expected: usize,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::TruncatedSector {
                index,
                actual,
                expected,
            } => write!(
                f,
                "sector {} is truncated: {} of {} bytes",
                index, actual, expected
            ),
        }
    }
}
