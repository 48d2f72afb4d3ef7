//! # Block Log Errors
//!
//! Every failure the block log can report, classified by [`ErrorKind`] so the
//! owning chain layer can decide between regenerate, retry and abort.
//!
//! Expected absence (a block number outside the stored range, a pruned part)
//! is not an error: read paths return `Ok(None)` or a short vector.

use std::io;
use std::path::PathBuf;

use shared_types::BlockDecodeError;
use thiserror::Error;

use super::compression::CompressionError;
use crate::adapters::lock::LockError;

/// Failure class of a [`BlockLogError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// On-disk data is inconsistent. Regenerate when writable, else fail.
    StorageCorruption,
    /// Requested block is outside the addressable range.
    NotFound,
    /// On-disk layout disagrees with the configuration. Operator-fixable.
    ConfigurationConflict,
    /// Operating system I/O failure.
    Io,
    /// Cooperative cancellation was observed.
    Interrupted,
    /// API used in a way its contract forbids.
    Misuse,
}

/// Errors raised by the block log.
#[derive(Debug, Error)]
pub enum BlockLogError {
    #[error("I/O error on {} at offset {offset} ({size} bytes): {source}", path.display())]
    Io {
        path: PathBuf,
        offset: u64,
        size: u64,
        #[source]
        source: io::Error,
    },

    #[error("Storage corruption in {}: {reason}", path.display())]
    StorageCorruption { path: PathBuf, reason: String },

    #[error("Missing artifacts file {} (cannot regenerate in read-only mode)", path.display())]
    MissingArtifacts { path: PathBuf },

    #[error("Configuration conflict: {reason}")]
    ConfigurationConflict { reason: String },

    #[error("Missing block log part #{part_number} ({})", path.display())]
    MissingPart { part_number: u32, path: PathBuf },

    #[error("Broken integrity: part sequence jumps from #{previous} to #{next}")]
    BrokenPartSequence { previous: u32, next: u32 },

    #[error("Block #{block_num} is outside the stored range [{first}, {head}]")]
    OutOfRange { block_num: u32, first: u32, head: u32 },

    #[error("Out-of-order append: expected block #{expected}, got #{actual}")]
    OutOfOrderAppend { expected: u32, actual: u32 },

    #[error("Compression failure: {0}")]
    Compression(#[from] CompressionError),

    #[error("Block #{block_num} failed to decode: {source}")]
    Decode {
        block_num: u32,
        #[source]
        source: BlockDecodeError,
    },

    #[error("Interrupted: {operation} was cancelled")]
    Interrupted { operation: &'static str },

    #[error("Block log is open read-only")]
    ReadOnly,

    #[error("Block log is not open")]
    NotOpen,

    #[error("Block log is already open")]
    AlreadyOpen,

    #[error("Process lock failure: {0}")]
    Lock(#[from] LockError),
}

impl BlockLogError {
    /// Map an `io::Error` at a known file position.
    pub fn io(path: impl Into<PathBuf>, offset: u64, size: u64) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| BlockLogError::Io {
            path,
            offset,
            size,
            source,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BlockLogError::StorageCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        BlockLogError::ConfigurationConflict {
            reason: reason.into(),
        }
    }

    /// Failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockLogError::Io { .. } => ErrorKind::Io,
            BlockLogError::StorageCorruption { .. }
            | BlockLogError::MissingArtifacts { .. }
            | BlockLogError::BrokenPartSequence { .. }
            | BlockLogError::Decode { .. } => ErrorKind::StorageCorruption,
            BlockLogError::Compression(CompressionError::UnknownDictionary(_)) => {
                ErrorKind::ConfigurationConflict
            }
            BlockLogError::Compression(_) => ErrorKind::StorageCorruption,
            BlockLogError::ConfigurationConflict { .. } | BlockLogError::MissingPart { .. } => {
                ErrorKind::ConfigurationConflict
            }
            BlockLogError::OutOfRange { .. } => ErrorKind::NotFound,
            BlockLogError::Interrupted { .. } => ErrorKind::Interrupted,
            BlockLogError::OutOfOrderAppend { .. }
            | BlockLogError::ReadOnly
            | BlockLogError::NotOpen
            | BlockLogError::AlreadyOpen
            | BlockLogError::Lock(_) => ErrorKind::Misuse,
        }
    }

    /// Corruption and configuration failures are never retryable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StorageCorruption | ErrorKind::ConfigurationConflict
        )
    }
}

pub type BlockLogResult<T> = Result<T, BlockLogError>;
