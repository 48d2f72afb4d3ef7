//! # Error Types
//!
//! Errors shared by the block log and the fork database.

use thiserror::Error;

use crate::block_flow::{BlockPhase, BlockSourceKind};

/// Failure to reconstruct a block from its serialized bytes.
#[derive(Debug, Error)]
pub enum BlockDecodeError {
    /// Zero-length buffer.
    #[error("Empty block buffer")]
    Empty,

    /// The bytes are not a valid serialized block.
    #[error("Malformed block encoding: {0}")]
    Malformed(#[from] bincode::Error),
}

/// The irreversible chain could not answer a lookup. Absence is not an
/// error; this is a storage failure behind the lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Irreversible chain lookup for block #{block_num} failed: {reason}")]
pub struct ChainSourceError {
    pub block_num: u32,
    pub reason: String,
}

/// A block lifecycle transition that is not permitted for its source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid block phase transition for {source_kind:?} block #{block_num}: {from:?} -> {to:?}")]
pub struct PhaseTransitionError {
    pub block_num: u32,
    pub source_kind: BlockSourceKind,
    pub from: BlockPhase,
    pub to: BlockPhase,
}
