//! Error types for the fork database

use shared_types::{BlockId, ChainSourceError};

/// Fork database error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkDbError {
    /// Read lock not acquired within the caller's deadline. Retryable.
    #[error("Fork database lock unavailable after {waited_ms}ms")]
    LockTimeout { waited_ms: u64 },

    /// Too far ahead of the head to ever link. The source should be dropped.
    #[error("Unreachable fork: block #{block_num} is more than {reorder_depth} blocks ahead of head #{head_num} and does not link")]
    UnreachableFork {
        block_num: u32,
        head_num: u32,
        reorder_depth: u32,
    },

    #[error("Block #{block_num} is too old (fork database keeps blocks above #{min_block_num})")]
    BlockTooOld { block_num: u32, min_block_num: u32 },

    #[error("Block {0:?} builds on an invalid block")]
    InvalidAncestor(BlockId),

    #[error("Unknown block {0:?}")]
    UnknownBlock(BlockId),

    /// A parent link points at a block that has been evicted.
    #[error("Branch through {0:?} is broken (ancestor evicted)")]
    BrokenBranch(BlockId),

    #[error("Fork database is empty")]
    EmptyForkDatabase,

    #[error("Blocks {first:?} and {second:?} share no common ancestor")]
    NoCommonBlock { first: BlockId, second: BlockId },

    /// Neither the irreversible chain nor the fork tree holds a main-branch
    /// block at this height.
    #[error("No main-branch block at #{0}")]
    NotOnMainBranch(u32),

    /// No entry of a peer's synopsis is on our chain.
    #[error("None of the {synopsis_len} synopsis blocks are on our chain")]
    SynopsisUnreachable { synopsis_len: usize },

    /// The irreversible chain behind a query failed to read.
    #[error(transparent)]
    ChainSource(#[from] ChainSourceError),
}

impl ForkDbError {
    /// Whether the failure is about the offending source rather than local
    /// state.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            ForkDbError::UnreachableFork { .. }
                | ForkDbError::InvalidAncestor(_)
                | ForkDbError::SynopsisUnreachable { .. }
        )
    }
}

pub type ForkDbResult<T> = Result<T, ForkDbError>;
