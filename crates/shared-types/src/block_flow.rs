//! # Block Lifecycle
//!
//! A block moves through the node as one tagged record: where it came from
//! (`BlockSource`) and how far it has progressed (`BlockPhase`). The allowed
//! moves are a per-source transition table checked by [`BlockFlow::advance`].
//!
//! ```text
//! Produced / Network:
//!   Received -> Linked -> Applied -> Irreversible -> Persisted
//!                 ^         |
//!                 +---------+  (reorg undo)
//!
//! Replay (read back from the block log):
//!   Received -> Applied -> Irreversible
//!
//! Any non-terminal phase -> Rejected
//! ```

use serde::{Deserialize, Serialize};

use crate::entities::{BlockHandle, BlockId};
use crate::errors::PhaseTransitionError;

/// Where a block entered the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSource {
    /// Built locally by a producer.
    Produced { producer: String },
    /// Received from a peer.
    Network { peer: String },
    /// Read back from block log part `part`.
    Replay { part: u32 },
}

impl BlockSource {
    pub fn kind(&self) -> BlockSourceKind {
        match self {
            BlockSource::Produced { .. } => BlockSourceKind::Produced,
            BlockSource::Network { .. } => BlockSourceKind::Network,
            BlockSource::Replay { .. } => BlockSourceKind::Replay,
        }
    }
}

/// Discriminant of [`BlockSource`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockSourceKind {
    Produced,
    Network,
    Replay,
}

/// Progress of a block through the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockPhase {
    /// Parsed, not yet placed in the fork database.
    Received,
    /// Linked into the fork database.
    Linked,
    /// State transitions applied on the current main branch.
    Applied,
    /// Past the last irreversible block.
    Irreversible,
    /// Written to the block log.
    Persisted,
    /// Failed validation or fork insertion. Terminal.
    Rejected,
}

impl BlockPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, BlockPhase::Persisted | BlockPhase::Rejected)
    }
}

/// Transition table.
fn is_allowed(kind: BlockSourceKind, from: BlockPhase, to: BlockPhase) -> bool {
    use BlockPhase::*;

    if to == Rejected {
        return !from.is_terminal();
    }

    match kind {
        BlockSourceKind::Produced | BlockSourceKind::Network => matches!(
            (from, to),
            (Received, Linked)
                | (Linked, Applied)
                | (Applied, Linked)
                | (Applied, Irreversible)
                | (Irreversible, Persisted)
        ),
        BlockSourceKind::Replay => {
            matches!((from, to), (Received, Applied) | (Applied, Irreversible))
        }
    }
}

/// A block together with its origin and lifecycle phase.
#[derive(Debug, Clone)]
pub struct BlockFlow {
    block: BlockHandle,
    source: BlockSource,
    phase: BlockPhase,
}

impl BlockFlow {
    /// A freshly received block.
    pub fn new(block: BlockHandle, source: BlockSource) -> Self {
        Self {
            block,
            source,
            phase: BlockPhase::Received,
        }
    }

    pub fn block(&self) -> &BlockHandle {
        &self.block
    }

    pub fn id(&self) -> BlockId {
        self.block.id()
    }

    pub fn block_num(&self) -> u32 {
        self.block.block_num()
    }

    pub fn source(&self) -> &BlockSource {
        &self.source
    }

    pub fn phase(&self) -> BlockPhase {
        self.phase
    }

    /// Move to `next`, validated against the source's transition table.
    pub fn advance(&mut self, next: BlockPhase) -> Result<(), PhaseTransitionError> {
        let kind = self.source.kind();
        if !is_allowed(kind, self.phase, next) {
            return Err(PhaseTransitionError {
                block_num: self.block.block_num(),
                source_kind: kind,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Undo an applied block during a reorg.
    pub fn unapply(&mut self) -> Result<(), PhaseTransitionError> {
        self.advance(BlockPhase::Linked)
    }

    pub fn reject(&mut self) -> Result<(), PhaseTransitionError> {
        self.advance(BlockPhase::Rejected)
    }
}
