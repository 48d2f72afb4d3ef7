//! # Chain Collaborators
//!
//! Small seams passed explicitly into the storage and fork cores instead of
//! process-wide state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::entities::BlockId;
use crate::errors::ChainSourceError;

/// Cooperative cancellation flag shared between an owner and long-running
/// maintenance work (index regeneration, replay).
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Read access to the irreversible chain, as needed by the fork database's
/// peer-sync queries.
///
/// Implemented by the block log set.
pub trait BlockIdSource {
    /// Highest irreversible block number, 0 when empty.
    fn head_block_num(&self) -> u32;

    /// Id of block `block_num` if it is still stored. Storage failures are
    /// errors, never `None`.
    fn block_id_by_num(&self, block_num: u32) -> Result<Option<BlockId>, ChainSourceError>;
}
