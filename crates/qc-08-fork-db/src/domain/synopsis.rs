//! # Chain View and Sync Synopsis
//!
//! Joins the irreversible chain (the block log, seen through
//! [`BlockIdSource`]) with the reversible fork tree above it, and answers
//! the peer-sync queries over the combined chain.
//!
//! A synopsis samples block ids from the last irreversible block towards
//! the head, halving the distance at every step, so two peers find their
//! common prefix in O(log N) round trips.

use shared_types::{BlockId, BlockIdSource};
use tracing::{debug, warn};

use super::errors::{ForkDbError, ForkDbResult};
use super::fork_tree::ForkTree;

/// Irreversible chain plus fork tree, borrowed for one query.
pub struct ChainView<'a> {
    tree: &'a ForkTree,
    irreversible: &'a dyn BlockIdSource,
}

impl<'a> ChainView<'a> {
    pub fn new(tree: &'a ForkTree, irreversible: &'a dyn BlockIdSource) -> Self {
        Self { tree, irreversible }
    }

    /// Last irreversible block number.
    pub fn last_irreversible_block_num(&self) -> u32 {
        self.irreversible.head_block_num()
    }

    pub fn head_block_num(&self) -> u32 {
        self.tree
            .head_block_num()
            .max(self.last_irreversible_block_num())
    }

    /// Main-chain id at `block_num`: the irreversible chain up to its head,
    /// the fork tree's main branch above it.
    pub fn block_id_for_num(&self, block_num: u32) -> ForkDbResult<Option<BlockId>> {
        if block_num == 0 {
            return Ok(None);
        }
        if block_num <= self.last_irreversible_block_num() {
            Ok(self.irreversible.block_id_by_num(block_num)?)
        } else {
            Ok(self
                .tree
                .fetch_block_on_main_branch_by_number(block_num)
                .map(|block| block.id()))
        }
    }

    fn require_block_id_for_num(&self, block_num: u32) -> ForkDbResult<BlockId> {
        self.block_id_for_num(block_num)?
            .ok_or(ForkDbError::NotOnMainBranch(block_num))
    }

    /// Known anywhere: in the fork tree (linked or not) or on the
    /// irreversible chain.
    pub fn is_known_block(&self, block_id: &BlockId) -> ForkDbResult<bool> {
        if self.tree.is_known_block(block_id) {
            return Ok(true);
        }
        if block_id.num() > self.last_irreversible_block_num() {
            return Ok(false);
        }
        Ok(self.irreversible.block_id_by_num(block_id.num())? == Some(*block_id))
    }

    /// On the main chain.
    pub fn is_included_block(&self, block_id: &BlockId) -> ForkDbResult<bool> {
        Ok(self.block_id_for_num(block_id.num())? == Some(*block_id))
    }

    /// Ids from `fork_head` back to the main chain: the fork's blocks tip
    /// first, then the common ancestor.
    pub fn block_ids_on_fork(&self, fork_head: BlockId) -> ForkDbResult<Vec<BlockId>> {
        let head_id = self
            .tree
            .head_block_id()
            .ok_or(ForkDbError::EmptyForkDatabase)?;
        let (_, fork_branch) = self.tree.fetch_branch_from(head_id, fork_head)?;
        let ancestor = fork_branch
            .last()
            .map(|block| block.previous_id())
            .ok_or(ForkDbError::UnknownBlock(fork_head))?;

        let mut ids: Vec<BlockId> = fork_branch.iter().map(|block| block.id()).collect();
        ids.push(ancestor);
        Ok(ids)
    }

    /// First id we do not know, if any.
    pub fn find_first_item_not_in_blockchain(
        &self,
        item_ids: &[BlockId],
    ) -> ForkDbResult<Option<BlockId>> {
        for id in item_ids {
            if !self.is_known_block(id)? {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    /// Sparse sample of our chain for a peer.
    ///
    /// With no `reference_point` the whole chain up to the head is
    /// summarized. With one, the summary ends at it, following its fork
    /// when it is not on the main chain. `blocks_after` is how many more
    /// blocks the caller already knows past the reference point; it widens
    /// the spacing.
    pub fn get_blockchain_synopsis(
        &self,
        reference_point: Option<BlockId>,
        blocks_after: u32,
    ) -> ForkDbResult<Vec<BlockId>> {
        let mut low = self.last_irreversible_block_num();
        let high;
        let non_fork_high;
        let mut fork_history: Vec<BlockId> = Vec::new();

        match reference_point {
            Some(reference) if self.is_included_block(&reference)? => {
                high = reference.num();
                non_fork_high = high;
                if high < low {
                    low = high;
                }
            }
            Some(reference) => {
                fork_history = self.block_ids_on_fork(reference)?;
                let ancestor = fork_history.pop().unwrap_or(BlockId::ZERO);
                fork_history.reverse();

                non_fork_high = ancestor.num();
                high = non_fork_high.saturating_add(fork_history.len() as u32);
                if non_fork_high < low {
                    warn!(
                        "[qc-08] Fork of {} diverges at #{}, below irreversible #{}",
                        reference, non_fork_high, low
                    );
                    return Err(ForkDbError::BlockTooOld {
                        block_num: non_fork_high,
                        min_block_num: low,
                    });
                }
            }
            None => {
                high = self.head_block_num();
                non_fork_high = high;
                if high == 0 {
                    return Ok(Vec::new());
                }
            }
        }

        if low == 0 {
            low = 1;
        }

        let true_high = high.saturating_add(blocks_after);
        let mut synopsis = Vec::new();
        loop {
            let id = if low <= non_fork_high {
                self.require_block_id_for_num(low)?
            } else {
                let index = (low - non_fork_high - 1) as usize;
                fork_history
                    .get(index)
                    .copied()
                    .ok_or(ForkDbError::NotOnMainBranch(low))?
            };
            synopsis.push(id);

            let step = true_high.saturating_sub(low) / 2 + 1;
            match low.checked_add(step) {
                Some(next) if next <= high => low = next,
                _ => break,
            }
        }

        debug!(
            "[qc-08] Synopsis of {} ids up to #{}",
            synopsis.len(),
            high
        );
        Ok(synopsis)
    }

    /// Main-chain ids following the newest synopsis entry we share, at most
    /// `limit` of them, plus the count still left after those.
    ///
    /// The shared entry itself is the first id returned. An empty synopsis
    /// (or one holding only the zero id) means the peer has no blocks.
    pub fn get_block_ids(
        &self,
        synopsis: &[BlockId],
        limit: u32,
    ) -> ForkDbResult<(Vec<BlockId>, u32)> {
        let head = self.head_block_num();
        if head == 0 {
            return Ok((Vec::new(), 0));
        }

        let peer_is_empty = synopsis.is_empty() || (synopsis.len() == 1 && synopsis[0].is_zero());
        let last_known = if peer_is_empty {
            BlockId::ZERO
        } else {
            let mut shared = None;
            for id in synopsis.iter().rev() {
                if id.is_zero() || (self.is_known_block(id)? && self.is_included_block(id)?) {
                    shared = Some(*id);
                    break;
                }
            }
            shared.ok_or(ForkDbError::SynopsisUnreachable {
                synopsis_len: synopsis.len(),
            })?
        };

        let mut ids = Vec::new();
        let mut num = last_known.num();
        while num <= head && ids.len() < limit as usize {
            if num > 0 {
                ids.push(self.require_block_id_for_num(num)?);
            }
            num += 1;
        }

        let remaining = ids
            .last()
            .map_or(0, |last| head.saturating_sub(last.num()));
        Ok((ids, remaining))
    }
}
