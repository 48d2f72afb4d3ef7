//! # Head Selection Policy
//!
//! The head is the viable tip with the greatest block number. Among tips
//! of equal height the choice is delegated to a [`TieBreaker`].

use std::fmt::Debug;

use super::fork_item::ForkItem;

/// Decides between two viable tips at the same height.
pub trait TieBreaker: Send + Sync + Debug {
    /// Whether `candidate` should replace `incumbent`.
    fn prefer(&self, candidate: &ForkItem, incumbent: &ForkItem) -> bool;
}

/// Keeps whichever tip arrived first.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstSeen;

impl TieBreaker for FirstSeen {
    fn prefer(&self, _candidate: &ForkItem, _incumbent: &ForkItem) -> bool {
        false
    }
}

/// Prefers the numerically lowest block id, so every node picks the same
/// tip regardless of arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowestBlockId;

impl TieBreaker for LowestBlockId {
    fn prefer(&self, candidate: &ForkItem, incumbent: &ForkItem) -> bool {
        candidate.block_id() < incumbent.block_id()
    }
}
