//! # Fork Tree
//!
//! Arena of candidate blocks above the irreversible chain.
//!
//! Items live in a map keyed by a stable [`ItemId`] and reference their
//! parent by id, so an evicted ancestor shows up as a failed lookup
//! ([`ForkDbError::BrokenBranch`]) instead of a dangling pointer. Blocks
//! whose parent has not arrived yet are held unlinked until it does.
//!
//! ## Indexes
//!
//! | Index | Key | Covers |
//! |-------|-----|--------|
//! | `by_block_id` | block id | every item |
//! | `children` | previous id | every item, linked or not |
//! | `by_number` | block number | every item, arrival order per height |
//!
//! ## Head Selection
//!
//! The head is the linked, valid item with the greatest block number. Equal
//! heights go to the configured [`TieBreaker`].

use std::collections::{BTreeMap, HashMap, VecDeque};

use shared_types::{BlockHandle, BlockId};
use tracing::{debug, info, warn};

use super::errors::{ForkDbError, ForkDbResult};
use super::fork_item::{ForkItem, ItemId};
use super::head_policy::{FirstSeen, TieBreaker};
use crate::config::{DEFAULT_MAX_SIZE, DEFAULT_REORDER_DEPTH};

/// How a pushed block was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Connected to the tree. Counts the block itself plus any waiting
    /// descendants it connected.
    Linked { newly_linked: usize },
    /// Held until its parent arrives.
    Unlinked,
    AlreadyKnown,
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub status: PushStatus,
    pub head: Option<BlockHandle>,
    pub head_changed: bool,
}

/// Direct-access fork tree. Not synchronized; see
/// [`ForkDatabase`](crate::ForkDatabase) for the locked wrapper.
#[derive(Debug)]
pub struct ForkTree {
    items: HashMap<ItemId, ForkItem>,
    by_block_id: HashMap<BlockId, ItemId>,
    children: HashMap<BlockId, Vec<ItemId>>,
    by_number: BTreeMap<u32, Vec<ItemId>>,
    head: Option<ItemId>,
    next_item: u64,
    max_size: u32,
    reorder_depth: u32,
    tie_breaker: Box<dyn TieBreaker>,
}

impl Default for ForkTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_REORDER_DEPTH)
    }
}

impl ForkTree {
    pub fn new(max_size: u32, reorder_depth: u32) -> Self {
        Self::with_tie_breaker(max_size, reorder_depth, Box::new(FirstSeen))
    }

    pub fn with_tie_breaker(
        max_size: u32,
        reorder_depth: u32,
        tie_breaker: Box<dyn TieBreaker>,
    ) -> Self {
        Self {
            items: HashMap::new(),
            by_block_id: HashMap::new(),
            children: HashMap::new(),
            by_number: BTreeMap::new(),
            head: None,
            next_item: 0,
            max_size: max_size.max(1),
            reorder_depth,
            tie_breaker,
        }
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Insert a block and update the head.
    ///
    /// The first block pushed into an empty tree becomes its root.
    /// Re-pushing a known id changes nothing.
    pub fn push_block(&mut self, block: BlockHandle) -> ForkDbResult<PushOutcome> {
        let block_id = block.id();
        let block_num = block.block_num();
        let previous_id = block.previous_id();

        if self.by_block_id.contains_key(&block_id) {
            debug!("[qc-08] Block #{} {} already known", block_num, block_id);
            return Ok(PushOutcome {
                status: PushStatus::AlreadyKnown,
                head: self.head(),
                head_changed: false,
            });
        }

        let parent = self.by_block_id.get(&previous_id).copied();
        let parent_item = parent.and_then(|id| self.items.get(&id));
        if parent_item.is_some_and(|p| p.invalid) {
            return Err(ForkDbError::InvalidAncestor(block_id));
        }

        let linked = match self.head_item() {
            None => parent_item.map_or(true, |p| p.linked),
            Some(head) => {
                let head_num = head.block_num();
                let min_block_num = head_num.saturating_sub(self.max_size);
                if block_num <= min_block_num {
                    return Err(ForkDbError::BlockTooOld {
                        block_num,
                        min_block_num,
                    });
                }
                match parent_item {
                    Some(p) => p.linked,
                    None if block_num > head_num.saturating_add(self.reorder_depth) => {
                        return Err(ForkDbError::UnreachableFork {
                            block_num,
                            head_num,
                            reorder_depth: self.reorder_depth,
                        });
                    }
                    None => false,
                }
            }
        };

        let item_id = ItemId(self.next_item);
        self.next_item += 1;
        self.items.insert(
            item_id,
            ForkItem {
                id: item_id,
                block,
                parent,
                invalid: false,
                linked,
            },
        );
        self.by_block_id.insert(block_id, item_id);
        self.children.entry(previous_id).or_default().push(item_id);
        self.by_number.entry(block_num).or_default().push(item_id);

        // Adopt children that arrived first
        if let Some(waiting) = self.children.get(&block_id) {
            for child in waiting {
                if let Some(child) = self.items.get_mut(child) {
                    child.parent = Some(item_id);
                }
            }
        }

        if !linked {
            debug!(
                "[qc-08] Holding block #{} {} until {} arrives",
                block_num, block_id, previous_id
            );
            return Ok(PushOutcome {
                status: PushStatus::Unlinked,
                head: self.head(),
                head_changed: false,
            });
        }

        let newly_linked = self.link_descendants(item_id);
        let previous_head = self.head;
        for id in &newly_linked {
            self.consider_head(*id);
        }
        let head_changed = self.head != previous_head;

        if head_changed {
            self.log_head_switch(previous_head);
            self.prune_old();
        }

        Ok(PushOutcome {
            status: PushStatus::Linked {
                newly_linked: newly_linked.len(),
            },
            head: self.head(),
            head_changed,
        })
    }

    /// Evict a block and every known descendant. Returns the evicted blocks.
    pub fn remove(&mut self, block_id: BlockId) -> ForkDbResult<Vec<BlockHandle>> {
        let root = self.item_id_of(block_id)?;
        let removed: Vec<BlockHandle> = self
            .collect_subtree(root)
            .into_iter()
            .filter_map(|id| self.evict(id))
            .map(|item| item.block)
            .collect();

        if self.head.is_none() && !self.items.is_empty() {
            self.recompute_head();
        }
        info!(
            "[qc-08] Removed {} blocks rooted at {}",
            removed.len(),
            block_id
        );
        Ok(removed)
    }

    /// Flag a block and its descendants invalid. Future children of any of
    /// them are rejected with [`ForkDbError::InvalidAncestor`].
    pub fn mark_invalid(&mut self, block_id: BlockId) -> ForkDbResult<usize> {
        let root = self.item_id_of(block_id)?;
        let subtree = self.collect_subtree(root);
        for id in &subtree {
            if let Some(item) = self.items.get_mut(id) {
                item.invalid = true;
            }
        }

        if self.head.is_some_and(|h| subtree.contains(&h)) {
            self.recompute_head();
        }
        warn!(
            "[qc-08] Marked {} blocks invalid from {}",
            subtree.len(),
            block_id
        );
        Ok(subtree.len())
    }

    /// Step the head back to its parent. The popped block stays in the tree.
    pub fn pop_block(&mut self) -> ForkDbResult<BlockHandle> {
        let head = self.head_item().ok_or(ForkDbError::EmptyForkDatabase)?;
        let parent = head
            .parent
            .and_then(|p| self.items.get(&p))
            .ok_or(ForkDbError::EmptyForkDatabase)?;

        let popped = head.block.clone();
        let parent_id = parent.id;
        self.head = Some(parent_id);
        debug!("[qc-08] Popped block #{}", popped.block_num());
        Ok(popped)
    }

    /// Force the head onto a linked, valid block.
    ///
    /// An unlinked block is reported as [`ForkDbError::UnknownBlock`].
    pub fn set_head(&mut self, block_id: BlockId) -> ForkDbResult<()> {
        let item = self
            .fetch_item(&block_id)
            .ok_or(ForkDbError::UnknownBlock(block_id))?;
        if item.invalid {
            return Err(ForkDbError::InvalidAncestor(block_id));
        }
        if !item.linked {
            return Err(ForkDbError::UnknownBlock(block_id));
        }
        let item_id = item.id;
        self.head = Some(item_id);
        Ok(())
    }

    /// Drop every item.
    pub fn reset(&mut self) {
        self.items.clear();
        self.by_block_id.clear();
        self.children.clear();
        self.by_number.clear();
        self.head = None;
    }

    /// Reset and seed the tree with `block` as root and head.
    pub fn start_block(&mut self, block: BlockHandle) {
        self.reset();
        info!(
            "[qc-08] Fork database rooted at #{} {}",
            block.block_num(),
            block.id()
        );
        let item_id = ItemId(self.next_item);
        self.next_item += 1;
        self.by_block_id.insert(block.id(), item_id);
        self.children
            .entry(block.previous_id())
            .or_default()
            .push(item_id);
        self.by_number
            .entry(block.block_num())
            .or_default()
            .push(item_id);
        self.items.insert(
            item_id,
            ForkItem {
                id: item_id,
                block,
                parent: None,
                invalid: false,
                linked: true,
            },
        );
        self.head = Some(item_id);
    }

    /// Change the retention window and evict what falls outside it.
    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size.max(1);
        self.prune_old();
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn head(&self) -> Option<BlockHandle> {
        self.head_item().map(|item| item.block.clone())
    }

    pub fn head_item(&self) -> Option<&ForkItem> {
        self.head.and_then(|id| self.items.get(&id))
    }

    /// 0 when the tree is empty.
    pub fn head_block_num(&self) -> u32 {
        self.head_item().map_or(0, |item| item.block_num())
    }

    pub fn head_block_id(&self) -> Option<BlockId> {
        self.head_item().map(|item| item.block_id())
    }

    /// Linked or unlinked.
    pub fn fetch_block(&self, block_id: &BlockId) -> Option<BlockHandle> {
        self.fetch_item(block_id).map(|item| item.block.clone())
    }

    pub fn fetch_item(&self, block_id: &BlockId) -> Option<&ForkItem> {
        self.by_block_id
            .get(block_id)
            .and_then(|id| self.items.get(id))
    }

    /// Every linked block at `block_num`, in arrival order.
    pub fn fetch_block_by_number(&self, block_num: u32) -> Vec<BlockHandle> {
        self.linked_at(block_num)
            .map(|item| item.block.clone())
            .collect()
    }

    /// The block at `block_num` on the branch ending at the head.
    pub fn fetch_block_on_main_branch_by_number(&self, block_num: u32) -> Option<BlockHandle> {
        let head = self.head_item()?;
        if block_num > head.block_num() {
            return None;
        }

        let mut candidates = self.linked_at(block_num);
        let first = candidates.next()?;
        if candidates.next().is_none() {
            return Some(first.block.clone());
        }

        let mut current = head;
        while current.block_num() > block_num {
            current = self.parent_of(current).ok().flatten()?;
        }
        Some(current.block.clone())
    }

    /// Main-branch blocks from `from_block_num` up to the head, ascending.
    ///
    /// Starts at the tree root when `from_block_num` is below it. Fails with
    /// [`ForkDbError::BrokenBranch`] when the branch was evicted above
    /// `from_block_num`.
    pub fn main_branch_from(&self, from_block_num: u32) -> ForkDbResult<Vec<BlockHandle>> {
        let Some(mut current) = self.head_item() else {
            return Ok(Vec::new());
        };

        let mut branch = Vec::new();
        while current.block_num() >= from_block_num {
            branch.push(current.block.clone());
            if current.block_num() == from_block_num {
                break;
            }
            match self.parent_of(current)? {
                Some(parent) => current = parent,
                None => break,
            }
        }
        branch.reverse();
        Ok(branch)
    }

    /// The two branches leading from `first` and `second` back to their
    /// most recent common ancestor, tip first, ancestor excluded.
    ///
    /// Undo the first branch and apply the second (reversed) to switch
    /// forks.
    pub fn fetch_branch_from(
        &self,
        first: BlockId,
        second: BlockId,
    ) -> ForkDbResult<(Vec<BlockHandle>, Vec<BlockHandle>)> {
        let no_common = ForkDbError::NoCommonBlock { first, second };
        let mut a = self
            .fetch_item(&first)
            .ok_or(ForkDbError::UnknownBlock(first))?;
        let mut b = self
            .fetch_item(&second)
            .ok_or(ForkDbError::UnknownBlock(second))?;

        let mut branch_a = Vec::new();
        let mut branch_b = Vec::new();

        while a.block_num() > b.block_num() {
            branch_a.push(a.block.clone());
            a = self.parent_of(a)?.ok_or_else(|| no_common.clone())?;
        }
        while b.block_num() > a.block_num() {
            branch_b.push(b.block.clone());
            b = self.parent_of(b)?.ok_or_else(|| no_common.clone())?;
        }
        while a.id != b.id {
            branch_a.push(a.block.clone());
            branch_b.push(b.block.clone());
            a = self.parent_of(a)?.ok_or_else(|| no_common.clone())?;
            b = self.parent_of(b)?.ok_or_else(|| no_common.clone())?;
        }

        Ok((branch_a, branch_b))
    }

    /// Linked or unlinked.
    pub fn is_known_block(&self, block_id: &BlockId) -> bool {
        self.by_block_id.contains_key(block_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unlinked_len(&self) -> usize {
        self.items.values().filter(|item| !item.linked).count()
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn reorder_depth(&self) -> u32 {
        self.reorder_depth
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn item_id_of(&self, block_id: BlockId) -> ForkDbResult<ItemId> {
        self.by_block_id
            .get(&block_id)
            .copied()
            .ok_or(ForkDbError::UnknownBlock(block_id))
    }

    fn linked_at(&self, block_num: u32) -> impl Iterator<Item = &ForkItem> {
        self.by_number
            .get(&block_num)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
            .filter(|item| item.linked)
    }

    /// `Ok(None)` at a root, `BrokenBranch` when the parent was evicted.
    fn parent_of(&self, item: &ForkItem) -> ForkDbResult<Option<&ForkItem>> {
        match item.parent {
            None => Ok(None),
            Some(parent) => self
                .items
                .get(&parent)
                .map(Some)
                .ok_or(ForkDbError::BrokenBranch(item.block_id())),
        }
    }

    /// Link the unlinked descendants of `root`. Returns `root` followed by
    /// each newly linked item, breadth first.
    fn link_descendants(&mut self, root: ItemId) -> Vec<ItemId> {
        let mut linked = vec![root];
        let mut queue = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            let Some(item) = self.items.get(&current) else {
                continue;
            };
            let (current_block_id, current_invalid) = (item.block_id(), item.invalid);
            let Some(children) = self.children.get(&current_block_id) else {
                continue;
            };
            for child_id in children {
                if let Some(child) = self.items.get_mut(child_id) {
                    if !child.linked {
                        child.linked = true;
                        child.invalid |= current_invalid;
                        linked.push(*child_id);
                        queue.push_back(*child_id);
                    }
                }
            }
        }
        linked
    }

    fn collect_subtree(&self, root: ItemId) -> Vec<ItemId> {
        let mut subtree = vec![root];
        let mut cursor = 0;
        while cursor < subtree.len() {
            let current = subtree[cursor];
            cursor += 1;
            if let Some(item) = self.items.get(&current) {
                if let Some(children) = self.children.get(&item.block_id()) {
                    subtree.extend(children.iter().copied());
                }
            }
        }
        subtree
    }

    fn consider_head(&mut self, candidate_id: ItemId) {
        let Some(candidate) = self.items.get(&candidate_id) else {
            return;
        };
        if !candidate.is_viable() {
            return;
        }
        let replace = match self.head.and_then(|id| self.items.get(&id)) {
            None => true,
            Some(incumbent) => {
                candidate.block_num() > incumbent.block_num()
                    || (candidate.block_num() == incumbent.block_num()
                        && self.tie_breaker.prefer(candidate, incumbent))
            }
        };
        if replace {
            self.head = Some(candidate_id);
        }
    }

    fn recompute_head(&mut self) {
        let mut best: Option<&ForkItem> = None;
        for ids in self.by_number.values().rev() {
            let viable = ids
                .iter()
                .filter_map(|id| self.items.get(id))
                .filter(|item| item.is_viable());
            for item in viable {
                best = match best {
                    Some(incumbent) if !self.tie_breaker.prefer(item, incumbent) => {
                        Some(incumbent)
                    }
                    _ => Some(item),
                };
            }
            if best.is_some() {
                break;
            }
        }

        let new_head = best.map(|item| item.id);
        match new_head.and_then(|id| self.items.get(&id)) {
            Some(item) => info!(
                "[qc-08] Head moved to #{} {}",
                item.block_num(),
                item.block_id()
            ),
            None => warn!("[qc-08] No valid head left in fork database"),
        }
        self.head = new_head;
    }

    fn log_head_switch(&self, previous_head: Option<ItemId>) {
        let (Some(old), Some(new)) = (
            previous_head.and_then(|id| self.items.get(&id)),
            self.head_item(),
        ) else {
            return;
        };
        if new.previous_id() == old.block_id() {
            debug!("[qc-08] Head advanced to #{}", new.block_num());
        } else {
            info!(
                "[qc-08] Switching fork: head #{} {} -> #{} {}",
                old.block_num(),
                old.block_id(),
                new.block_num(),
                new.block_id()
            );
        }
    }

    /// Evict items more than `max_size` below the head. Their descendants
    /// stay, with a dangling parent id.
    fn prune_old(&mut self) {
        let min_block_num = self.head_block_num().saturating_sub(self.max_size);
        let stale: Vec<ItemId> = self
            .by_number
            .range(..min_block_num)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();

        let evicted = stale
            .into_iter()
            .filter_map(|id| self.evict(id))
            .count();
        if evicted > 0 {
            debug!(
                "[qc-08] Evicted {} blocks below #{}",
                evicted, min_block_num
            );
        }
    }

    fn evict(&mut self, item_id: ItemId) -> Option<ForkItem> {
        let item = self.items.remove(&item_id)?;
        self.by_block_id.remove(&item.block_id());

        let previous_id = item.previous_id();
        if let Some(siblings) = self.children.get_mut(&previous_id) {
            siblings.retain(|id| *id != item_id);
            if siblings.is_empty() {
                self.children.remove(&previous_id);
            }
        }

        let block_num = item.block_num();
        if let Some(same_height) = self.by_number.get_mut(&block_num) {
            same_height.retain(|id| *id != item_id);
            if same_height.is_empty() {
                self.by_number.remove(&block_num);
            }
        }

        if self.head == Some(item_id) {
            self.head = None;
        }
        Some(item)
    }
}
