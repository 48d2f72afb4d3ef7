//! Fork tree nodes

use shared_types::{BlockHandle, BlockId};

/// Stable arena slot of a [`ForkItem`]. Assigned in arrival order, never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) u64);

impl ItemId {
    /// Arrival sequence number.
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// A candidate block held by the fork tree.
#[derive(Debug, Clone)]
pub struct ForkItem {
    pub(crate) id: ItemId,
    pub(crate) block: BlockHandle,
    /// Slot of the previous block. May name an evicted slot.
    pub(crate) parent: Option<ItemId>,
    pub(crate) invalid: bool,
    /// Connected to the tree root through known ancestors.
    pub(crate) linked: bool,
}

impl ForkItem {
    pub fn item_id(&self) -> ItemId {
        self.id
    }

    pub fn block(&self) -> &BlockHandle {
        &self.block
    }

    pub fn block_id(&self) -> BlockId {
        self.block.id()
    }

    pub fn block_num(&self) -> u32 {
        self.block.block_num()
    }

    pub fn previous_id(&self) -> BlockId {
        self.block.previous_id()
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Eligible for head selection.
    pub fn is_viable(&self) -> bool {
        self.linked && !self.invalid
    }
}
