//! # Inbound Port
//!
//! What chain-state logic uses to persist and read irreversible blocks.

use shared_types::{BlockHandle, BlockId};

use crate::domain::errors::BlockLogResult;

/// Block log API exposed to chain-state logic.
///
/// Absence is not an error: reads of pruned or unwritten blocks return
/// `Ok(None)` or a short vector.
pub trait BlockLogApi: Send + Sync {
    /// Append the next irreversible block. Returns the frame's offset.
    fn append(&self, block: &BlockHandle, is_live_sync: bool) -> BlockLogResult<u64>;

    fn read_block_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockHandle>>;

    /// Up to `count` consecutive blocks starting at `start`, crossing parts.
    fn read_block_range_by_num(&self, start: u32, count: u32) -> BlockLogResult<Vec<BlockHandle>>;

    fn head(&self) -> Option<BlockHandle>;

    /// 0 when empty.
    fn head_block_num(&self) -> u32;

    fn head_block_id(&self) -> Option<BlockId>;

    /// True when `id` is stored at the height it encodes.
    fn is_known_block(&self, id: &BlockId) -> BlockLogResult<bool>;

    fn flush(&self) -> BlockLogResult<()>;
}
