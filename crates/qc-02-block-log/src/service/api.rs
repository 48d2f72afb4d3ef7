//! # Block Log API Implementation
//!
//! Exposes the log set through the inbound port and as a `BlockIdSource`
//! for fork-database chain queries.

use shared_types::{BlockHandle, BlockId, BlockIdSource, ChainSourceError};
use tracing::warn;

use super::log_set::LogSetManager;
use crate::domain::errors::BlockLogResult;
use crate::ports::inbound::BlockLogApi;

impl BlockLogApi for LogSetManager {
    fn append(&self, block: &BlockHandle, is_live_sync: bool) -> BlockLogResult<u64> {
        LogSetManager::append(self, block, is_live_sync)
    }

    fn read_block_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockHandle>> {
        LogSetManager::read_block_by_num(self, block_num)
    }

    fn read_block_range_by_num(&self, start: u32, count: u32) -> BlockLogResult<Vec<BlockHandle>> {
        LogSetManager::read_block_range_by_num(self, start, count)
    }

    fn head(&self) -> Option<BlockHandle> {
        LogSetManager::head(self)
    }

    fn head_block_num(&self) -> u32 {
        LogSetManager::head_block_num(self)
    }

    fn head_block_id(&self) -> Option<BlockId> {
        LogSetManager::head_block_id(self)
    }

    fn is_known_block(&self, id: &BlockId) -> BlockLogResult<bool> {
        LogSetManager::is_known_block(self, id)
    }

    fn flush(&self) -> BlockLogResult<()> {
        LogSetManager::flush(self)
    }
}

impl BlockIdSource for LogSetManager {
    fn head_block_num(&self) -> u32 {
        LogSetManager::head_block_num(self)
    }

    fn block_id_by_num(&self, block_num: u32) -> Result<Option<BlockId>, ChainSourceError> {
        LogSetManager::block_id_by_num(self, block_num).map_err(|e| {
            warn!("[qc-02] Block id lookup for #{} failed: {}", block_num, e);
            ChainSourceError {
                block_num,
                reason: e.to_string(),
            }
        })
    }
}
