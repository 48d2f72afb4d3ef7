//! # Fork Database Service
//!
//! [`ForkTree`] behind a single read-write lock.
//!
//! Readers may bound their wait: a timed read that cannot get the lock in
//! time fails with [`ForkDbError::LockTimeout`] instead of stalling behind
//! a long write. Writers always wait.
//!
//! Every acquisition is timed into [`LockMetrics`]; slow waits are logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use shared_types::{BlockHandle, BlockId, BlockIdSource};
use tracing::{debug, warn};

use crate::config::ForkDbConfig;
use crate::domain::{
    ChainView, FirstSeen, ForkDbError, ForkDbResult, ForkTree, PushOutcome, TieBreaker,
};
use crate::metrics::{LockMetrics, LockMetricsSnapshot};

/// Lock waits above this are logged.
const SLOW_LOCK_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct ForkDatabase {
    tree: RwLock<ForkTree>,
    config: ForkDbConfig,
    metrics: Arc<LockMetrics>,
}

impl Default for ForkDatabase {
    fn default() -> Self {
        Self::new(ForkDbConfig::default())
    }
}

impl ForkDatabase {
    pub fn new(config: ForkDbConfig) -> Self {
        Self::with_tie_breaker(config, Box::new(FirstSeen))
    }

    pub fn with_tie_breaker(config: ForkDbConfig, tie_breaker: Box<dyn TieBreaker>) -> Self {
        let tree = ForkTree::with_tie_breaker(config.max_size, config.reorder_depth, tie_breaker);
        Self {
            tree: RwLock::new(tree),
            config,
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    pub fn config(&self) -> &ForkDbConfig {
        &self.config
    }

    pub fn lock_metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    // =========================================================================
    // LOCKING
    // =========================================================================

    /// Shared access, waiting as long as it takes.
    pub fn read(&self) -> RwLockReadGuard<'_, ForkTree> {
        let started = Instant::now();
        let guard = self.tree.read();
        self.observe_read(started.elapsed());
        guard
    }

    /// Shared access within the configured read timeout.
    pub fn try_read(&self) -> ForkDbResult<RwLockReadGuard<'_, ForkTree>> {
        self.read_with_timeout(self.config.read_lock_timeout)
    }

    /// Shared access within `timeout`; `None` waits indefinitely.
    pub fn read_with_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> ForkDbResult<RwLockReadGuard<'_, ForkTree>> {
        let Some(limit) = timeout else {
            return Ok(self.read());
        };

        let started = Instant::now();
        match self.tree.try_read_for(limit) {
            Some(guard) => {
                self.observe_read(started.elapsed());
                Ok(guard)
            }
            None => {
                self.metrics.record_read_timeout();
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(
                    "[qc-08] Fork database read lock unavailable after {}ms",
                    waited_ms
                );
                Err(ForkDbError::LockTimeout { waited_ms })
            }
        }
    }

    /// Exclusive access. Always waits.
    pub fn write(&self) -> RwLockWriteGuard<'_, ForkTree> {
        let started = Instant::now();
        let guard = self.tree.write();
        let waited = started.elapsed();
        self.metrics.record_write(waited);
        if waited > SLOW_LOCK_WAIT {
            warn!(
                "[qc-08] Waited {}ms for fork database write lock",
                waited.as_millis()
            );
        }
        guard
    }

    fn observe_read(&self, waited: Duration) {
        self.metrics.record_read(waited);
        if waited > SLOW_LOCK_WAIT {
            debug!(
                "[qc-08] Waited {}ms for fork database read lock",
                waited.as_millis()
            );
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub fn push_block(&self, block: BlockHandle) -> ForkDbResult<PushOutcome> {
        self.write().push_block(block)
    }

    pub fn remove(&self, block_id: BlockId) -> ForkDbResult<Vec<BlockHandle>> {
        self.write().remove(block_id)
    }

    pub fn mark_invalid(&self, block_id: BlockId) -> ForkDbResult<usize> {
        self.write().mark_invalid(block_id)
    }

    pub fn pop_block(&self) -> ForkDbResult<BlockHandle> {
        self.write().pop_block()
    }

    pub fn set_head(&self, block_id: BlockId) -> ForkDbResult<()> {
        self.write().set_head(block_id)
    }

    pub fn reset(&self) {
        self.write().reset();
    }

    pub fn start_block(&self, block: BlockHandle) {
        self.write().start_block(block);
    }

    pub fn set_max_size(&self, max_size: u32) {
        self.write().set_max_size(max_size);
    }

    // =========================================================================
    // READS (configured timeout)
    // =========================================================================

    pub fn head(&self) -> ForkDbResult<Option<BlockHandle>> {
        Ok(self.try_read()?.head())
    }

    pub fn head_block_num(&self) -> ForkDbResult<u32> {
        Ok(self.try_read()?.head_block_num())
    }

    pub fn fetch_block(&self, block_id: &BlockId) -> ForkDbResult<Option<BlockHandle>> {
        Ok(self.try_read()?.fetch_block(block_id))
    }

    pub fn fetch_block_by_number(&self, block_num: u32) -> ForkDbResult<Vec<BlockHandle>> {
        Ok(self.try_read()?.fetch_block_by_number(block_num))
    }

    pub fn fetch_block_on_main_branch_by_number(
        &self,
        block_num: u32,
    ) -> ForkDbResult<Option<BlockHandle>> {
        Ok(self
            .try_read()?
            .fetch_block_on_main_branch_by_number(block_num))
    }

    pub fn main_branch_from(&self, from_block_num: u32) -> ForkDbResult<Vec<BlockHandle>> {
        self.try_read()?.main_branch_from(from_block_num)
    }

    pub fn fetch_branch_from(
        &self,
        first: BlockId,
        second: BlockId,
    ) -> ForkDbResult<(Vec<BlockHandle>, Vec<BlockHandle>)> {
        self.try_read()?.fetch_branch_from(first, second)
    }

    // =========================================================================
    // CHAIN QUERIES
    // =========================================================================

    fn with_chain<T>(
        &self,
        irreversible: &dyn BlockIdSource,
        query: impl FnOnce(&ChainView<'_>) -> ForkDbResult<T>,
    ) -> ForkDbResult<T> {
        let tree = self.try_read()?;
        query(&ChainView::new(&tree, irreversible))
    }

    /// Known to the fork tree or stored on the irreversible chain.
    pub fn is_known_block(
        &self,
        irreversible: &dyn BlockIdSource,
        block_id: &BlockId,
    ) -> ForkDbResult<bool> {
        self.with_chain(irreversible, |chain| chain.is_known_block(block_id))
    }

    pub fn find_first_item_not_in_blockchain(
        &self,
        irreversible: &dyn BlockIdSource,
        item_ids: &[BlockId],
    ) -> ForkDbResult<Option<BlockId>> {
        self.with_chain(irreversible, |chain| {
            chain.find_first_item_not_in_blockchain(item_ids)
        })
    }

    pub fn get_blockchain_synopsis(
        &self,
        irreversible: &dyn BlockIdSource,
        reference_point: Option<BlockId>,
        blocks_after: u32,
    ) -> ForkDbResult<Vec<BlockId>> {
        self.with_chain(irreversible, |chain| {
            chain.get_blockchain_synopsis(reference_point, blocks_after)
        })
    }

    pub fn get_block_ids(
        &self,
        irreversible: &dyn BlockIdSource,
        synopsis: &[BlockId],
        limit: u32,
    ) -> ForkDbResult<(Vec<BlockId>, u32)> {
        self.with_chain(irreversible, |chain| chain.get_block_ids(synopsis, limit))
    }
}
