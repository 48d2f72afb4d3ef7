//! # Chain Pipeline
//!
//! Node-shaped wiring of the fork database (qc-08) and the block log
//! (qc-02).
//!
//! ```text
//! receive(block) ──push──▶ ForkDatabase ──head moved──▶ undo / apply branch
//!                               │
//!                               └─ main branch at or below head - depth
//!                                          │ append
//!                                          ▼
//!                                    LogSetManager ◀── replay (for_each_block)
//! ```
//!
//! Each block in flight is tracked as a [`BlockFlow`]. Its phase goes
//! Received → Linked → Applied → Irreversible → Persisted, and a reorg moves
//! applied blocks back to Linked.

use std::collections::HashMap;
use std::ops::ControlFlow;

use qc_02_block_log::domain::naming::part_for_block;
use qc_02_block_log::{BlockLogError, LogSetManager, ReadPurpose};
use qc_08_fork_db::{ForkDatabase, ForkDbError, PushOutcome, PushStatus};
use shared_types::{
    BlockFlow, BlockHandle, BlockId, BlockPhase, BlockSource, PhaseTransitionError,
};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fork database error: {0}")]
    ForkDb(#[from] ForkDbError),

    #[error("Block log error: {0}")]
    BlockLog(#[from] BlockLogError),

    #[error(transparent)]
    Phase(#[from] PhaseTransitionError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub struct ChainPipeline {
    fork_db: ForkDatabase,
    block_log: LogSetManager,
    /// Blocks this far below the fork head are irreversible.
    irreversible_depth: u32,
    flows: HashMap<BlockId, BlockFlow>,
    applied_head: Option<BlockId>,
    persisted: u64,
}

impl ChainPipeline {
    /// `block_log` must be open. A non-empty log roots the fork database at
    /// its head block.
    pub fn new(fork_db: ForkDatabase, block_log: LogSetManager, irreversible_depth: u32) -> Self {
        let applied_head = block_log.head().map(|head| {
            let id = head.id();
            fork_db.start_block(head);
            id
        });

        Self {
            fork_db,
            block_log,
            irreversible_depth,
            flows: HashMap::new(),
            applied_head,
            persisted: 0,
        }
    }

    pub fn fork_db(&self) -> &ForkDatabase {
        &self.fork_db
    }

    pub fn block_log(&self) -> &LogSetManager {
        &self.block_log
    }

    pub fn last_irreversible_block_num(&self) -> u32 {
        self.block_log.head_block_num()
    }

    pub fn applied_head(&self) -> Option<BlockId> {
        self.applied_head
    }

    /// Blocks written to the block log by this pipeline.
    pub fn persisted_blocks(&self) -> u64 {
        self.persisted
    }

    /// Flows not yet persisted or discarded.
    pub fn pending_flows(&self) -> usize {
        self.flows.len()
    }

    /// Current phase of a block. Blocks already in the block log report
    /// `Persisted`.
    pub fn phase_of(&self, block_id: &BlockId) -> Option<BlockPhase> {
        if let Some(flow) = self.flows.get(block_id) {
            return Some(flow.phase());
        }
        let stored = self
            .block_log
            .block_id_by_num(block_id.num())
            .ok()
            .flatten();
        (stored == Some(*block_id)).then_some(BlockPhase::Persisted)
    }

    // =========================================================================
    // INTAKE
    // =========================================================================

    /// Push a produced or network block through the fork database, follow
    /// the head, and persist whatever became irreversible.
    pub fn receive(
        &mut self,
        block: BlockHandle,
        source: BlockSource,
    ) -> PipelineResult<PushOutcome> {
        let block_id = block.id();
        let mut flow = BlockFlow::new(block.clone(), source);

        let outcome = match self.fork_db.push_block(block) {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!("[qc-tests] Rejected block {}: {}", block_id, err);
                flow.reject()?;
                self.flows.insert(block_id, flow);
                return Err(err.into());
            }
        };

        if outcome.status != PushStatus::AlreadyKnown {
            self.flows.insert(block_id, flow);
        }
        self.link_received()?;
        if outcome.head_changed {
            self.switch_head()?;
        }
        self.persist_irreversible()?;
        Ok(outcome)
    }

    fn link_received(&mut self) -> PipelineResult<()> {
        let tree = self.fork_db.read();
        for flow in self.flows.values_mut() {
            let linked = tree
                .fetch_item(&flow.id())
                .is_some_and(|item| item.is_linked());
            if flow.phase() == BlockPhase::Received && linked {
                flow.advance(BlockPhase::Linked)?;
            }
        }
        Ok(())
    }

    fn switch_head(&mut self) -> PipelineResult<()> {
        let Some(new_head) = self.fork_db.head()? else {
            return Ok(());
        };
        let new_head_id = new_head.id();

        let (undo, apply) = match self.applied_head {
            Some(tip) if tip == new_head_id => return Ok(()),
            Some(tip) => {
                let (undo, mut apply) = self.fork_db.fetch_branch_from(tip, new_head_id)?;
                apply.reverse();
                (undo, apply)
            }
            None => (Vec::new(), self.fork_db.main_branch_from(0)?),
        };

        if !undo.is_empty() {
            info!(
                "[qc-tests] Reorg to {}: undo {} blocks, apply {}",
                new_head_id,
                undo.len(),
                apply.len()
            );
        }
        for block in &undo {
            if let Some(flow) = self.flows.get_mut(&block.id()) {
                flow.unapply()?;
            }
        }
        for block in &apply {
            if let Some(flow) = self.flows.get_mut(&block.id()) {
                flow.advance(BlockPhase::Applied)?;
            }
        }

        self.applied_head = Some(new_head_id);
        Ok(())
    }

    fn persist_irreversible(&mut self) -> PipelineResult<()> {
        let head_num = self.fork_db.head_block_num()?;
        let lib = head_num.saturating_sub(self.irreversible_depth);
        let log_head = self.block_log.head_block_num();
        if lib <= log_head {
            return Ok(());
        }

        for block in self.fork_db.main_branch_from(log_head + 1)? {
            if block.block_num() > lib {
                break;
            }
            self.block_log.append(&block, false)?;
            if let Some(mut flow) = self.flows.remove(&block.id()) {
                flow.advance(BlockPhase::Irreversible)?;
                flow.advance(BlockPhase::Persisted)?;
            }
            self.persisted += 1;
        }

        // Whatever is left at or below the irreversible block lost its fork
        let before = self.flows.len();
        self.flows.retain(|_, flow| flow.block_num() > lib);
        if self.flows.len() < before {
            debug!(
                "[qc-tests] Dropped {} abandoned fork blocks at or below #{}",
                before - self.flows.len(),
                lib
            );
        }
        Ok(())
    }

    // =========================================================================
    // REPLAY AND SYNC
    // =========================================================================

    /// Read blocks `first..=last` back from the block log as replay flows,
    /// in block order.
    pub fn replay(
        &self,
        first: u32,
        last: u32,
        pool: Option<&rayon::ThreadPool>,
    ) -> PipelineResult<Vec<BlockFlow>> {
        let capacity = self.block_log.config().part_capacity();
        let mut flows = Vec::new();
        let mut failure = None;

        self.block_log.for_each_block(
            first,
            last,
            |block| {
                let part = part_for_block(block.block_num(), capacity);
                let mut flow = BlockFlow::new(block, BlockSource::Replay { part });
                let advanced = flow
                    .advance(BlockPhase::Applied)
                    .and_then(|_| flow.advance(BlockPhase::Irreversible));
                match advanced {
                    Ok(()) => {
                        flows.push(flow);
                        ControlFlow::Continue(())
                    }
                    Err(err) => {
                        failure = Some(err);
                        ControlFlow::Break(())
                    }
                }
            },
            ReadPurpose::Replay,
            pool,
        )?;

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(flows),
        }
    }

    /// Our synopsis for a peer, over the block log plus the fork database.
    pub fn synopsis(&self) -> PipelineResult<Vec<BlockId>> {
        Ok(self
            .fork_db
            .get_blockchain_synopsis(&self.block_log, None, 0)?)
    }

    /// Ids a peer with `synopsis` is missing, up to `limit`, plus how many
    /// more remain.
    pub fn block_ids_after(
        &self,
        synopsis: &[BlockId],
        limit: u32,
    ) -> PipelineResult<(Vec<BlockId>, u32)> {
        Ok(self
            .fork_db
            .get_block_ids(&self.block_log, synopsis, limit)?)
    }

    pub fn close(&self) -> PipelineResult<()> {
        self.block_log.close()?;
        Ok(())
    }
}
