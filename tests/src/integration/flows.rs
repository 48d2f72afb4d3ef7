//! # Integration Test Flows
//!
//! Blocks pushed through [`ChainPipeline`](crate::ChainPipeline) end up in
//! the block log once they are irreversible, with their lifecycle phase
//! tracked on the way.
//!
//! ## Flows Tested:
//!
//! 1. **Fork db → block log**: irreversible main-branch blocks are appended,
//!    rotating parts as they fill
//! 2. **Reorg**: applied blocks are undone and the new branch applied
//! 3. **Restart**: a reopened log roots the fork database at its head
//! 4. **Sync**: synopsis and block-id queries span both stores
//! 5. **Replay**: persisted blocks read back as replay flows

#[cfg(test)]
mod tests {
    use qc_02_block_log::{LogSetState, SplitPolicy};
    use qc_08_fork_db::{ForkDatabase, ForkDbError};
    use shared_types::test_utils::{extend_chain, make_block, make_chain};
    use shared_types::{BlockHandle, BlockPhase, BlockSource};
    use tempfile::TempDir;

    use crate::integration::fixtures::{from_peer, log_config, open_log, pipeline};
    use crate::pipeline::{ChainPipeline, PipelineError};

    fn receive_all(pipeline: &mut ChainPipeline, blocks: &[BlockHandle]) {
        for block in blocks {
            pipeline
                .receive(block.clone(), from_peer("peer-1"))
                .expect("receive block");
        }
    }

    fn phases(pipeline: &ChainPipeline, blocks: &[BlockHandle]) -> Vec<Option<BlockPhase>> {
        blocks.iter().map(|b| pipeline.phase_of(&b.id())).collect()
    }

    // =========================================================================
    // FORK DB → BLOCK LOG
    // =========================================================================

    #[test]
    fn test_irreversible_blocks_reach_the_block_log() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::KeepAll, 3);
        let chain = make_chain(10);
        receive_all(&mut pipeline, &chain);

        assert_eq!(pipeline.fork_db().head_block_num().unwrap(), 10);
        assert_eq!(pipeline.last_irreversible_block_num(), 7);
        assert_eq!(pipeline.persisted_blocks(), 7);
        assert_eq!(pipeline.block_log().parts_info().len(), 2);

        assert_eq!(pipeline.phase_of(&chain[6].id()), Some(BlockPhase::Persisted));
        assert_eq!(pipeline.phase_of(&chain[7].id()), Some(BlockPhase::Applied));
        assert_eq!(pipeline.pending_flows(), 3);

        let stored = pipeline.block_log().read_block_by_num(5).unwrap().unwrap();
        assert_eq!(stored.id(), chain[4].id());
        assert_eq!(stored.uncompressed_bytes(), chain[4].uncompressed_bytes());
    }

    #[test]
    fn test_produced_blocks_follow_the_same_path() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::Monolithic, 1);
        let chain = make_chain(3);
        for block in &chain {
            pipeline
                .receive(
                    block.clone(),
                    BlockSource::Produced {
                        producer: "producer-a".into(),
                    },
                )
                .unwrap();
        }
        assert_eq!(pipeline.last_irreversible_block_num(), 2);
        assert_eq!(
            phases(&pipeline, &chain),
            vec![
                Some(BlockPhase::Persisted),
                Some(BlockPhase::Persisted),
                Some(BlockPhase::Applied),
            ]
        );
    }

    // =========================================================================
    // REORG
    // =========================================================================

    #[test]
    fn test_reorg_moves_block_phases() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::Monolithic, 10);
        let main = make_chain(3);
        let fork = extend_chain(Some(&main[0]), 3, "producer-b", 1);

        receive_all(&mut pipeline, &main);
        receive_all(&mut pipeline, &fork[..2]);
        assert_eq!(pipeline.applied_head(), Some(main[2].id()));
        assert_eq!(
            phases(&pipeline, &fork[..2]),
            vec![Some(BlockPhase::Linked), Some(BlockPhase::Linked)]
        );

        receive_all(&mut pipeline, &fork[2..]);
        assert_eq!(pipeline.applied_head(), Some(fork[2].id()));
        assert_eq!(
            phases(&pipeline, &main[1..]),
            vec![Some(BlockPhase::Linked), Some(BlockPhase::Linked)]
        );
        assert!(phases(&pipeline, &fork)
            .iter()
            .all(|phase| *phase == Some(BlockPhase::Applied)));

        // Main branch overtakes again
        let comeback = extend_chain(Some(&main[2]), 2, "producer-a", 7);
        receive_all(&mut pipeline, &comeback);
        assert_eq!(pipeline.applied_head(), Some(comeback[1].id()));
        assert!(phases(&pipeline, &main[1..])
            .iter()
            .chain(phases(&pipeline, &comeback).iter())
            .all(|phase| *phase == Some(BlockPhase::Applied)));
        assert!(phases(&pipeline, &fork)
            .iter()
            .all(|phase| *phase == Some(BlockPhase::Linked)));
    }

    #[test]
    fn test_abandoned_fork_dropped_once_irreversible() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::Monolithic, 2);
        let main = make_chain(3);
        let side = extend_chain(Some(&main[0]), 1, "producer-b", 1);

        receive_all(&mut pipeline, &main);
        receive_all(&mut pipeline, &side);
        assert_eq!(pipeline.phase_of(&side[0].id()), Some(BlockPhase::Linked));

        receive_all(&mut pipeline, &extend_chain(Some(&main[2]), 2, "producer-a", 0));
        assert_eq!(pipeline.last_irreversible_block_num(), 3);
        assert_eq!(pipeline.phase_of(&side[0].id()), None);
    }

    // =========================================================================
    // REJECTION AND OUT-OF-ORDER ARRIVAL
    // =========================================================================

    #[test]
    fn test_rejected_block_is_tracked() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::Monolithic, 10);
        let chain = make_chain(3);
        receive_all(&mut pipeline, &chain);

        pipeline.fork_db().mark_invalid(chain[1].id()).unwrap();
        let child = make_block(Some(&chain[1]), "producer-c", 3);
        let err = pipeline
            .receive(child.clone(), from_peer("peer-2"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ForkDb(ForkDbError::InvalidAncestor(_))
        ));
        assert_eq!(pipeline.phase_of(&child.id()), Some(BlockPhase::Rejected));
    }

    #[test]
    fn test_out_of_order_blocks_link_later() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::Monolithic, 10);
        let chain = make_chain(5);

        receive_all(&mut pipeline, &chain[..1]);
        receive_all(&mut pipeline, &chain[2..]);
        assert!(phases(&pipeline, &chain[2..])
            .iter()
            .all(|phase| *phase == Some(BlockPhase::Received)));

        receive_all(&mut pipeline, &chain[1..2]);
        assert_eq!(pipeline.applied_head(), Some(chain[4].id()));
        assert!(phases(&pipeline, &chain)
            .iter()
            .all(|phase| *phase == Some(BlockPhase::Applied)));
    }

    // =========================================================================
    // RESTART
    // =========================================================================

    #[test]
    fn test_restart_resumes_from_block_log() {
        let dir = TempDir::new().unwrap();
        let chain = make_chain(12);
        {
            let mut first = pipeline(dir.path(), SplitPolicy::KeepAll, 3);
            receive_all(&mut first, &chain[..10]);
            first.close().unwrap();
            assert_eq!(first.block_log().state(), LogSetState::Closed);
        }

        let log = open_log(log_config(dir.path(), SplitPolicy::KeepAll));
        let mut second = ChainPipeline::new(ForkDatabase::default(), log, 3);
        assert_eq!(second.applied_head(), Some(chain[6].id()));
        assert_eq!(second.fork_db().head_block_num().unwrap(), 7);

        receive_all(&mut second, &chain[7..]);
        assert_eq!(second.last_irreversible_block_num(), 9);
        assert_eq!(second.phase_of(&chain[8].id()), Some(BlockPhase::Persisted));
        assert_eq!(second.block_log().verify().unwrap().blocks_checked, 9);
    }

    // =========================================================================
    // SYNC AND REPLAY
    // =========================================================================

    #[test]
    fn test_sync_queries_span_both_stores() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::KeepAll, 5);
        let chain = make_chain(20);
        receive_all(&mut pipeline, &chain);
        assert_eq!(pipeline.last_irreversible_block_num(), 15);

        let synopsis = pipeline.synopsis().unwrap();
        let nums: Vec<u32> = synopsis.iter().map(|id| id.num()).collect();
        assert_eq!(nums, vec![15, 18, 20]);
        assert_eq!(synopsis[0], chain[14].id());
        assert_eq!(synopsis[2], chain[19].id());

        let (ids, remaining) = pipeline.block_ids_after(&[chain[2].id()], 4).unwrap();
        assert_eq!(
            ids,
            vec![chain[2].id(), chain[3].id(), chain[4].id(), chain[5].id()]
        );
        assert_eq!(remaining, 14);
    }

    #[test]
    fn test_replay_reads_back_irreversible_blocks() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(dir.path(), SplitPolicy::KeepAll, 2);
        let chain = make_chain(12);
        receive_all(&mut pipeline, &chain);
        assert_eq!(pipeline.last_irreversible_block_num(), 10);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let flows = pipeline.replay(1, 10, Some(&pool)).unwrap();

        assert_eq!(flows.len(), 10);
        assert!(flows
            .iter()
            .all(|flow| flow.phase() == BlockPhase::Irreversible));
        assert_eq!(flows[4].source(), &BlockSource::Replay { part: 2 });
        let replayed: Vec<_> = flows.iter().map(|flow| flow.id()).collect();
        let expected: Vec<_> = chain[..10].iter().map(|b| b.id()).collect();
        assert_eq!(replayed, expected);
    }
}
