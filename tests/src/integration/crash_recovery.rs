//! # Crash Recovery Flows
//!
//! A node dies mid-append: the block log is left with a torn tail and a
//! dirty artifacts file. On restart the log repairs itself (or refuses to,
//! when auto-fix is off) and the pipeline re-persists the lost block from
//! the fork database path.

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;

    use qc_02_block_log::domain::naming::{monolithic_log_path, part_log_path};
    use qc_02_block_log::{ErrorKind, LogSetManager, SplitPolicy, StoreDependencies};
    use qc_08_fork_db::ForkDatabase;
    use shared_types::test_utils::make_chain;
    use tempfile::TempDir;

    use crate::integration::fixtures::{from_peer, log_config, open_log, pipeline};
    use crate::pipeline::ChainPipeline;

    fn truncate_tail(path: &std::path::Path, bytes: u64) {
        let len = std::fs::metadata(path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_len(len - bytes)
            .unwrap();
    }

    #[test]
    fn test_torn_tail_repaired_and_block_persisted_again() {
        let dir = TempDir::new().unwrap();
        let chain = make_chain(8);
        {
            let mut crashed = pipeline(dir.path(), SplitPolicy::Monolithic, 2);
            for block in &chain {
                crashed.receive(block.clone(), from_peer("peer-1")).unwrap();
            }
            assert_eq!(crashed.last_irreversible_block_num(), 6);
            // Dropped without close
        }
        truncate_tail(&monolithic_log_path(dir.path()), 10);

        let config = log_config(dir.path(), SplitPolicy::Monolithic);
        let log = open_log(config);
        assert_eq!(log.head_block_num(), 5);
        assert_eq!(log.metrics().snapshot().auto_fixes, 1);

        let mut restarted = ChainPipeline::new(ForkDatabase::default(), log, 2);
        for block in &chain[5..] {
            restarted.receive(block.clone(), from_peer("peer-1")).unwrap();
        }
        assert_eq!(restarted.last_irreversible_block_num(), 6);
        let recovered = restarted
            .block_log()
            .read_block_by_num(6)
            .unwrap()
            .unwrap();
        assert_eq!(recovered.id(), chain[5].id());
        restarted.close().unwrap();
    }

    #[test]
    fn test_strict_reopen_refuses_torn_tail() {
        let dir = TempDir::new().unwrap();
        {
            let mut crashed = pipeline(dir.path(), SplitPolicy::KeepAll, 1);
            for block in make_chain(7) {
                crashed.receive(block, from_peer("peer-1")).unwrap();
            }
        }
        // Blocks 1..=6 persisted: parts 1 (1-4) and 2 (5-6)
        truncate_tail(&part_log_path(dir.path(), 2), 7);

        let strict = log_config(dir.path(), SplitPolicy::KeepAll).with_auto_fix(false);
        let err = LogSetManager::open_with(strict, StoreDependencies::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageCorruption);

        let fixed = open_log(log_config(dir.path(), SplitPolicy::KeepAll));
        assert_eq!(fixed.head_block_num(), 5);
        assert_eq!(fixed.parts_info().len(), 2);
    }
}
