//! # Integration Tests
//!
//! Cross-crate flows: blocks enter through the fork database and leave
//! through the block log.

pub mod crash_recovery;
pub mod flows;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use qc_02_block_log::{BlockLogConfig, FlushPolicy, LogSetManager, SplitPolicy, StoreDependencies};
    use qc_08_fork_db::ForkDatabase;
    use shared_types::BlockSource;

    use crate::pipeline::ChainPipeline;

    pub fn log_config(dir: &Path, split: SplitPolicy) -> BlockLogConfig {
        BlockLogConfig::new(dir)
            .with_split(split, 4)
            .with_flush(FlushPolicy::Manual)
    }

    pub fn open_log(config: BlockLogConfig) -> LogSetManager {
        LogSetManager::open_with(config, StoreDependencies::default()).expect("open block log")
    }

    pub fn pipeline(dir: &Path, split: SplitPolicy, depth: u32) -> ChainPipeline {
        ChainPipeline::new(
            ForkDatabase::default(),
            open_log(log_config(dir, split)),
            depth,
        )
    }

    pub fn from_peer(peer: &str) -> BlockSource {
        BlockSource::Network {
            peer: peer.to_string(),
        }
    }
}
