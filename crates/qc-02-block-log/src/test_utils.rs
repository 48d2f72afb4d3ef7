//! # Test Helpers
//!
//! Builders for on-disk fixtures shared by the unit tests.

use std::path::Path;

use shared_types::{BlockHandle, CancellationFlag, CompressionAttributes};
use tempfile::TempDir;

use crate::domain::frame::FrameHeader;
use crate::service::artifacts_index::{ArtifactsIndex, IndexTarget};
use crate::service::log_file::BlockLogFile;

pub use shared_types::test_utils::{extend_chain, make_block, make_chain};

pub fn temp_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

/// Append `blocks` to `log` as uncompressed frames, returning their offsets.
pub fn write_frames(log: &BlockLogFile, blocks: &[BlockHandle]) -> Vec<u64> {
    blocks
        .iter()
        .map(|block| {
            let header = FrameHeader {
                block_num: block.block_num(),
                attributes: CompressionAttributes::UNCOMPRESSED,
                payload_len: block.uncompressed_size() as u32,
                block_id: block.id(),
            };
            log.append_frame(&header, block.uncompressed_bytes())
                .expect("append frame")
        })
        .collect()
}

/// A log at `path` holding `blocks` (uncompressed), without artifacts.
pub fn log_with_blocks(path: &Path, blocks: &[BlockHandle]) -> BlockLogFile {
    let log = BlockLogFile::open(path, false).expect("open log");
    write_frames(&log, blocks);
    log
}

/// Open the index of `log` for blocks `first..=head`.
pub fn open_index(
    log: &BlockLogFile,
    read_only: bool,
    first_block_num: u32,
    head_block_num: u32,
) -> crate::domain::errors::BlockLogResult<ArtifactsIndex> {
    ArtifactsIndex::open(
        log,
        read_only,
        IndexTarget {
            first_block_num,
            head_block_num,
        },
        &CancellationFlag::new(),
    )
    .map(|(index, _)| index)
}
