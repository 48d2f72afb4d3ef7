//! # Block Log (qc-02)
//!
//! Append-only storage for irreversible blocks.
//!
//! ## Architecture
//!
//! Every block is written as one checksummed frame to a log file, followed
//! by a fixed-size record in the companion artifacts file that maps the
//! block number to the frame's offset:
//!
//! ```text
//! append(block) ──compress──> block_log_part.0003            [frame][frame][frame]...
//!                     └─────> block_log_part.0003.artifacts  [hdr][rec][rec][rec]...
//! ```
//!
//! A log is either one monolithic `block_log` file or a sequence of
//! fixed-capacity parts, optionally pruned to the newest N parts.
//!
//! ## Crash Safety
//!
//! | Situation on open | Writable | Read-only |
//! |-------------------|----------|-----------|
//! | Torn last frame | truncate (`auto_fix`) or fail | fail without `auto_fix`, else ignore the tail |
//! | Artifacts missing or invalid | regenerate from the log | fail |
//! | Artifacts left dirty | verify last record, regenerate on mismatch | clamp to consistent head |
//! | Gap in part numbers | fail | fail |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - formats, configuration, errors, compression, metrics
//! - `ports/` - inbound `BlockLogApi`, outbound `DictionaryProvider`
//! - `adapters/` - positional file I/O, memory maps, process lock
//! - `service/` - artifacts index, record store, log set manager
//!
//! ## Usage
//!
//! ```ignore
//! use qc_02_block_log::{BlockLogConfig, LogSetManager, SplitPolicy, StoreDependencies};
//!
//! let config = BlockLogConfig::new("/var/lib/qc/blocks")
//!     .with_split(SplitPolicy::KeepLast(4), 100_000);
//! let log = LogSetManager::open_with(config, StoreDependencies::default())?;
//!
//! log.append(&block, false)?;
//! let stored = log.read_block_by_num(block.block_num())?;
//! log.close()?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(test)]
mod test_utils;

pub use adapters::lock::{DatabaseLock, LockError};
pub use domain::compression::{
    BlockCompressor, CompressionError, DictionaryRef, NoOpCompressor, ZstdCompressor,
};
pub use domain::config::{
    BlockLogConfig, CompressionSettings, FlushPolicy, SplitPolicy, DEFAULT_BLOCKS_PER_PART,
    DEFAULT_COMPRESSION_LEVEL,
};
pub use domain::errors::{BlockLogError, BlockLogResult, ErrorKind};
pub use domain::metrics::{BlockLogMetrics, MetricsSnapshot};
pub use domain::repair::{RegenerationReason, RegenerationReport};
pub use ports::inbound::BlockLogApi;
pub use ports::outbound::{DictionaryEpoch, DictionaryProvider, EpochDictionaries, NoDictionaries};
pub use service::{
    ArtifactsIndex, BlockLogFile, BlockRecordStore, LogPart, LogSetManager, LogSetState,
    OpenMode, PartInfo, RawBlock, ReadPurpose, StoreDependencies, StoreOptions, VerifyReport,
};
