//! # Block Log Configuration
//!
//! Layout, durability and compression settings for a block log directory.
//!
//! ## Environment Variables
//!
//! - `QC_BLOCK_LOG_DIR`: data directory
//! - `QC_BLOCK_LOG_SPLIT`: `monolithic`, `all`, or a retained part count
//! - `QC_BLOCK_LOG_BLOCKS_PER_PART`: part capacity in blocks
//! - `QC_BLOCK_LOG_READ_ONLY`, `QC_BLOCK_LOG_AUTO_FIX`, `QC_BLOCK_LOG_COMPRESSION`
//! - `QC_BLOCK_LOG_COMPRESSION_LEVEL`: zstd level (1-22)
//! - `QC_BLOCK_LOG_FLUSH`: `every_append`, `live_sync`, or `manual`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::{BlockLogError, BlockLogResult};

/// Default part capacity.
pub const DEFAULT_BLOCKS_PER_PART: u32 = 1_000_000;

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// How the logical log is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// One legacy file of unbounded capacity.
    Monolithic,
    /// Fixed-capacity parts, all retained.
    KeepAll,
    /// Fixed-capacity parts, only the newest N retained.
    KeepLast(u32),
}

impl SplitPolicy {
    pub fn is_split(&self) -> bool {
        !matches!(self, SplitPolicy::Monolithic)
    }

    /// Number of retained parts, if pruning.
    pub fn retained_parts(&self) -> Option<u32> {
        match self {
            SplitPolicy::KeepLast(n) => Some(*n),
            _ => None,
        }
    }

    /// `monolithic`, `all`, or a retention count.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monolithic" | "none" => Some(SplitPolicy::Monolithic),
            "all" | "keep_all" => Some(SplitPolicy::KeepAll),
            other => other.parse().ok().map(SplitPolicy::KeepLast),
        }
    }
}

/// When appended bytes are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// fsync after every append.
    EveryAppend,
    /// fsync only appends flagged as live sync (blocks at the network tip).
    LiveSyncOnly,
    /// Only on explicit `flush()` and `close()`.
    Manual,
}

impl FlushPolicy {
    /// Whether an append must be synced before its index record is written.
    pub fn sync_on_append(&self, is_live_sync: bool) -> bool {
        match self {
            FlushPolicy::EveryAppend => true,
            FlushPolicy::LiveSyncOnly => is_live_sync,
            FlushPolicy::Manual => false,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "every_append" | "always" => Some(FlushPolicy::EveryAppend),
            "live_sync" | "live_sync_only" => Some(FlushPolicy::LiveSyncOnly),
            "manual" | "never" => Some(FlushPolicy::Manual),
            _ => None,
        }
    }
}

/// Compression settings for newly appended blocks.
///
/// Existing blocks are always readable regardless of these settings; the
/// per-block attributes decide how they are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,
    /// Zstd level (1-22)
    pub level: i32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Configuration for a block log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockLogConfig {
    /// Directory holding the log and artifacts files
    pub data_dir: PathBuf,
    /// Monolithic or split layout
    pub split: SplitPolicy,
    /// Capacity of each part when split
    pub blocks_per_part: u32,
    /// Open every part read-only
    pub read_only: bool,
    /// Truncate a torn log tail instead of failing
    pub auto_fix: bool,
    pub compression: CompressionSettings,
    pub flush: FlushPolicy,
}

impl Default for BlockLogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/blocks"),
            split: SplitPolicy::Monolithic,
            blocks_per_part: DEFAULT_BLOCKS_PER_PART,
            read_only: false,
            auto_fix: true,
            compression: CompressionSettings::default(),
            flush: FlushPolicy::LiveSyncOnly,
        }
    }
}

impl BlockLogConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_split(mut self, split: SplitPolicy, blocks_per_part: u32) -> Self {
        self.split = split;
        self.blocks_per_part = blocks_per_part;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    pub fn with_compression(mut self, enabled: bool, level: i32) -> Self {
        self.compression = CompressionSettings { enabled, level };
        self
    }

    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    /// Effective part capacity. A monolithic log is a single unbounded part.
    pub fn part_capacity(&self) -> u32 {
        if self.split.is_split() {
            self.blocks_per_part
        } else {
            u32::MAX
        }
    }

    /// Apply `QC_BLOCK_LOG_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> BlockLogResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> BlockLogResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("QC_BLOCK_LOG_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_SPLIT") {
            self.split = SplitPolicy::parse(&value).ok_or_else(|| {
                BlockLogError::conflict(format!("QC_BLOCK_LOG_SPLIT: unrecognized value {value:?}"))
            })?;
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_BLOCKS_PER_PART") {
            self.blocks_per_part = parse_number("QC_BLOCK_LOG_BLOCKS_PER_PART", &value)?;
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_READ_ONLY") {
            self.read_only = parse_flag(&value);
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_AUTO_FIX") {
            self.auto_fix = parse_flag(&value);
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_COMPRESSION") {
            self.compression.enabled = parse_flag(&value);
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_COMPRESSION_LEVEL") {
            self.compression.level = parse_number("QC_BLOCK_LOG_COMPRESSION_LEVEL", &value)?;
        }
        if let Some(value) = lookup("QC_BLOCK_LOG_FLUSH") {
            self.flush = FlushPolicy::parse(&value).ok_or_else(|| {
                BlockLogError::conflict(format!("QC_BLOCK_LOG_FLUSH: unrecognized value {value:?}"))
            })?;
        }
        Ok(())
    }

    /// Reject settings that can never describe a valid layout.
    pub fn validate(&self) -> BlockLogResult<()> {
        if self.split.is_split() && self.blocks_per_part == 0 {
            return Err(BlockLogError::conflict("blocks_per_part must be at least 1"));
        }
        if self.split.retained_parts() == Some(0) {
            return Err(BlockLogError::conflict("retained part count must be at least 1"));
        }
        if self.compression.enabled && !(1..=22).contains(&self.compression.level) {
            return Err(BlockLogError::conflict(format!(
                "compression level {} outside 1-22",
                self.compression.level
            )));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> BlockLogResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BlockLogError::conflict(format!("{key}: {value:?} is not a number")))
}
