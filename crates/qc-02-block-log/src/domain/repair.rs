//! # Index Regeneration Reports
//!
//! When an artifacts file is missing, stale or corrupt, it is rebuilt by
//! scanning the frames of its log. The outcome is summarized in a
//! [`RegenerationReport`] so the caller and the operator CLI can see what
//! happened.

use std::path::PathBuf;

use serde::Serialize;

/// Why an index was (re)built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationReason {
    /// No artifacts file existed.
    Missing,
    /// The header failed validation.
    InvalidHeader,
    /// Left dirty by a crash and its last record disagreed with the log.
    DirtyClose,
    /// The log holds more blocks than the index; only the tail was added.
    TrailingRecords,
    /// Requested explicitly.
    Requested,
}

/// Result of an index regeneration.
#[derive(Debug, Clone, Serialize)]
pub struct RegenerationReport {
    pub path: PathBuf,
    pub reason: RegenerationReason,
    /// Records written
    pub blocks_indexed: u64,
    pub first_block: Option<u32>,
    pub last_block: Option<u32>,
    /// Log bytes covered by the written records
    pub bytes_scanned: u64,
    pub duration_ms: u64,
}

impl RegenerationReport {
    pub fn new(path: PathBuf, reason: RegenerationReason) -> Self {
        Self {
            path,
            reason,
            blocks_indexed: 0,
            first_block: None,
            last_block: None,
            bytes_scanned: 0,
            duration_ms: 0,
        }
    }

    /// Record an indexed block.
    pub fn add_block(&mut self, block_num: u32, frame_end: u64) {
        self.blocks_indexed += 1;
        self.first_block.get_or_insert(block_num);
        self.last_block = Some(block_num);
        self.bytes_scanned = frame_end;
    }
}
