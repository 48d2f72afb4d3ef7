//! File naming conventions for block log directories.
//!
//! ```text
//! block_log                      monolithic log
//! block_log.artifacts            its index
//! block_log_part.0001            part #1 of a split log
//! block_log_part.0001.artifacts  its index
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the monolithic (legacy) log file.
pub const MONOLITHIC_LOG_NAME: &str = "block_log";

/// Prefix of every part file name.
pub const PART_PREFIX: &str = "block_log_part.";

/// Suffix tying an artifacts file to its log.
pub const ARTIFACTS_SUFFIX: &str = ".artifacts";

/// Suffix of a temporary artifacts file being generated.
pub const TEMP_SUFFIX: &str = ".tmp";

pub fn monolithic_log_path(dir: &Path) -> PathBuf {
    dir.join(MONOLITHIC_LOG_NAME)
}

pub fn part_file_name(part_number: u32) -> String {
    format!("{PART_PREFIX}{part_number:04}")
}

pub fn part_log_path(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(part_file_name(part_number))
}

/// Companion artifacts path: the log path with `.artifacts` appended.
pub fn artifacts_path(log_path: &Path) -> PathBuf {
    with_suffix(log_path, ARTIFACTS_SUFFIX)
}

pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, TEMP_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Parse the part number out of a part log file name.
///
/// Artifacts, temporary and unrelated files yield `None`.
pub fn parse_part_number(file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(PART_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}

/// Part that holds `block_num` for a given capacity.
#[inline]
pub fn part_for_block(block_num: u32, capacity: u32) -> u32 {
    (block_num - 1) / capacity + 1
}

/// First block number stored in part `part_number`.
#[inline]
pub fn first_block_of_part(part_number: u32, capacity: u32) -> u32 {
    (part_number - 1) * capacity + 1
}

/// Last block number a full part can hold.
#[inline]
pub fn last_block_of_part(part_number: u32, capacity: u32) -> u32 {
    first_block_of_part(part_number, capacity) + (capacity - 1)
}
