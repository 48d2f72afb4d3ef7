//! # Fork Database Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Default number of blocks kept below the head.
pub const DEFAULT_MAX_SIZE: u32 = 1024;

/// Default out-of-order arrival tolerance, in blocks.
pub const DEFAULT_REORDER_DEPTH: u32 = 1024;

/// Default deadline for timed reads.
pub const DEFAULT_READ_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkDbConfig {
    /// Blocks more than this far below the head are evicted.
    pub max_size: u32,
    /// How far ahead of the head an unlinkable block may be held.
    pub reorder_depth: u32,
    /// `None` waits indefinitely.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub read_lock_timeout: Option<Duration>,
}

impl Default for ForkDbConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            reorder_depth: DEFAULT_REORDER_DEPTH,
            read_lock_timeout: Some(DEFAULT_READ_LOCK_TIMEOUT),
        }
    }
}

impl ForkDbConfig {
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_reorder_depth(mut self, reorder_depth: u32) -> Self {
        self.reorder_depth = reorder_depth;
        self
    }

    pub fn with_read_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_lock_timeout = timeout;
        self
    }
}
