//! # Directory Lock Implementation
//!
//! Uses `fs2` for cross-platform advisory locking (flock on Unix, LockFile on
//! Windows). The OS drops the lock when the holder exits, so a lock file
//! left behind by a crashed process never blocks a restart.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors from block log directory locking
#[derive(Debug)]
pub enum LockError {
    /// Lock file could not be created
    CreateFailed(io::Error),
    /// Directory is already locked by another handle or process
    AlreadyLocked { pid: Option<u32>, path: PathBuf },
    /// Failed to write PID to lock file
    WriteFailed(io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::CreateFailed(e) => write!(f, "Failed to create lock file: {}", e),
            LockError::AlreadyLocked { pid: Some(p), path } => write!(
                f,
                "Block log already in use by process {} ({})",
                p,
                path.display()
            ),
            LockError::AlreadyLocked { pid: None, path } => {
                write!(f, "Block log already in use ({})", path.display())
            }
            LockError::WriteFailed(e) => write!(f, "Failed to write PID to lock file: {}", e),
        }
    }
}

impl std::error::Error for LockError {}

// =============================================================================
// DATABASE LOCK
// =============================================================================

/// Exclusive lock on a writable block log directory.
///
/// Held by the log set for as long as it is open writable, released on
/// drop. Read-only opens never take it.
pub struct DatabaseLock {
    /// Kept open to maintain the lock
    file: File,
    path: PathBuf,
    pid: u32,
}

impl DatabaseLock {
    /// Lock file name
    pub const LOCK_FILE: &'static str = "LOCK";

    /// Acquire the lock without waiting.
    ///
    /// # Errors
    ///
    /// `LockError::AlreadyLocked` if another handle holds it.
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        let path = data_dir.join(Self::LOCK_FILE);

        // Not truncated before locking: the current holder's PID must stay
        // readable for the error message.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(LockError::CreateFailed)?;

        #[cfg(feature = "locking")]
        {
            use fs2::FileExt;
            if file.try_lock_exclusive().is_err() {
                return Err(LockError::AlreadyLocked {
                    pid: Self::read_existing_pid(&path),
                    path,
                });
            }
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", pid).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        Ok(Self { file, path, pid })
    }

    /// Get the PID of the process holding the lock
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the path to the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read PID from existing lock file (for error messages)
    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        #[cfg(feature = "locking")]
        {
            use fs2::FileExt;
            #[allow(clippy::incompatible_msrv)]
            let _ = FileExt::unlock(&self.file);
        }
        #[cfg(not(feature = "locking"))]
        let _ = &self.file;
    }
}
