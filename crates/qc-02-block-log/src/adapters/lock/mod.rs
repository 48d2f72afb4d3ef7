//! # Block Log Process Locking
//!
//! Prevents two writers from opening the same block log directory.
//! Locking is advisory and only enforced with the `locking` feature.

mod flock;

pub use flock::{DatabaseLock, LockError};
