//! # Adapters
//!
//! - `fs`: positional file I/O and read-only memory maps
//! - `lock`: exclusive process lock on a writable log directory

pub mod fs;
pub mod lock;
