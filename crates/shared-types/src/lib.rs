//! # Shared Types Crate
//!
//! Block value types and small collaborator seams shared by the block log
//! (qc-02) and the fork database (qc-08).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: `BlockId`, `FullBlock` and the compression
//!   metadata are defined once here.
//! - **Immutable Handles**: blocks travel as `BlockHandle = Arc<FullBlock>`
//!   and are never mutated after construction.
//! - **Explicit Collaborators**: cancellation and chain lookups are passed
//!   in as values (`CancellationFlag`, `BlockIdSource`), never global.

pub mod block_flow;
pub mod chain;
pub mod entities;
pub mod errors;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use block_flow::{BlockFlow, BlockPhase, BlockSource, BlockSourceKind};
pub use chain::{BlockIdSource, CancellationFlag};
pub use entities::*;
pub use errors::*;
