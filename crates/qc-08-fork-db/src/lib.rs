//! # qc-08-fork-db
//!
//! Fork database for Quantum-Chain: the reversible blocks above the last
//! irreversible block, kept as a tree of competing branches.
//!
//! ## Architecture
//!
//! ```text
//!        network / producer
//!               │ push_block
//!               ▼
//! ┌──────────────────────────────┐
//! │ ForkDatabase (RwLock)        │  timed reads, blocking writes
//! │  └─ ForkTree                 │  arena of ForkItems, head selection
//! └──────────────┬───────────────┘
//!                │ main_branch_from(lib + 1)
//!                ▼
//!        block log (qc-02)  ──BlockIdSource──▶  ChainView (synopsis,
//!                                               get_block_ids)
//! ```
//!
//! ## Head Selection
//!
//! The head is the linked, valid tip with the greatest block number.
//! Equal heights are settled by a pluggable [`TieBreaker`]; the default
//! [`FirstSeen`] keeps the incumbent.
//!
//! ## Out-of-Order Arrival
//!
//! A block whose parent is unknown is held unlinked as long as it is no
//! more than `reorder_depth` blocks ahead of the head; further ahead it is
//! rejected as [`ForkDbError::UnreachableFork`]. When the parent arrives,
//! every waiting descendant is linked in one pass.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_08_fork_db::{ForkDatabase, ForkDbConfig};
//!
//! let fork_db = ForkDatabase::new(ForkDbConfig::default());
//! let outcome = fork_db.push_block(block)?;
//! if outcome.head_changed {
//!     let head = fork_db.head()?.expect("head after push");
//!     // switch forks with fetch_branch_from(old_head, head.id())
//! }
//! ```

pub mod config;
pub mod domain;
pub mod metrics;
pub mod service;

pub use config::{
    ForkDbConfig, DEFAULT_MAX_SIZE, DEFAULT_READ_LOCK_TIMEOUT, DEFAULT_REORDER_DEPTH,
};
pub use domain::{
    ChainView, FirstSeen, ForkDbError, ForkDbResult, ForkItem, ForkTree, ItemId, LowestBlockId,
    PushOutcome, PushStatus, TieBreaker,
};
pub use metrics::{LockMetrics, LockMetricsSnapshot};
pub use service::ForkDatabase;
