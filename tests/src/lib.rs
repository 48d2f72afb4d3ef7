//! # Quantum-Chain Test Suite
//!
//! Unified test crate for the block storage workspace.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── pipeline.rs       # Fork database -> irreversibility -> block log
//! ├── benchmarks/       # Criterion benchmarks per subsystem
//! │   ├── qc_02_block_log.rs
//! │   └── qc_08_fork_db.rs
//! │
//! └── integration/      # Cross-crate flows
//!     ├── flows.rs
//!     └── crash_recovery.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

pub mod benchmarks;
pub mod integration;
pub mod pipeline;

pub use pipeline::{ChainPipeline, PipelineError, PipelineResult};
