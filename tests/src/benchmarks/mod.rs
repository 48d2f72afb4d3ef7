//! # Quantum-Chain Benchmarks
//!
//! Criterion benchmarks per subsystem, registered by
//! `benches/subsystem_benchmarks.rs`.

pub mod qc_02_block_log;
pub mod qc_08_fork_db;
