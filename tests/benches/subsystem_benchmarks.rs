//! # Quantum-Chain Subsystem Benchmarks
//!
//! | Subsystem | Claim | Target |
//! |-----------|-------|--------|
//! | qc-02 Block Log | O(1) read by number | < 100μs |
//! | qc-02 Block Log | Replay scales with the worker pool | pooled < sequential |
//! | qc-08 Fork DB | Push is O(log n) amortized | < 10μs per block |
//! | qc-08 Fork DB | Synopsis is O(log n) ids | < 50μs |

use criterion::{criterion_group, criterion_main, Criterion};

fn block_log(c: &mut Criterion) {
    qc_tests::benchmarks::qc_02_block_log::register_benchmarks(c);
}

fn fork_db(c: &mut Criterion) {
    qc_tests::benchmarks::qc_08_fork_db::register_benchmarks(c);
}

criterion_group!(benches, block_log, fork_db);
criterion_main!(benches);
