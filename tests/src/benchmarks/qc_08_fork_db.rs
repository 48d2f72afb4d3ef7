//! # QC-08 Fork Database Brutal Benchmarks
//!
//! - Linear push with head advance and eviction
//! - Competing forks and branch extraction for a reorg
//! - Synopsis generation against an irreversible chain
//! - Timed read lock acquisition

use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_08_fork_db::{ForkDatabase, ForkDbConfig, ForkTree};
use shared_types::test_utils::{extend_chain, make_chain};
use shared_types::{BlockHandle, BlockId, BlockIdSource, ChainSourceError};

struct Irreversible(Vec<BlockHandle>);

impl BlockIdSource for Irreversible {
    fn head_block_num(&self) -> u32 {
        self.0.len() as u32
    }

    fn block_id_by_num(&self, block_num: u32) -> Result<Option<BlockId>, ChainSourceError> {
        let Some(index) = block_num.checked_sub(1) else {
            return Ok(None);
        };
        Ok(self.0.get(index as usize).map(|b| b.id()))
    }
}

pub fn brutal_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/push");

    for len in [256u32, 2048] {
        let chain = make_chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("linear", len), &chain, |b, chain| {
            b.iter(|| {
                let mut tree = ForkTree::new(512, 1024);
                for block in chain {
                    black_box(tree.push_block(block.clone()).expect("push"));
                }
            })
        });
    }
    group.finish();
}

pub fn brutal_fork_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/fork");
    let main = make_chain(64);
    let fork = extend_chain(Some(&main[31]), 40, "producer-b", 1);
    let mut tree = ForkTree::default();
    for block in main.iter().chain(fork.iter()) {
        tree.push_block(block.clone()).expect("push");
    }
    let (old_tip, new_tip) = (main[63].id(), fork[39].id());

    group.bench_function("fetch_branch_from_32_deep", |b| {
        b.iter(|| black_box(tree.fetch_branch_from(old_tip, new_tip).expect("branch")))
    });
    group.bench_function("main_branch_lookup", |b| {
        b.iter(|| black_box(tree.fetch_block_on_main_branch_by_number(40)))
    });
    group.finish();
}

pub fn brutal_synopsis(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/synopsis");
    let chain = make_chain(4096);
    let irreversible = Irreversible(chain[..3072].to_vec());
    let fork_db = ForkDatabase::new(ForkDbConfig::default());
    fork_db.start_block(chain[3071].clone());
    for block in &chain[3072..] {
        fork_db.push_block(block.clone()).expect("push");
    }

    group.bench_function("full_chain", |b| {
        b.iter(|| {
            black_box(
                fork_db
                    .get_blockchain_synopsis(&irreversible, None, 0)
                    .expect("synopsis"),
            )
        })
    });
    group.finish();
}

pub fn brutal_timed_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/lock");
    group.measurement_time(Duration::from_secs(5));
    let fork_db = ForkDatabase::new(
        ForkDbConfig::default().with_read_lock_timeout(Some(Duration::from_millis(50))),
    );
    for block in make_chain(128) {
        fork_db.push_block(block).expect("push");
    }

    group.bench_function("timed_read_uncontended", |b| {
        b.iter(|| black_box(fork_db.head_block_num().expect("read")))
    });
    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_push(c);
    brutal_fork_switch(c);
    brutal_synopsis(c);
    brutal_timed_reads(c);
}
