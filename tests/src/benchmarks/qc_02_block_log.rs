//! # QC-02 Block Log Brutal Benchmarks
//!
//! - Append throughput, compressed and uncompressed
//! - Random reads by number (artifacts lookup + decode)
//! - Sequential replay with and without a worker pool
//! - Full artifacts regeneration from the log

use std::ops::ControlFlow;
use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_02_block_log::{
    BlockLogConfig, FlushPolicy, LogSetManager, ReadPurpose, SplitPolicy, StoreDependencies,
};
use rand::Rng;
use shared_types::test_utils::make_chain;
use shared_types::{BlockHandle, CancellationFlag};
use tempfile::TempDir;

const CHAIN_LEN: u32 = 2_000;

fn config(dir: &TempDir, compression: bool) -> BlockLogConfig {
    BlockLogConfig::new(dir.path())
        .with_split(SplitPolicy::KeepAll, 500)
        .with_compression(compression, 3)
        .with_flush(FlushPolicy::Manual)
}

fn filled_log(chain: &[BlockHandle]) -> (TempDir, LogSetManager) {
    let dir = TempDir::new().expect("temp dir");
    let log = LogSetManager::open_with(config(&dir, true), StoreDependencies::default())
        .expect("open block log");
    for block in chain {
        log.append(block, false).expect("append");
    }
    (dir, log)
}

pub fn brutal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-02/append");
    group.measurement_time(Duration::from_secs(10));
    let chain = make_chain(200);

    for compression in [false, true] {
        group.throughput(Throughput::Elements(chain.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("blocks_200", if compression { "zstd" } else { "plain" }),
            &compression,
            |b, &compression| {
                b.iter_with_setup(
                    || {
                        let dir = TempDir::new().expect("temp dir");
                        let log = LogSetManager::open_with(
                            config(&dir, compression),
                            StoreDependencies::default(),
                        )
                        .expect("open block log");
                        (dir, log)
                    },
                    |(_dir, log)| {
                        for block in &chain {
                            black_box(log.append(block, false).expect("append"));
                        }
                    },
                )
            },
        );
    }
    group.finish();
}

pub fn brutal_random_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-02/read");
    let chain = make_chain(CHAIN_LEN);
    let (_dir, log) = filled_log(&chain);

    group.bench_function("read_block_by_num_random", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let num = rng.gen_range(1..=CHAIN_LEN);
            black_box(log.read_block_by_num(num).expect("read"))
        })
    });

    group.bench_function("block_id_by_num_random", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let num = rng.gen_range(1..=CHAIN_LEN);
            black_box(log.block_id_by_num(num).expect("lookup"))
        })
    });
    group.finish();
}

pub fn brutal_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-02/replay");
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(CHAIN_LEN as u64));
    let chain = make_chain(CHAIN_LEN);
    let (_dir, log) = filled_log(&chain);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("thread pool");

    group.bench_function("sequential", |b| {
        b.iter(|| {
            log.for_each_block(
                1,
                CHAIN_LEN,
                |block| {
                    black_box(block);
                    ControlFlow::Continue(())
                },
                ReadPurpose::Random,
                None,
            )
            .expect("replay")
        })
    });

    group.bench_function("pooled", |b| {
        b.iter(|| {
            log.for_each_block(
                1,
                CHAIN_LEN,
                |block| {
                    black_box(block);
                    ControlFlow::Continue(())
                },
                ReadPurpose::Replay,
                Some(&pool),
            )
            .expect("replay")
        })
    });
    group.finish();
}

pub fn brutal_regeneration(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-02/regenerate");
    group.sample_size(10);
    let chain = make_chain(CHAIN_LEN);
    let (dir, log) = filled_log(&chain);
    log.close().expect("close");
    let config = config(&dir, true);

    group.bench_function("artifacts_2000_blocks", |b| {
        b.iter(|| {
            black_box(
                LogSetManager::regenerate_artifacts(&config, &CancellationFlag::new())
                    .expect("regenerate"),
            )
        })
    });
    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_append(c);
    brutal_random_reads(c);
    brutal_replay(c);
    brutal_regeneration(c);
}
