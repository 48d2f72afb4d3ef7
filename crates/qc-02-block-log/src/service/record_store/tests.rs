//! # Record Store Tests

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use super::*;
use crate::domain::errors::ErrorKind;
use crate::ports::outbound::{DictionaryEpoch, EpochDictionaries};
use crate::test_utils::{make_chain, temp_dir};

fn log_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("block_log")
}

fn open(path: &Path, options: StoreOptions, deps: &StoreDependencies) -> BlockRecordStore {
    BlockRecordStore::open_and_init(path, 1, options, deps).expect("open store")
}

fn dictionaries() -> Arc<dyn DictionaryProvider> {
    let bytes: Vec<u8> = (0..64)
        .map(|i| format!("transfer:producer-a:{i}:0:"))
        .collect::<String>()
        .into_bytes();
    Arc::new(EpochDictionaries::new(vec![DictionaryEpoch {
        first_block: 3,
        number: 1,
        bytes: bytes.into(),
    }]))
}

#[test]
fn test_append_and_read_back() {
    let dir = temp_dir();
    let deps = StoreDependencies::default();
    let store = open(&log_path(&dir), StoreOptions::default(), &deps);
    let blocks = make_chain(4);

    let mut offsets = Vec::new();
    for block in &blocks {
        offsets.push(store.append(block, false).unwrap());
    }
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(store.head_block_num(), 4);
    assert_eq!(store.head_block_id(), Some(blocks[3].id()));

    for block in &blocks {
        let read = store.read_block_by_num(block.block_num()).unwrap().unwrap();
        assert_eq!(read.id(), block.id());
        assert_eq!(read.uncompressed_bytes(), block.uncompressed_bytes());
        assert!(read.compressed().is_some());
    }
    assert_eq!(deps.metrics.snapshot().compressed_appends, 4);
}

#[test]
fn test_reads_outside_stored_range_are_none() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    assert!(store.read_block_by_num(1).unwrap().is_none());
    assert!(store.head().is_none());
    assert_eq!(store.head_block_num(), 0);

    store.append(&make_chain(1)[0], false).unwrap();
    assert!(store.read_block_by_num(0).unwrap().is_none());
    assert!(store.read_block_by_num(2).unwrap().is_none());
    assert!(store.block_id_by_num(2).unwrap().is_none());
}

#[test]
fn test_out_of_order_append_rejected() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    let blocks = make_chain(3);
    store.append(&blocks[0], false).unwrap();

    let err = store.append(&blocks[2], false).unwrap_err();
    assert!(matches!(
        err,
        BlockLogError::OutOfOrderAppend {
            expected: 2,
            actual: 3
        }
    ));
    assert_eq!(store.head_block_num(), 1);
    let (header, _) = store.log.read_frame(0).unwrap();
    assert_eq!(store.log_len(), header.frame_len());
}

#[test]
fn test_uncompressed_when_disabled() {
    let dir = temp_dir();
    let options = StoreOptions {
        compression: CompressionSettings {
            enabled: false,
            level: 3,
        },
        ..StoreOptions::default()
    };
    let store = open(&log_path(&dir), options, &StoreDependencies::default());
    let block = &make_chain(1)[0];
    store.append(block, false).unwrap();

    let raw = store.read_raw_block_data_by_num(1).unwrap().unwrap();
    assert_eq!(raw.attributes, CompressionAttributes::UNCOMPRESSED);
    assert_eq!(raw.bytes, block.uncompressed_bytes());
}

#[test]
fn test_dictionary_epochs_apply_by_height() {
    let dir = temp_dir();
    let deps = StoreDependencies {
        dictionaries: dictionaries(),
        ..StoreDependencies::default()
    };
    let store = open(&log_path(&dir), StoreOptions::default(), &deps);
    for block in &make_chain(4) {
        store.append(block, false).unwrap();
    }

    let attrs: Vec<_> = (1..=4)
        .map(|n| store.read_raw_block_data_by_num(n).unwrap().unwrap().attributes)
        .collect();
    assert_eq!(attrs[0], CompressionAttributes::zstd(None));
    assert_eq!(attrs[1], CompressionAttributes::zstd(None));
    assert_eq!(attrs[2], CompressionAttributes::zstd(Some(1)));
    assert_eq!(attrs[3], CompressionAttributes::zstd(Some(1)));
    assert_eq!(store.read_block_by_num(4).unwrap().unwrap().block_num(), 4);
}

#[test]
fn test_missing_dictionary_fails_reads() {
    let dir = temp_dir();
    let path = log_path(&dir);
    let with_dicts = StoreDependencies {
        dictionaries: dictionaries(),
        ..StoreDependencies::default()
    };
    let store = open(&path, StoreOptions::default(), &with_dicts);
    for block in &make_chain(3) {
        store.append(block, false).unwrap();
    }
    store.close().unwrap();
    drop(store);

    // The head block itself needs dictionary 1.
    let err = BlockRecordStore::open_and_init(
        &path,
        1,
        StoreOptions::default(),
        &StoreDependencies::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        BlockLogError::Compression(CompressionError::UnknownDictionary(1))
    ));
}

#[test]
fn test_append_raw_copies_stored_form() {
    let dir = temp_dir();
    let source = open(
        &dir.path().join("source_log"),
        StoreOptions::default(),
        &StoreDependencies::default(),
    );
    let target = open(
        &dir.path().join("target_log"),
        StoreOptions::default(),
        &StoreDependencies::default(),
    );
    for block in &make_chain(2) {
        source.append(block, false).unwrap();
    }

    for n in 1..=2 {
        let raw = source.read_raw_block_data_by_num(n).unwrap().unwrap();
        target
            .append_raw(n, raw.bytes.clone(), raw.attributes, false)
            .unwrap();
        assert_eq!(target.read_raw_block_data_by_num(n).unwrap().unwrap(), raw);
    }
    assert_eq!(target.head_block_id(), source.head_block_id());
}

#[test]
fn test_append_raw_checks_block_number() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    let blocks = make_chain(2);
    store.append(&blocks[0], false).unwrap();

    let err = store
        .append_raw(
            2,
            blocks[0].uncompressed_bytes().to_vec(),
            CompressionAttributes::UNCOMPRESSED,
            false,
        )
        .unwrap_err();
    assert!(matches!(err, BlockLogError::OutOfOrderAppend { .. }));
}

#[test]
fn test_read_only_store_rejects_appends() {
    let dir = temp_dir();
    let path = log_path(&dir);
    let blocks = make_chain(2);
    {
        let store = open(&path, StoreOptions::default(), &StoreDependencies::default());
        store.append(&blocks[0], false).unwrap();
        store.close().unwrap();
    }

    let options = StoreOptions {
        read_only: true,
        ..StoreOptions::default()
    };
    let store = open(&path, options, &StoreDependencies::default());
    assert_eq!(store.head_block_num(), 1);
    assert!(matches!(
        store.append(&blocks[1], false),
        Err(BlockLogError::ReadOnly)
    ));
}

#[test]
fn test_clean_reopen_keeps_head() {
    let dir = temp_dir();
    let path = log_path(&dir);
    let deps = StoreDependencies::default();
    let blocks = make_chain(5);
    {
        let store = open(&path, StoreOptions::default(), &deps);
        for block in &blocks {
            store.append(block, true).unwrap();
        }
        store.close().unwrap();
    }

    let store = open(&path, StoreOptions::default(), &deps);
    assert_eq!(store.head_block_num(), 5);
    assert_eq!(store.head().unwrap().id(), blocks[4].id());
    assert_eq!(deps.metrics.snapshot().regenerations, 0);
}

#[test]
fn test_torn_tail_is_truncated_with_auto_fix() {
    let dir = temp_dir();
    let path = log_path(&dir);
    let deps = StoreDependencies::default();
    let blocks = make_chain(4);
    let intact_len;
    {
        let store = open(&path, StoreOptions::default(), &deps);
        for block in &blocks[..3] {
            store.append(block, false).unwrap();
        }
        intact_len = store.log_len();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 40]).unwrap();
    drop(file);

    let store = open(&path, StoreOptions::default(), &deps);
    assert_eq!(store.head_block_num(), 3);
    assert_eq!(store.log_len(), intact_len);
    assert_eq!(deps.metrics.snapshot().auto_fixes, 1);

    store.append(&blocks[3], false).unwrap();
    assert_eq!(store.read_block_by_num(4).unwrap().unwrap().id(), blocks[3].id());
}

#[test]
fn test_torn_tail_without_auto_fix_is_fatal() {
    let dir = temp_dir();
    let path = log_path(&dir);
    {
        let store = open(&path, StoreOptions::default(), &StoreDependencies::default());
        for block in &make_chain(2) {
            store.append(block, false).unwrap();
        }
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 40]).unwrap();
    drop(file);

    let options = StoreOptions {
        auto_fix: false,
        ..StoreOptions::default()
    };
    let err = BlockRecordStore::open_and_init(&path, 1, options, &StoreDependencies::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageCorruption);
}

#[test]
fn test_torn_tail_recovered_by_scan_when_artifacts_missing() {
    let dir = temp_dir();
    let path = log_path(&dir);
    let deps = StoreDependencies::default();
    {
        let store = open(&path, StoreOptions::default(), &deps);
        for block in &make_chain(3) {
            store.append(block, false).unwrap();
        }
        std::fs::remove_file(store.artifacts_path()).unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x11; 50]).unwrap();
    drop(file);

    let store = open(&path, StoreOptions::default(), &deps);
    assert_eq!(store.head_block_num(), 3);
    assert_eq!(deps.metrics.snapshot().regenerations, 1);
}

#[test]
fn test_for_each_block_replay_in_order() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    let blocks = make_chain(150);
    for block in &blocks {
        store.append(block, false).unwrap();
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .unwrap();

    let mut seen = Vec::new();
    let visited = store
        .for_each_block(
            1,
            u32::MAX,
            |block| {
                seen.push(block.block_num());
                ControlFlow::Continue(())
            },
            ReadPurpose::Replay,
            Some(&pool),
        )
        .unwrap();

    assert_eq!(visited, 150);
    assert_eq!(seen, (1..=150).collect::<Vec<_>>());
}

#[test]
fn test_for_each_block_stops_on_break() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    for block in &make_chain(10) {
        store.append(block, false).unwrap();
    }

    let mut last = 0;
    let visited = store
        .for_each_block(
            3,
            10,
            |block| {
                last = block.block_num();
                if last == 5 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
            ReadPurpose::Random,
            None,
        )
        .unwrap();
    assert_eq!(visited, 3);
    assert_eq!(last, 5);
}

#[test]
fn test_for_each_block_honors_cancellation() {
    let dir = temp_dir();
    let deps = StoreDependencies::default();
    let store = open(&log_path(&dir), StoreOptions::default(), &deps);
    for block in &make_chain(5) {
        store.append(block, false).unwrap();
    }

    let cancel = deps.cancel.clone();
    let err = store
        .for_each_block(
            1,
            5,
            |block| {
                if block.block_num() == 2 {
                    cancel.cancel();
                }
                ControlFlow::Continue(())
            },
            ReadPurpose::Random,
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
}

#[test]
fn test_verify_reports_every_block() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    for block in &make_chain(7) {
        store.append(block, false).unwrap();
    }

    let report = store.verify().unwrap();
    assert_eq!(report.blocks_checked, 7);
    assert_eq!(report.first_block, Some(1));
    assert_eq!(report.last_block, Some(7));
    assert_eq!(report.compressed_blocks, 7);
    assert!(report.stored_bytes < report.uncompressed_bytes);
}

#[test]
fn test_range_read_is_clipped_at_head() {
    let dir = temp_dir();
    let store = open(&log_path(&dir), StoreOptions::default(), &StoreDependencies::default());
    for block in &make_chain(4) {
        store.append(block, false).unwrap();
    }

    let range = store.read_block_range_by_num(3, 10).unwrap();
    assert_eq!(
        range.iter().map(|b| b.block_num()).collect::<Vec<_>>(),
        vec![3, 4]
    );
}
