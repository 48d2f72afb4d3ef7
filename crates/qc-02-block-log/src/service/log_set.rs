//! # Log Set Manager
//!
//! Presents an ordered sequence of record stores ("parts") as one logical,
//! unbounded block log.
//!
//! ```text
//! Closed ──open()──> Opening ──ok──> Open(Writable | ReadOnly) ──close()──> Closed
//!                       │
//!                       └──err──> Closed
//! ```
//!
//! ## Rotation
//!
//! The part list is copy-on-rotate. Readers clone an `Arc<PartSet>` snapshot
//! and read without holding any lock. The single writer, serialized by the
//! `writer` mutex, creates the next part, appends the block to it, seals the
//! old head and only then swaps the new list in. Pruned files are deleted
//! after the swap.
//!
//! ## Restart after an interrupted rotation
//!
//! - New part still empty: discarded, the old head stays the head.
//! - New part already holds its first block: kept as the head. The old head
//!   is full but may be left dirty; it reopens read-only with its view taken
//!   from the head field every append rewrites, and a writable set repairs
//!   it through a short writable open when that view is unusable.

use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared_types::{BlockHandle, BlockId, CancellationFlag, CompressionAttributes};
use tracing::{debug, info, warn};

use super::record_store::{
    BlockRecordStore, ReadPurpose, StoreDependencies, StoreOptions, VerifyReport,
};
use crate::adapters::lock::DatabaseLock;
use crate::domain::config::{BlockLogConfig, SplitPolicy};
use crate::domain::errors::{BlockLogError, BlockLogResult};
use crate::domain::metrics::BlockLogMetrics;
use crate::domain::naming::{
    artifacts_path, first_block_of_part, last_block_of_part, monolithic_log_path,
    parse_part_number, part_file_name, part_log_path, MONOLITHIC_LOG_NAME,
};
use crate::domain::repair::RegenerationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    Writable,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSetState {
    Closed,
    Opening,
    Open(OpenMode),
}

// =============================================================================
// PARTS
// =============================================================================

/// One part of the logical log.
#[derive(Debug)]
pub struct LogPart {
    part_number: u32,
    first_block_num: u32,
    /// Last block the part may hold
    last_block_num: u32,
    store: BlockRecordStore,
}

impl LogPart {
    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    pub fn first_block_num(&self) -> u32 {
        self.first_block_num
    }

    pub fn last_block_num(&self) -> u32 {
        self.last_block_num
    }

    pub fn store(&self) -> &BlockRecordStore {
        &self.store
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_full(&self) -> bool {
        self.store.head_block_num() >= self.last_block_num
    }

    pub fn info(&self) -> PartInfo {
        PartInfo {
            part_number: self.part_number,
            path: self.path().to_path_buf(),
            first_block_num: self.first_block_num,
            head_block_num: self.store.head_block_num(),
            read_only: self.store.is_read_only(),
            log_bytes: self.store.log_len(),
        }
    }
}

/// Summary of one part, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub path: PathBuf,
    pub first_block_num: u32,
    /// `first_block_num - 1` when the part is empty
    pub head_block_num: u32,
    pub read_only: bool,
    pub log_bytes: u64,
}

/// Immutable snapshot of the open parts, oldest first.
#[derive(Debug, Default)]
pub struct PartSet {
    parts: Vec<Arc<LogPart>>,
}

impl PartSet {
    pub fn parts(&self) -> &[Arc<LogPart>] {
        &self.parts
    }

    pub fn head_part(&self) -> Option<&Arc<LogPart>> {
        self.parts.last()
    }

    pub fn tail_part(&self) -> Option<&Arc<LogPart>> {
        self.parts.first()
    }

    /// Part whose range includes `block_num`, whether or not the block has
    /// been written yet.
    pub fn part_for(&self, block_num: u32) -> Option<&Arc<LogPart>> {
        self.parts
            .get(self.position_from(block_num))
            .filter(|part| part.first_block_num <= block_num)
    }

    /// Position of the first part that ends at or after `block_num`.
    fn position_from(&self, block_num: u32) -> usize {
        self.parts
            .partition_point(|part| part.last_block_num < block_num)
    }
}

/// What a data directory holds.
#[derive(Debug, Default)]
struct DiskLayout {
    monolithic: bool,
    parts: Vec<u32>,
}

fn discover(dir: &Path) -> BlockLogResult<DiskLayout> {
    let mut layout = DiskLayout::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(layout),
        Err(e) => return Err(BlockLogError::io(dir, 0, 0)(e)),
    };
    for entry in entries {
        let entry = entry.map_err(BlockLogError::io(dir, 0, 0))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == MONOLITHIC_LOG_NAME {
            layout.monolithic = true;
        } else if let Some(number) = parse_part_number(name) {
            layout.parts.push(number);
        }
    }
    layout.parts.sort_unstable();
    Ok(layout)
}

fn file_len(path: &Path) -> BlockLogResult<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(BlockLogError::io(path, 0, 0))
}

/// Delete a part's log and artifacts files. Already-missing files are fine.
fn remove_part_files(log_path: &Path) -> BlockLogResult<()> {
    for path in [log_path.to_path_buf(), artifacts_path(log_path)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BlockLogError::io(&path, 0, 0)(e)),
        }
    }
    Ok(())
}

// =============================================================================
// MANAGER
// =============================================================================

pub struct LogSetManager {
    config: BlockLogConfig,
    deps: StoreDependencies,
    state: RwLock<LogSetState>,
    parts: RwLock<Arc<PartSet>>,
    /// Serializes appends, rotation and close.
    writer: Mutex<()>,
    process_lock: Mutex<Option<DatabaseLock>>,
}

impl std::fmt::Debug for LogSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSetManager")
            .field("data_dir", &self.config.data_dir)
            .field("split", &self.config.split)
            .field("state", &self.state())
            .field("parts", &self.snapshot().parts.len())
            .finish()
    }
}

impl LogSetManager {
    /// A closed manager for `config`. Call [`LogSetManager::open`] next.
    pub fn new(config: BlockLogConfig, deps: StoreDependencies) -> Self {
        Self {
            config,
            deps,
            state: RwLock::new(LogSetState::Closed),
            parts: RwLock::new(Arc::new(PartSet::default())),
            writer: Mutex::new(()),
            process_lock: Mutex::new(None),
        }
    }

    /// Construct and open in one step.
    pub fn open_with(config: BlockLogConfig, deps: StoreDependencies) -> BlockLogResult<Self> {
        let manager = Self::new(config, deps);
        manager.open()?;
        Ok(manager)
    }

    pub fn state(&self) -> LogSetState {
        *self.state.read()
    }

    pub fn config(&self) -> &BlockLogConfig {
        &self.config
    }

    pub fn metrics(&self) -> &BlockLogMetrics {
        &self.deps.metrics
    }

    /// Current part list. Empty while closed.
    pub fn snapshot(&self) -> Arc<PartSet> {
        Arc::clone(&self.parts.read())
    }

    fn open_snapshot(&self) -> BlockLogResult<Arc<PartSet>> {
        match self.state() {
            LogSetState::Open(_) => Ok(self.snapshot()),
            _ => Err(BlockLogError::NotOpen),
        }
    }

    fn mode(&self) -> OpenMode {
        if self.config.read_only {
            OpenMode::ReadOnly
        } else {
            OpenMode::Writable
        }
    }

    // =========================================================================
    // OPEN
    // =========================================================================

    /// Discover, validate and open every part.
    pub fn open(&self) -> BlockLogResult<()> {
        {
            let mut state = self.state.write();
            if *state != LogSetState::Closed {
                return Err(BlockLogError::AlreadyOpen);
            }
            *state = LogSetState::Opening;
        }

        match self.open_parts() {
            Ok((parts, lock)) => {
                let head = parts
                    .head_part()
                    .map(|part| part.store.head_block_num())
                    .unwrap_or(0);
                let count = parts.parts.len();
                *self.parts.write() = Arc::new(parts);
                *self.process_lock.lock() = lock;
                *self.state.write() = LogSetState::Open(self.mode());
                info!(
                    "[qc-02] Block log open at {} ({:?}, {} part(s), head #{}, {:?})",
                    self.config.data_dir.display(),
                    self.config.split,
                    count,
                    head,
                    self.mode()
                );
                Ok(())
            }
            Err(e) => {
                *self.state.write() = LogSetState::Closed;
                Err(e)
            }
        }
    }

    fn open_parts(&self) -> BlockLogResult<(PartSet, Option<DatabaseLock>)> {
        self.config.validate()?;
        let dir = &self.config.data_dir;
        let read_only = self.config.read_only;

        let lock = if read_only {
            None
        } else {
            fs::create_dir_all(dir).map_err(BlockLogError::io(dir, 0, 0))?;
            Some(DatabaseLock::acquire(dir)?)
        };

        let layout = discover(dir)?;
        let parts = match self.config.split {
            SplitPolicy::Monolithic => {
                if let Some(&number) = layout.parts.first() {
                    return Err(BlockLogError::conflict(format!(
                        "monolithic log configured but {} holds split part {}",
                        dir.display(),
                        part_file_name(number)
                    )));
                }
                if read_only && !layout.monolithic {
                    Vec::new()
                } else {
                    let part =
                        self.open_part(1, monolithic_log_path(dir), 1, u32::MAX, read_only)?;
                    vec![Arc::new(part)]
                }
            }
            SplitPolicy::KeepAll | SplitPolicy::KeepLast(_) => {
                if layout.monolithic {
                    return Err(BlockLogError::conflict(format!(
                        "split log configured but {} holds a monolithic {}",
                        dir.display(),
                        MONOLITHIC_LOG_NAME
                    )));
                }
                self.open_split_parts(layout.parts)?
            }
        };
        Ok((PartSet { parts }, lock))
    }

    fn open_split_parts(&self, mut numbers: Vec<u32>) -> BlockLogResult<Vec<Arc<LogPart>>> {
        let dir = &self.config.data_dir;
        let capacity = self.config.blocks_per_part;
        let read_only = self.config.read_only;

        for pair in numbers.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(BlockLogError::BrokenPartSequence {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }

        // A rotation interrupted before its first append leaves an empty part.
        if numbers.len() > 1 {
            if let Some(&newest) = numbers.last() {
                let path = part_log_path(dir, newest);
                if file_len(&path)? == 0 {
                    if read_only {
                        debug!("[qc-02] Ignoring empty part #{}", newest);
                    } else {
                        warn!("[qc-02] Discarding empty part #{} left by a rotation", newest);
                        remove_part_files(&path)?;
                    }
                    numbers.pop();
                }
            }
        }

        let Some(&head) = numbers.last() else {
            if read_only {
                return Ok(Vec::new());
            }
            let part = self.open_part(
                1,
                part_log_path(dir, 1),
                1,
                last_block_of_part(1, capacity),
                false,
            )?;
            return Ok(vec![Arc::new(part)]);
        };

        let expected_tail = match self.config.split.retained_parts() {
            Some(retained) => head.saturating_sub(retained - 1).max(1),
            None => 1,
        };
        if numbers[0] > expected_tail {
            return Err(BlockLogError::MissingPart {
                part_number: expected_tail,
                path: part_log_path(dir, expected_tail),
            });
        }

        let mut parts = Vec::with_capacity(numbers.len());
        for number in numbers {
            let path = part_log_path(dir, number);
            if number < expected_tail {
                // Outside the retention window: a prune that did not finish.
                if !read_only {
                    warn!("[qc-02] Pruning stale part #{}", number);
                    remove_part_files(&path)?;
                    self.deps.metrics.record_prune();
                }
                continue;
            }

            let first = first_block_of_part(number, capacity);
            let last = last_block_of_part(number, capacity);
            if number == head {
                parts.push(Arc::new(self.open_part(number, path, first, last, read_only)?));
                continue;
            }

            let part = self.open_sealed_part(number, path, first, last)?;
            if !part.is_full() {
                return Err(BlockLogError::corruption(
                    part.path(),
                    format!(
                        "sealed part #{} ends at block #{}, expected #{}",
                        number,
                        part.store.head_block_num(),
                        last
                    ),
                ));
            }
            parts.push(Arc::new(part));
        }
        Ok(parts)
    }

    /// Open a non-head part read-only. When the set is writable, a part whose
    /// artifacts need repair is repaired through a short writable open first.
    fn open_sealed_part(
        &self,
        number: u32,
        path: PathBuf,
        first: u32,
        last: u32,
    ) -> BlockLogResult<LogPart> {
        match self.open_part(number, path.clone(), first, last, true) {
            Ok(part) => Ok(part),
            Err(
                e @ (BlockLogError::MissingArtifacts { .. }
                | BlockLogError::StorageCorruption { .. }),
            ) if !self.config.read_only => {
                warn!("[qc-02] Repairing sealed part #{}: {}", number, e);
                let repaired = self.open_part(number, path.clone(), first, last, false)?;
                repaired.store.close()?;
                drop(repaired);
                self.open_part(number, path, first, last, true)
            }
            Err(e) => Err(e),
        }
    }

    fn open_part(
        &self,
        part_number: u32,
        path: PathBuf,
        first_block_num: u32,
        last_block_num: u32,
        read_only: bool,
    ) -> BlockLogResult<LogPart> {
        let options = StoreOptions {
            read_only,
            compression: self.config.compression,
            auto_fix: self.config.auto_fix,
            flush: self.config.flush,
        };
        let store = BlockRecordStore::open_and_init(&path, first_block_num, options, &self.deps)?;
        Ok(LogPart {
            part_number,
            first_block_num,
            last_block_num,
            store,
        })
    }

    // =========================================================================
    // APPEND
    // =========================================================================

    /// Append the next irreversible block, rotating when the head part is
    /// full. Returns the frame offset within its part.
    pub fn append(&self, block: &BlockHandle, is_live_sync: bool) -> BlockLogResult<u64> {
        self.append_with(block.block_num(), |store| store.append(block, is_live_sync))
    }

    /// Append a block in stored form. See [`BlockRecordStore::append_raw`].
    pub fn append_raw(
        &self,
        block_num: u32,
        bytes: Vec<u8>,
        attributes: CompressionAttributes,
        is_live_sync: bool,
    ) -> BlockLogResult<u64> {
        self.append_with(block_num, |store| {
            store.append_raw(block_num, bytes, attributes, is_live_sync)
        })
    }

    fn append_with<F>(&self, block_num: u32, write: F) -> BlockLogResult<u64>
    where
        F: FnOnce(&BlockRecordStore) -> BlockLogResult<u64>,
    {
        match self.state() {
            LogSetState::Open(OpenMode::Writable) => {}
            LogSetState::Open(OpenMode::ReadOnly) => return Err(BlockLogError::ReadOnly),
            _ => return Err(BlockLogError::NotOpen),
        }
        let _writer = self.writer.lock();

        let parts = self.snapshot();
        let head_part = parts.head_part().ok_or(BlockLogError::NotOpen)?;
        let expected = head_part.store.head_block_num() + 1;
        if block_num != expected {
            return Err(BlockLogError::OutOfOrderAppend {
                expected,
                actual: block_num,
            });
        }

        if block_num <= head_part.last_block_num {
            write(&head_part.store)
        } else {
            self.rotate_and_append(&parts, block_num, write)
        }
    }

    fn rotate_and_append<F>(&self, parts: &PartSet, block_num: u32, write: F) -> BlockLogResult<u64>
    where
        F: FnOnce(&BlockRecordStore) -> BlockLogResult<u64>,
    {
        let old_head = parts.head_part().ok_or(BlockLogError::NotOpen)?;
        let number = old_head.part_number + 1;
        let capacity = self.config.blocks_per_part;

        // The new part receives its first block before it is linked.
        let next = self.open_part(
            number,
            part_log_path(&self.config.data_dir, number),
            first_block_of_part(number, capacity),
            last_block_of_part(number, capacity),
            false,
        )?;
        let offset = write(&next.store)?;

        old_head.store.close()?;
        let sealed = self.open_part(
            old_head.part_number,
            old_head.path().to_path_buf(),
            old_head.first_block_num,
            old_head.last_block_num,
            true,
        )?;

        let mut linked: Vec<Arc<LogPart>> = parts.parts[..parts.parts.len() - 1].to_vec();
        linked.push(Arc::new(sealed));
        linked.push(Arc::new(next));

        let mut pruned = Vec::new();
        if let Some(retained) = self.config.split.retained_parts() {
            let keep_from = number.saturating_sub(retained - 1).max(1);
            let split_at = linked.partition_point(|part| part.part_number < keep_from);
            pruned = linked.drain(..split_at).collect();
        }

        *self.parts.write() = Arc::new(PartSet { parts: linked });
        self.deps.metrics.record_rotation();
        info!(
            "[qc-02] Rotated to part #{} at block #{}",
            number, block_num
        );

        for part in pruned {
            remove_part_files(part.path())?;
            self.deps.metrics.record_prune();
            info!(
                "[qc-02] Pruned part #{} (blocks #{}..=#{})",
                part.part_number, part.first_block_num, part.last_block_num
            );
        }
        Ok(offset)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// `Ok(None)` for blocks never written or already pruned.
    pub fn read_block_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockHandle>> {
        let parts = self.open_snapshot()?;
        match parts.part_for(block_num) {
            Some(part) => part.store.read_block_by_num(block_num),
            None => Ok(None),
        }
    }

    /// Up to `count` consecutive blocks from `start`, continuing across parts
    /// up to the head. Empty when `start` is pruned or past the head.
    pub fn read_block_range_by_num(
        &self,
        start: u32,
        count: u32,
    ) -> BlockLogResult<Vec<BlockHandle>> {
        let parts = self.open_snapshot()?;
        let mut blocks = Vec::new();
        let mut next = start;
        let mut remaining = count;

        while remaining > 0 {
            let Some(part) = parts.part_for(next) else {
                break;
            };
            let chunk = part.store.read_block_range_by_num(next, remaining)?;
            if chunk.is_empty() {
                break;
            }
            next += chunk.len() as u32;
            remaining -= chunk.len() as u32;
            blocks.extend(chunk);
        }
        Ok(blocks)
    }

    /// Visit blocks `first..=last` across parts in order. Blocks already
    /// pruned are skipped. Returns the number visited.
    pub fn for_each_block<F>(
        &self,
        first: u32,
        last: u32,
        mut visitor: F,
        purpose: ReadPurpose,
        pool: Option<&rayon::ThreadPool>,
    ) -> BlockLogResult<u64>
    where
        F: FnMut(BlockHandle) -> ControlFlow<()>,
    {
        let parts = self.open_snapshot()?;
        let mut visited = 0;
        let mut stopped = false;

        for part in &parts.parts[parts.position_from(first)..] {
            if stopped || part.first_block_num > last {
                break;
            }
            visited += part.store.for_each_block(
                first,
                last,
                |block| {
                    let flow = visitor(block);
                    stopped = flow.is_break();
                    flow
                },
                purpose,
                pool,
            )?;
        }
        Ok(visited)
    }

    pub fn head(&self) -> Option<BlockHandle> {
        self.snapshot().head_part().and_then(|part| part.store.head())
    }

    /// 0 when empty.
    pub fn head_block_num(&self) -> u32 {
        self.snapshot()
            .head_part()
            .map(|part| part.store.head_block_num())
            .unwrap_or(0)
    }

    pub fn head_block_id(&self) -> Option<BlockId> {
        self.snapshot()
            .head_part()
            .and_then(|part| part.store.head_block_id())
    }

    /// Oldest block still stored, if any.
    pub fn tail_block_num(&self) -> Option<u32> {
        let parts = self.snapshot();
        let tail = parts.tail_part()?;
        let head = parts.head_part()?.store.head_block_num();
        (head >= tail.first_block_num).then_some(tail.first_block_num)
    }

    pub fn block_id_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockId>> {
        let parts = self.open_snapshot()?;
        match parts.part_for(block_num) {
            Some(part) => part.store.block_id_by_num(block_num),
            None => Ok(None),
        }
    }

    /// True when `id` is stored at the height it encodes.
    pub fn is_known_block(&self, id: &BlockId) -> BlockLogResult<bool> {
        Ok(self.block_id_by_num(id.num())? == Some(*id))
    }

    pub fn parts_info(&self) -> Vec<PartInfo> {
        self.snapshot().parts.iter().map(|part| part.info()).collect()
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    pub fn flush(&self) -> BlockLogResult<()> {
        let parts = self.open_snapshot()?;
        let _writer = self.writer.lock();
        match parts.head_part() {
            Some(part) => part.store.flush(),
            None => Ok(()),
        }
    }

    /// Close the head part cleanly and release the process lock. Idempotent.
    pub fn close(&self) -> BlockLogResult<()> {
        let mut state = self.state.write();
        if *state == LogSetState::Closed {
            return Ok(());
        }
        let _writer = self.writer.lock();

        let parts = std::mem::take(&mut *self.parts.write());
        let result = match parts.head_part() {
            Some(part) => part.store.close(),
            None => Ok(()),
        };
        *self.process_lock.lock() = None;
        *state = LogSetState::Closed;
        info!(
            "[qc-02] Block log closed at {}",
            self.config.data_dir.display()
        );
        result
    }

    /// Decode and check every stored block of every part.
    pub fn verify(&self) -> BlockLogResult<VerifyReport> {
        let parts = self.open_snapshot()?;
        let mut report = VerifyReport::default();
        for part in &parts.parts {
            report.merge(&part.store.verify()?);
        }
        Ok(report)
    }

    /// Rebuild every artifacts file under `config.data_dir` from its log.
    /// The directory must not be open elsewhere.
    pub fn regenerate_artifacts(
        config: &BlockLogConfig,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<Vec<RegenerationReport>> {
        config.validate()?;
        let dir = &config.data_dir;
        let _lock = DatabaseLock::acquire(dir)?;
        let layout = discover(dir)?;

        let targets: Vec<(PathBuf, u32)> = match config.split {
            SplitPolicy::Monolithic if layout.monolithic => vec![(monolithic_log_path(dir), 1)],
            SplitPolicy::Monolithic => Vec::new(),
            SplitPolicy::KeepAll | SplitPolicy::KeepLast(_) => layout
                .parts
                .iter()
                .map(|&number| {
                    (
                        part_log_path(dir, number),
                        first_block_of_part(number, config.blocks_per_part),
                    )
                })
                .collect(),
        };

        targets
            .iter()
            .map(|(path, first)| BlockRecordStore::regenerate_artifacts(path, *first, cancel))
            .collect()
    }
}
