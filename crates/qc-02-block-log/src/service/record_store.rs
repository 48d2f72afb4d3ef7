//! # Block Record Store
//!
//! One physical log file ("part") and its artifacts index.
//!
//! ## Write ordering
//!
//! ```text
//! append(block)
//!   1. compress with the epoch dictionary (unless already compressed)
//!   2. write frame to the log          -> committed length published
//!   3. fsync, if the flush policy asks for it
//!   4. write the artifacts record      -> index head published
//!   5. replace the cached head handle
//! ```
//!
//! Readers find blocks through the index only, so they never observe a
//! frame whose bytes are not fully written.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use shared_types::{
    BlockHandle, BlockId, CancellationFlag, CompressedBuffer, CompressionAttributes, FullBlock,
};
use tracing::{debug, info, trace, warn};

use super::artifacts_index::{ArtifactsIndex, IndexTarget};
use super::log_file::{BlockLogFile, TailState};
use crate::domain::artifacts::ArtifactRecord;
use crate::domain::compression::{BlockCompressor, CompressionError, DictionaryRef, ZstdCompressor};
use crate::domain::config::{CompressionSettings, FlushPolicy};
use crate::domain::errors::{BlockLogError, BlockLogResult};
use crate::domain::frame::FrameHeader;
use crate::domain::metrics::BlockLogMetrics;
use crate::domain::repair::RegenerationReport;
use crate::ports::outbound::{DictionaryProvider, NoDictionaries};

/// Blocks decoded per batch by `for_each_block`.
pub const REPLAY_BATCH_SIZE: usize = 64;

/// Per-store behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub read_only: bool,
    pub compression: CompressionSettings,
    pub auto_fix: bool,
    pub flush: FlushPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            compression: CompressionSettings::default(),
            auto_fix: true,
            flush: FlushPolicy::LiveSyncOnly,
        }
    }
}

/// Collaborators injected by the owner of the store.
#[derive(Clone)]
pub struct StoreDependencies {
    pub dictionaries: Arc<dyn DictionaryProvider>,
    pub cancel: CancellationFlag,
    pub metrics: Arc<BlockLogMetrics>,
}

impl Default for StoreDependencies {
    fn default() -> Self {
        Self {
            dictionaries: Arc::new(NoDictionaries),
            cancel: CancellationFlag::new(),
            metrics: Arc::new(BlockLogMetrics::new()),
        }
    }
}

/// Why blocks are being iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPurpose {
    /// Latency-sensitive lookups; decoded on the calling thread.
    Random,
    /// Bulk replay; decompression may fan out over the worker pool.
    Replay,
}

/// A block exactly as stored, still compressed if it was stored that way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub block_num: u32,
    pub block_id: BlockId,
    pub attributes: CompressionAttributes,
    pub bytes: Vec<u8>,
}

/// Outcome of a full verification pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VerifyReport {
    pub blocks_checked: u64,
    pub first_block: Option<u32>,
    pub last_block: Option<u32>,
    pub compressed_blocks: u64,
    pub stored_bytes: u64,
    pub uncompressed_bytes: u64,
}

impl VerifyReport {
    /// Fold the report of the following part into this one.
    pub fn merge(&mut self, next: &VerifyReport) {
        self.blocks_checked += next.blocks_checked;
        self.compressed_blocks += next.compressed_blocks;
        self.stored_bytes += next.stored_bytes;
        self.uncompressed_bytes += next.uncompressed_bytes;
        if self.first_block.is_none() {
            self.first_block = next.first_block;
        }
        if next.last_block.is_some() {
            self.last_block = next.last_block;
        }
    }
}

pub struct BlockRecordStore {
    log: BlockLogFile,
    index: ArtifactsIndex,
    options: StoreOptions,
    compressor: ZstdCompressor,
    deps: StoreDependencies,
    head: RwLock<Option<BlockHandle>>,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for BlockRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRecordStore")
            .field("path", &self.log.path())
            .field("first_block_num", &self.first_block_num())
            .field("head_block_num", &self.head_block_num())
            .field("read_only", &self.options.read_only)
            .finish()
    }
}

impl BlockRecordStore {
    /// Open (creating if writable) the log at `log_path` and its artifacts
    /// file, repairing what the options allow.
    pub fn open_and_init(
        log_path: &Path,
        first_block_num: u32,
        options: StoreOptions,
        deps: &StoreDependencies,
    ) -> BlockLogResult<Self> {
        let log = BlockLogFile::open(log_path, options.read_only)?;

        let log_head = match log.inspect_tail()? {
            TailState::Empty => first_block_num - 1,
            TailState::Valid { header, .. } => {
                if header.block_num < first_block_num {
                    return Err(BlockLogError::conflict(format!(
                        "{} ends at block #{}, before its first block #{}",
                        log_path.display(),
                        header.block_num,
                        first_block_num
                    )));
                }
                header.block_num
            }
            TailState::Torn => Self::recover_torn_tail(&log, first_block_num, options, deps)?,
        };

        let (index, report) = ArtifactsIndex::open(
            &log,
            options.read_only,
            IndexTarget {
                first_block_num,
                head_block_num: log_head,
            },
            &deps.cancel,
        )?;
        if report.is_some() {
            deps.metrics.record_regeneration();
        }

        let store = Self {
            log,
            index,
            options,
            compressor: ZstdCompressor::new(options.compression.level),
            deps: deps.clone(),
            head: RwLock::new(None),
            append_lock: Mutex::new(()),
        };

        let head_num = store.index.head_block_num();
        if head_num >= first_block_num {
            let head = store.read_block_by_num(head_num)?;
            *store.head.write() = head;
        }

        debug!(
            "[qc-02] Opened {} (blocks #{}..=#{}, {})",
            log_path.display(),
            first_block_num,
            head_num,
            if options.read_only { "read-only" } else { "writable" }
        );
        Ok(store)
    }

    /// Handle a log whose last frame is incomplete. Returns the last intact
    /// block number.
    fn recover_torn_tail(
        log: &BlockLogFile,
        first_block_num: u32,
        options: StoreOptions,
        deps: &StoreDependencies,
    ) -> BlockLogResult<u32> {
        if !options.auto_fix {
            return Err(BlockLogError::corruption(
                log.path(),
                "log ends in an incomplete frame and auto_fix is disabled",
            ));
        }

        let (head, valid_end) = match ArtifactsIndex::last_confirmed_frame(log, first_block_num)? {
            Some(confirmed) => confirmed,
            None => {
                let mut head = first_block_num - 1;
                let outcome = log.scan(0, &deps.cancel, |_, frame| {
                    head = frame.block_num;
                    Ok(())
                })?;
                (head, outcome.valid_end)
            }
        };

        if options.read_only {
            warn!(
                "[qc-02] {} has {} bytes past block #{} (read-only, not truncated)",
                log.path().display(),
                log.len() - valid_end,
                head
            );
        } else {
            warn!(
                "[qc-02] Auto-fix: truncating {} from {} to {} bytes (last intact block #{})",
                log.path().display(),
                log.len(),
                valid_end,
                head
            );
            log.truncate(valid_end)?;
            deps.metrics.record_auto_fix();
        }
        Ok(head)
    }

    // =========================================================================
    // APPEND
    // =========================================================================

    /// Append the next block, compressing it per the configured settings.
    /// Returns the frame offset.
    pub fn append(&self, block: &BlockHandle, is_live_sync: bool) -> BlockLogResult<u64> {
        let (payload, attributes) = match (self.options.compression.enabled, block.compressed()) {
            (true, Some(stored)) => (stored.bytes.clone(), stored.attributes),
            (true, None) => self.compress(block.block_num(), block.uncompressed_bytes())?,
            (false, _) => (
                block.uncompressed_bytes().to_vec(),
                CompressionAttributes::UNCOMPRESSED,
            ),
        };
        self.write_frame(
            block.block_num(),
            block.id(),
            &payload,
            attributes,
            is_live_sync,
            Arc::clone(block),
        )
    }

    /// Append bytes already in stored form (`attributes` describe them).
    pub fn append_raw(
        &self,
        block_num: u32,
        bytes: Vec<u8>,
        attributes: CompressionAttributes,
        is_live_sync: bool,
    ) -> BlockLogResult<u64> {
        let uncompressed = self.decode_payload(&bytes, attributes)?;
        let compressed = attributes.is_compressed().then(|| CompressedBuffer {
            bytes: bytes.clone(),
            attributes,
        });
        let block = FullBlock::from_raw(uncompressed, compressed)
            .map_err(|source| BlockLogError::Decode { block_num, source })?;
        if block.block_num() != block_num {
            return Err(BlockLogError::OutOfOrderAppend {
                expected: block_num,
                actual: block.block_num(),
            });
        }
        let id = block.id();
        self.write_frame(
            block_num,
            id,
            &bytes,
            attributes,
            is_live_sync,
            block.into_handle(),
        )
    }

    fn write_frame(
        &self,
        block_num: u32,
        block_id: BlockId,
        payload: &[u8],
        attributes: CompressionAttributes,
        is_live_sync: bool,
        handle: BlockHandle,
    ) -> BlockLogResult<u64> {
        if self.options.read_only {
            return Err(BlockLogError::ReadOnly);
        }
        let _writer = self.append_lock.lock();

        let expected = self.index.head_block_num() + 1;
        if block_num != expected {
            return Err(BlockLogError::OutOfOrderAppend {
                expected,
                actual: block_num,
            });
        }

        let header = FrameHeader {
            block_num,
            attributes,
            payload_len: payload.len() as u32,
            block_id,
        };
        let offset = self.log.append_frame(&header, payload)?;
        if self.options.flush.sync_on_append(is_live_sync) {
            self.log.sync()?;
        }
        self.index.append(block_num, offset, attributes, block_id)?;

        self.deps
            .metrics
            .record_append(header.frame_len(), attributes.is_compressed());
        *self.head.write() = Some(handle);
        trace!(
            "[qc-02] Appended block #{} at offset {} ({} bytes, {:?})",
            block_num,
            offset,
            payload.len(),
            attributes.kind
        );
        Ok(offset)
    }

    fn dictionary(&self, number: u8) -> BlockLogResult<Arc<[u8]>> {
        self.deps
            .dictionaries
            .dictionary(number)
            .ok_or(BlockLogError::Compression(CompressionError::UnknownDictionary(
                number,
            )))
    }

    fn compress(
        &self,
        block_num: u32,
        data: &[u8],
    ) -> BlockLogResult<(Vec<u8>, CompressionAttributes)> {
        match self.deps.dictionaries.dictionary_for_block(block_num) {
            Some(number) => {
                let bytes = self.dictionary(number)?;
                let compressed = self.compressor.compress(
                    data,
                    Some(DictionaryRef {
                        number,
                        bytes: &bytes,
                    }),
                )?;
                Ok((compressed, CompressionAttributes::zstd(Some(number))))
            }
            None => Ok((
                self.compressor.compress(data, None)?,
                CompressionAttributes::zstd(None),
            )),
        }
    }

    fn decode_payload(
        &self,
        payload: &[u8],
        attributes: CompressionAttributes,
    ) -> BlockLogResult<Vec<u8>> {
        if !attributes.is_compressed() {
            return Ok(payload.to_vec());
        }
        match attributes.dictionary {
            Some(number) => {
                let bytes = self.dictionary(number)?;
                Ok(self.compressor.decompress(
                    payload,
                    Some(DictionaryRef {
                        number,
                        bytes: &bytes,
                    }),
                )?)
            }
            None => Ok(self.compressor.decompress(payload, None)?),
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read the frame a record points at and check it is the recorded block.
    fn read_stored(&self, block_num: u32, record: &ArtifactRecord) -> BlockLogResult<RawBlock> {
        let (header, payload) = self.log.read_frame(record.offset)?;
        if header.block_num != block_num || header.block_id != record.block_id {
            return Err(BlockLogError::corruption(
                self.log.path(),
                format!(
                    "frame at offset {} holds block #{} ({}), index expects #{} ({})",
                    record.offset, header.block_num, header.block_id, block_num, record.block_id
                ),
            ));
        }
        self.deps.metrics.record_read(header.frame_len());
        Ok(RawBlock {
            block_num,
            block_id: header.block_id,
            attributes: header.attributes,
            bytes: payload,
        })
    }

    /// Decompress and parse a stored block, checking its id.
    fn materialize(&self, raw: RawBlock) -> BlockLogResult<BlockHandle> {
        let uncompressed = self.decode_payload(&raw.bytes, raw.attributes)?;
        let compressed = raw.attributes.is_compressed().then(|| CompressedBuffer {
            bytes: raw.bytes,
            attributes: raw.attributes,
        });
        let block = FullBlock::from_raw(uncompressed, compressed).map_err(|source| {
            BlockLogError::Decode {
                block_num: raw.block_num,
                source,
            }
        })?;
        if block.id() != raw.block_id {
            return Err(BlockLogError::corruption(
                self.log.path(),
                format!(
                    "block #{} decodes to id {}, stored id {}",
                    raw.block_num,
                    block.id(),
                    raw.block_id
                ),
            ));
        }
        Ok(block.into_handle())
    }

    pub fn read_block_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockHandle>> {
        match self.read_raw_block_data_by_num(block_num)? {
            Some(raw) => self.materialize(raw).map(Some),
            None => Ok(None),
        }
    }

    /// The stored bytes of a block, without decompression.
    pub fn read_raw_block_data_by_num(&self, block_num: u32) -> BlockLogResult<Option<RawBlock>> {
        if !self.index.contains(block_num) {
            return Ok(None);
        }
        let record = self.index.read(block_num)?;
        self.read_stored(block_num, &record).map(Some)
    }

    /// Up to `count` blocks from `start`; shorter at the end of this part.
    pub fn read_block_range_by_num(
        &self,
        start: u32,
        count: u32,
    ) -> BlockLogResult<Vec<BlockHandle>> {
        let records = self.index.read_range(start, count)?;
        records
            .iter()
            .zip(start..)
            .map(|(record, block_num)| self.materialize(self.read_stored(block_num, record)?))
            .collect()
    }

    /// Visit blocks `first..=last` (clipped to this part) in order without
    /// materializing the range. Returns the number of blocks visited.
    ///
    /// With `ReadPurpose::Replay` and a pool, each batch is decompressed in
    /// parallel on the pool; visiting stays sequential. Cancellation is
    /// polled per block.
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
        let first = first.max(self.first_block_num());
        let last = last.min(self.index.head_block_num());
        let mut visited = 0u64;
        let mut next = first;

        while next <= last {
            let count = (last - next + 1).min(REPLAY_BATCH_SIZE as u32);
            let records = self.index.read_range(next, count)?;

            let mut raws = Vec::with_capacity(records.len());
            for (record, block_num) in records.iter().zip(next..) {
                if self.deps.cancel.is_cancelled() {
                    return Err(BlockLogError::Interrupted {
                        operation: "block iteration",
                    });
                }
                raws.push(self.read_stored(block_num, record)?);
            }

            let blocks: Vec<BlockHandle> = match (purpose, pool) {
                (ReadPurpose::Replay, Some(pool)) => pool.install(|| {
                    raws.into_par_iter()
                        .map(|raw| self.materialize(raw))
                        .collect::<BlockLogResult<Vec<_>>>()
                })?,
                _ => raws
                    .into_iter()
                    .map(|raw| self.materialize(raw))
                    .collect::<BlockLogResult<Vec<_>>>()?,
            };

            for block in blocks {
                if self.deps.cancel.is_cancelled() {
                    return Err(BlockLogError::Interrupted {
                        operation: "block iteration",
                    });
                }
                visited += 1;
                if visitor(block).is_break() {
                    return Ok(visited);
                }
            }
            next += count;
        }
        Ok(visited)
    }

    // =========================================================================
    // STATE
    // =========================================================================

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    pub fn artifacts_path(&self) -> &Path {
        self.index.path()
    }

    pub fn index(&self) -> &ArtifactsIndex {
        &self.index
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    pub fn first_block_num(&self) -> u32 {
        self.index.first_block_num()
    }

    pub fn head(&self) -> Option<BlockHandle> {
        self.head.read().clone()
    }

    /// `first_block_num - 1` when empty.
    pub fn head_block_num(&self) -> u32 {
        self.index.head_block_num()
    }

    pub fn head_block_id(&self) -> Option<BlockId> {
        self.head.read().as_ref().map(|b| b.id())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Id of a stored block, from the index alone.
    pub fn block_id_by_num(&self, block_num: u32) -> BlockLogResult<Option<BlockId>> {
        if !self.index.contains(block_num) {
            return Ok(None);
        }
        Ok(Some(self.index.read(block_num)?.block_id))
    }

    pub fn log_len(&self) -> u64 {
        self.log.len()
    }

    pub fn flush(&self) -> BlockLogResult<()> {
        let _writer = self.append_lock.lock();
        self.log.sync()?;
        self.index.sync()
    }

    /// Flush and mark the artifacts file cleanly closed. Idempotent.
    pub fn close(&self) -> BlockLogResult<()> {
        self.flush()?;
        self.index.close()
    }

    /// Decode every block and check it against the index.
    pub fn verify(&self) -> BlockLogResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let first = self.first_block_num();
        let last = self.head_block_num();
        let mut next = first;
        while next <= last {
            let count = (last - next + 1).min(REPLAY_BATCH_SIZE as u32);
            for (record, block_num) in self.index.read_range(next, count)?.iter().zip(next..) {
                if self.deps.cancel.is_cancelled() {
                    return Err(BlockLogError::Interrupted {
                        operation: "verification",
                    });
                }
                let raw = self.read_stored(block_num, record)?;
                report.stored_bytes += raw.bytes.len() as u64;
                if raw.attributes.is_compressed() {
                    report.compressed_blocks += 1;
                }
                let block = self.materialize(raw)?;
                report.uncompressed_bytes += block.uncompressed_size() as u64;
                report.blocks_checked += 1;
                report.first_block.get_or_insert(block_num);
                report.last_block = Some(block_num);
            }
            next += count;
        }
        info!(
            "[qc-02] Verified {} blocks in {}",
            report.blocks_checked,
            self.log.path().display()
        );
        Ok(report)
    }

    /// Regenerate this store's artifacts file offline. The store must be
    /// reopened afterwards.
    pub fn regenerate_artifacts(
        log_path: &Path,
        first_block_num: u32,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<RegenerationReport> {
        let log = BlockLogFile::open(log_path, false)?;
        ArtifactsIndex::rebuild(&log, first_block_num, cancel)
    }
}

#[cfg(test)]
mod tests;
