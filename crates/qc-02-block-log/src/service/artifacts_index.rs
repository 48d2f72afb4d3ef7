//! # Artifacts Index
//!
//! Fixed-record companion file giving O(1) lookup from block number to frame
//! offset, compression attributes and block id.
//!
//! ## Recovery on open
//!
//! | Condition                         | Writable                    | Read-only              |
//! |-----------------------------------|-----------------------------|------------------------|
//! | File missing                      | full generation from log    | `MissingArtifacts`     |
//! | Header invalid / file too short   | full generation             | `StorageCorruption`    |
//! | `first_block_num` differs         | `ConfigurationConflict`     | same                   |
//! | `dirty_close` set                 | check last record, else regenerate | warn, clamp     |
//! | index ahead of log                | truncate records            | clamp view             |
//! | log ahead of index                | generate trailing records   | clamp view             |
//!
//! Full generation writes a temporary file and renames it into place, so an
//! interrupted generation never leaves a partial index behind.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use shared_types::{BlockId, CancellationFlag, CompressionAttributes};
use tracing::{debug, info, warn};

use super::log_file::BlockLogFile;
use crate::adapters::fs::{read_exact_at, write_all_at};
use crate::domain::artifacts::{
    record_position, ArtifactRecord, ArtifactsHeader, ARTIFACTS_HEADER_SIZE, ARTIFACT_RECORD_SIZE,
};
use crate::domain::errors::{BlockLogError, BlockLogResult};
use crate::domain::naming::{artifacts_path, temp_path};
use crate::domain::repair::{RegenerationReason, RegenerationReport};

/// Byte offset of `head_block_num` inside the header.
const HEAD_FIELD_OFFSET: u64 = 16;

/// What the caller expects the index to cover.
#[derive(Debug, Clone, Copy)]
pub struct IndexTarget {
    pub first_block_num: u32,
    /// Last block present in the companion log (`first_block_num - 1` if empty)
    pub head_block_num: u32,
}

pub struct ArtifactsIndex {
    path: PathBuf,
    file: File,
    first_block_num: u32,
    head: AtomicU32,
    read_only: bool,
    /// Serializes appends and close; holds whether the file was closed.
    writer: Mutex<bool>,
}

impl std::fmt::Debug for ArtifactsIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactsIndex")
            .field("path", &self.path)
            .field("first_block_num", &self.first_block_num)
            .field("head", &self.head_block_num())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl ArtifactsIndex {
    /// Open (and if needed repair) the index of `log`.
    ///
    /// Returns the report of any regeneration performed.
    pub fn open(
        log: &BlockLogFile,
        read_only: bool,
        target: IndexTarget,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<(Self, Option<RegenerationReport>)> {
        let path = artifacts_path(log.path());

        if !path.exists() {
            if read_only {
                return Err(BlockLogError::MissingArtifacts { path });
            }
            info!(
                "[qc-02] Artifacts file {} missing, generating from log",
                path.display()
            );
            let report = Self::generate(&path, log, target, RegenerationReason::Missing, cancel)?;
            let index = Self::open_generated(path, target)?;
            return Ok((index, Some(report)));
        }

        let file = open_file(&path, read_only)?;
        let file_len = file
            .metadata()
            .map_err(BlockLogError::io(&path, 0, 0))?
            .len();

        let header = match read_header(&file, &path, file_len) {
            Ok(header) => header,
            Err(reason) if read_only => return Err(BlockLogError::corruption(&path, reason)),
            Err(reason) => {
                warn!(
                    "[qc-02] Artifacts file {} invalid ({}), regenerating",
                    path.display(),
                    reason
                );
                drop(file);
                let report =
                    Self::generate(&path, log, target, RegenerationReason::InvalidHeader, cancel)?;
                let index = Self::open_generated(path, target)?;
                return Ok((index, Some(report)));
            }
        };

        if header.first_block_num != target.first_block_num {
            return Err(BlockLogError::conflict(format!(
                "{} starts at block #{}, layout expects #{}",
                path.display(),
                header.first_block_num,
                target.first_block_num
            )));
        }

        let index = Self {
            path,
            file,
            first_block_num: header.first_block_num,
            head: AtomicU32::new(header.head_block_num),
            read_only,
            writer: Mutex::new(false),
        };
        let disk_head = index.head_from_length(file_len);

        if header.dirty_close {
            if read_only {
                let head = header.head_block_num.min(disk_head).min(target.head_block_num);
                warn!(
                    "[qc-02] Artifacts file {} was not closed cleanly; read-only view clamped to #{}",
                    index.path.display(),
                    head
                );
                index.head.store(head, Ordering::Release);
            } else {
                let candidate = disk_head.min(target.head_block_num);
                if index.record_matches_log(candidate, log)? {
                    debug!(
                        "[qc-02] Dirty artifacts file {} consistent up to #{}",
                        index.path.display(),
                        candidate
                    );
                    index.truncate_records(candidate)?;
                } else {
                    warn!(
                        "[qc-02] Dirty artifacts file {} disagrees with its log, regenerating",
                        index.path.display()
                    );
                    let Self { path, file, .. } = index;
                    drop(file);
                    let report =
                        Self::generate(&path, log, target, RegenerationReason::DirtyClose, cancel)?;
                    let index = Self::open_generated(path, target)?;
                    return Ok((index, Some(report)));
                }
            }
        } else if disk_head < header.head_block_num {
            let reason = format!(
                "header claims head #{} but file holds records up to #{}",
                header.head_block_num, disk_head
            );
            if read_only {
                return Err(BlockLogError::corruption(&index.path, reason));
            }
            warn!(
                "[qc-02] Artifacts file {} invalid ({}), regenerating",
                index.path.display(),
                reason
            );
            let Self { path, file, .. } = index;
            drop(file);
            let report =
                Self::generate(&path, log, target, RegenerationReason::InvalidHeader, cancel)?;
            let index = Self::open_generated(path, target)?;
            return Ok((index, Some(report)));
        }

        let mut report = None;
        let stored = index.head_block_num();
        if target.head_block_num < stored {
            if read_only {
                index.head.store(target.head_block_num, Ordering::Release);
            } else {
                info!(
                    "[qc-02] Truncating {} from #{} to #{}",
                    index.path.display(),
                    stored,
                    target.head_block_num
                );
                index.truncate_records(target.head_block_num)?;
            }
        } else if target.head_block_num > stored {
            if read_only {
                warn!(
                    "[qc-02] Log {} holds blocks up to #{} but its artifacts stop at #{}; read-only view clamped",
                    log.path().display(),
                    target.head_block_num,
                    stored
                );
            } else {
                report = Some(index.generate_trailing(log, target.head_block_num, cancel)?);
            }
        }

        if !read_only {
            index.write_header(true)?;
        }
        Ok((index, report))
    }

    /// Regenerate the index of `log` from scratch, replacing any existing
    /// file atomically.
    pub fn rebuild(
        log: &BlockLogFile,
        first_block_num: u32,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<RegenerationReport> {
        let path = artifacts_path(log.path());
        let mut last = first_block_num - 1;
        log.scan(0, cancel, |_, header| {
            last = header.block_num;
            Ok(())
        })?;
        let target = IndexTarget {
            first_block_num,
            head_block_num: last,
        };
        Self::generate(&path, log, target, RegenerationReason::Requested, cancel)
    }

    /// Find the newest block whose record in the (possibly stale) artifacts
    /// file of `log` points at a complete, verified frame, without opening
    /// the index for use.
    ///
    /// Returns `(block_num, end of its frame)`, `Some((first - 1, 0))` for an
    /// empty index, or `None` when the artifacts file is missing or useless.
    pub fn last_confirmed_frame(
        log: &BlockLogFile,
        first_block_num: u32,
    ) -> BlockLogResult<Option<(u32, u64)>> {
        const MAX_WALK_BACK: u32 = 64;

        let path = artifacts_path(log.path());
        let Ok(file) = open_file(&path, true) else {
            return Ok(None);
        };
        let file_len = file
            .metadata()
            .map_err(BlockLogError::io(&path, 0, 0))?
            .len();
        let Ok(header) = read_header(&file, &path, file_len) else {
            return Ok(None);
        };
        if header.first_block_num != first_block_num {
            return Ok(None);
        }

        let index = Self {
            path,
            file,
            first_block_num,
            head: AtomicU32::new(header.head_block_num),
            read_only: true,
            writer: Mutex::new(true),
        };
        // Records written after the last header update still count.
        let head = index.head_from_length(file_len);
        if head < first_block_num {
            return Ok(Some((first_block_num - 1, 0)));
        }

        let lowest = head.saturating_sub(MAX_WALK_BACK).max(first_block_num);
        for block_num in (lowest..=head).rev() {
            let Ok(record) = index.read_unchecked(block_num) else {
                continue;
            };
            if let Some(frame) = log.verified_header_at(record.offset)? {
                if frame.block_num == block_num && frame.block_id == record.block_id {
                    return Ok(Some((block_num, record.offset + frame.frame_len())));
                }
            }
        }
        Ok(None)
    }

    fn open_generated(path: PathBuf, target: IndexTarget) -> BlockLogResult<Self> {
        let file = open_file(&path, false)?;
        let index = Self {
            path,
            file,
            first_block_num: target.first_block_num,
            head: AtomicU32::new(target.head_block_num),
            read_only: false,
            writer: Mutex::new(false),
        };
        index.write_header(true)?;
        Ok(index)
    }

    /// Build a complete index for `log` into a temporary file, then rename
    /// it over `path`.
    fn generate(
        path: &Path,
        log: &BlockLogFile,
        target: IndexTarget,
        reason: RegenerationReason,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<RegenerationReport> {
        let started = Instant::now();
        let tmp = temp_path(path);
        let result = Self::write_generated(&tmp, log, target, reason, cancel);

        let mut report = match result {
            Ok(report) => report,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        report.path = path.to_path_buf();

        fs::rename(&tmp, path).map_err(BlockLogError::io(path, 0, 0))?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "[qc-02] Generated {} ({} records) in {}ms",
            path.display(),
            report.blocks_indexed,
            report.duration_ms
        );
        Ok(report)
    }

    fn write_generated(
        tmp: &Path,
        log: &BlockLogFile,
        target: IndexTarget,
        reason: RegenerationReason,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<RegenerationReport> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp)
            .map_err(BlockLogError::io(tmp, 0, 0))?;
        let mut writer = BufWriter::new(file);
        let mut header = ArtifactsHeader::new(target.first_block_num);
        writer
            .write_all(&header.encode())
            .map_err(BlockLogError::io(tmp, 0, ARTIFACTS_HEADER_SIZE as u64))?;

        let mut report = RegenerationReport::new(tmp.to_path_buf(), reason);
        let mut next = target.first_block_num;
        log.scan(0, cancel, |offset, frame| {
            if next > target.head_block_num {
                return Ok(());
            }
            check_sequence(log, frame.block_num, next, target.first_block_num)?;
            let record = ArtifactRecord {
                offset,
                attributes: frame.attributes,
                block_id: frame.block_id,
            };
            writer.write_all(&record.encode()).map_err(BlockLogError::io(
                tmp,
                record_position(target.first_block_num, next),
                ARTIFACT_RECORD_SIZE as u64,
            ))?;
            report.add_block(next, offset + frame.frame_len());
            next += 1;
            Ok(())
        })?;

        if next - 1 != target.head_block_num {
            return Err(BlockLogError::corruption(
                log.path(),
                format!(
                    "log frames end at #{}, expected #{}",
                    next - 1,
                    target.head_block_num
                ),
            ));
        }

        let file = writer
            .into_inner()
            .map_err(|e| BlockLogError::io(tmp, 0, 0)(e.into_error()))?;
        header.head_block_num = target.head_block_num;
        write_all_at(&file, &header.encode(), 0)
            .map_err(BlockLogError::io(tmp, 0, ARTIFACTS_HEADER_SIZE as u64))?;
        file.sync_all().map_err(BlockLogError::io(tmp, 0, 0))?;
        Ok(report)
    }

    /// Index frames appended to the log after the current head.
    fn generate_trailing(
        &self,
        log: &BlockLogFile,
        target_head: u32,
        cancel: &CancellationFlag,
    ) -> BlockLogResult<RegenerationReport> {
        let started = Instant::now();
        let stored = self.head_block_num();
        let start = if stored < self.first_block_num {
            0
        } else {
            let record = self.read(stored)?;
            record.offset + log.read_frame_header(record.offset)?.frame_len()
        };

        let mut report =
            RegenerationReport::new(self.path.clone(), RegenerationReason::TrailingRecords);
        let mut next = stored + 1;
        log.scan(start, cancel, |offset, frame| {
            if next > target_head {
                return Ok(());
            }
            check_sequence(log, frame.block_num, next, self.first_block_num)?;
            self.write_record(
                next,
                &ArtifactRecord {
                    offset,
                    attributes: frame.attributes,
                    block_id: frame.block_id,
                },
            )?;
            report.add_block(next, offset + frame.frame_len());
            next += 1;
            Ok(())
        })?;

        if next - 1 != target_head {
            return Err(BlockLogError::corruption(
                log.path(),
                format!("log frames end at #{}, expected #{}", next - 1, target_head),
            ));
        }
        self.head.store(target_head, Ordering::Release);
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "[qc-02] Indexed {} trailing blocks of {} (#{}..=#{})",
            report.blocks_indexed,
            log.path().display(),
            stored + 1,
            target_head
        );
        Ok(report)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn first_block_num(&self) -> u32 {
        self.first_block_num
    }

    /// Last indexed block (`first_block_num - 1` when empty).
    #[inline]
    pub fn head_block_num(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.head_block_num() < self.first_block_num
    }

    /// Number of records.
    pub fn len(&self) -> u64 {
        u64::from(self.head_block_num()) + 1 - u64::from(self.first_block_num)
    }

    pub fn contains(&self, block_num: u32) -> bool {
        block_num >= self.first_block_num && block_num <= self.head_block_num()
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Record for `block_num`; `OutOfRange` outside `[first, head]`.
    pub fn read(&self, block_num: u32) -> BlockLogResult<ArtifactRecord> {
        let head = self.head_block_num();
        if block_num < self.first_block_num || block_num > head {
            return Err(BlockLogError::OutOfRange {
                block_num,
                first: self.first_block_num,
                head,
            });
        }
        self.read_unchecked(block_num)
    }

    fn read_unchecked(&self, block_num: u32) -> BlockLogResult<ArtifactRecord> {
        let position = record_position(self.first_block_num, block_num);
        let mut buf = [0u8; ARTIFACT_RECORD_SIZE];
        read_exact_at(&self.file, &mut buf, position).map_err(BlockLogError::io(
            &self.path,
            position,
            ARTIFACT_RECORD_SIZE as u64,
        ))?;
        ArtifactRecord::decode(&buf).map_err(|e| {
            BlockLogError::corruption(&self.path, format!("record for block #{block_num}: {e}"))
        })
    }

    /// Records for `count` blocks from `start`, clipped to the head.
    pub fn read_range(&self, start: u32, count: u32) -> BlockLogResult<Vec<ArtifactRecord>> {
        let head = self.head_block_num();
        if count == 0 || start < self.first_block_num || start > head {
            return Ok(Vec::new());
        }
        let last = head.min(start.saturating_add(count - 1));
        let n = (last - start + 1) as usize;

        let position = record_position(self.first_block_num, start);
        let mut buf = vec![0u8; n * ARTIFACT_RECORD_SIZE];
        read_exact_at(&self.file, &mut buf, position).map_err(BlockLogError::io(
            &self.path,
            position,
            buf.len() as u64,
        ))?;

        buf.chunks_exact(ARTIFACT_RECORD_SIZE)
            .zip(start..)
            .map(|(chunk, block_num)| {
                let mut raw = [0u8; ARTIFACT_RECORD_SIZE];
                raw.copy_from_slice(chunk);
                ArtifactRecord::decode(&raw).map_err(|e| {
                    BlockLogError::corruption(
                        &self.path,
                        format!("record for block #{block_num}: {e}"),
                    )
                })
            })
            .collect()
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Append the record for the next block. The block's frame must already
    /// be written to the log.
    pub fn append(
        &self,
        block_num: u32,
        offset: u64,
        attributes: CompressionAttributes,
        block_id: BlockId,
    ) -> BlockLogResult<()> {
        if self.read_only {
            return Err(BlockLogError::ReadOnly);
        }
        let closed = self.writer.lock();
        if *closed {
            return Err(BlockLogError::NotOpen);
        }

        let expected = self.head_block_num() + 1;
        if block_num != expected {
            return Err(BlockLogError::OutOfOrderAppend {
                expected,
                actual: block_num,
            });
        }

        self.write_record(
            block_num,
            &ArtifactRecord {
                offset,
                attributes,
                block_id,
            },
        )?;
        write_all_at(&self.file, &block_num.to_le_bytes(), HEAD_FIELD_OFFSET)
            .map_err(BlockLogError::io(&self.path, HEAD_FIELD_OFFSET, 4))?;
        self.head.store(block_num, Ordering::Release);
        Ok(())
    }

    fn write_record(&self, block_num: u32, record: &ArtifactRecord) -> BlockLogResult<()> {
        let position = record_position(self.first_block_num, block_num);
        write_all_at(&self.file, &record.encode(), position).map_err(BlockLogError::io(
            &self.path,
            position,
            ARTIFACT_RECORD_SIZE as u64,
        ))
    }

    fn write_header(&self, dirty_close: bool) -> BlockLogResult<()> {
        let mut header = ArtifactsHeader::new(self.first_block_num);
        header.head_block_num = self.head_block_num();
        header.dirty_close = dirty_close;
        write_all_at(&self.file, &header.encode(), 0).map_err(BlockLogError::io(
            &self.path,
            0,
            ARTIFACTS_HEADER_SIZE as u64,
        ))?;
        self.file
            .sync_data()
            .map_err(BlockLogError::io(&self.path, 0, 0))
    }

    /// Drop every record after `head`.
    fn truncate_records(&self, head: u32) -> BlockLogResult<()> {
        let end = record_position(self.first_block_num, head + 1);
        self.file
            .set_len(end)
            .map_err(BlockLogError::io(&self.path, end, 0))?;
        self.head.store(head, Ordering::Release);
        Ok(())
    }

    pub fn sync(&self) -> BlockLogResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file
            .sync_data()
            .map_err(BlockLogError::io(&self.path, 0, 0))
    }

    /// Clear `dirty_close` and flush. Idempotent.
    pub fn close(&self) -> BlockLogResult<()> {
        let mut closed = self.writer.lock();
        if *closed || self.read_only {
            *closed = true;
            return Ok(());
        }
        self.write_header(false)?;
        *closed = true;
        debug!(
            "[qc-02] Closed {} at #{}",
            self.path.display(),
            self.head_block_num()
        );
        Ok(())
    }

    // =========================================================================
    // CONSISTENCY HELPERS
    // =========================================================================

    fn head_from_length(&self, file_len: u64) -> u32 {
        let records = file_len.saturating_sub(ARTIFACTS_HEADER_SIZE as u64)
            / ARTIFACT_RECORD_SIZE as u64;
        let head = u64::from(self.first_block_num) - 1 + records;
        head.min(u64::from(u32::MAX)) as u32
    }

    /// Whether the record for `block_num` points at a verified log frame of
    /// the same block. Trivially true for an empty range.
    fn record_matches_log(&self, block_num: u32, log: &BlockLogFile) -> BlockLogResult<bool> {
        if block_num < self.first_block_num {
            return Ok(true);
        }
        let record = match self.read_unchecked(block_num) {
            Ok(record) => record,
            Err(BlockLogError::StorageCorruption { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(match log.verified_header_at(record.offset)? {
            Some(frame) => {
                frame.block_num == block_num
                    && frame.block_id == record.block_id
                    && frame.attributes == record.attributes
            }
            None => false,
        })
    }
}

fn open_file(path: &Path, read_only: bool) -> BlockLogResult<File> {
    OpenOptions::new()
        .read(true)
        .write(!read_only)
        .open(path)
        .map_err(BlockLogError::io(path, 0, 0))
}

/// Decode the header; a failure is returned as a reason string.
fn read_header(file: &File, path: &Path, file_len: u64) -> Result<ArtifactsHeader, String> {
    if file_len < ARTIFACTS_HEADER_SIZE as u64 {
        return Err(format!("file too short for a header ({file_len} bytes)"));
    }
    let mut buf = [0u8; ARTIFACTS_HEADER_SIZE];
    read_exact_at(file, &mut buf, 0)
        .map_err(|e| format!("cannot read header of {}: {e}", path.display()))?;
    ArtifactsHeader::decode(&buf).map_err(|e| e.to_string())
}

/// Frames must be consecutive from the part's first block.
fn check_sequence(
    log: &BlockLogFile,
    found: u32,
    expected: u32,
    first_block_num: u32,
) -> BlockLogResult<()> {
    if found == expected {
        return Ok(());
    }
    if expected == first_block_num {
        return Err(BlockLogError::conflict(format!(
            "{} starts at block #{}, layout expects #{}",
            log.path().display(),
            found,
            first_block_num
        )));
    }
    Err(BlockLogError::corruption(
        log.path(),
        format!("frame sequence broken: expected block #{expected}, found #{found}"),
    ))
}
