//! # Log File
//!
//! One append-only file of block frames. Readers use positional reads and
//! may run concurrently with the single writer; the committed length is
//! published with release ordering only after a frame is fully written.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use shared_types::CancellationFlag;
use tracing::{debug, warn};

use crate::adapters::fs::{map_read_only, read_exact_at, write_all_at};
use crate::domain::errors::{BlockLogError, BlockLogResult};
use crate::domain::frame::{
    encode_frame, verify_frame, FrameHeader, FrameTrailer, FRAME_HEADER_SIZE, FRAME_OVERHEAD,
    FRAME_TRAILER_SIZE,
};

/// State of the last frame in a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Empty,
    /// The file ends exactly at the end of a verified frame.
    Valid { offset: u64, header: FrameHeader },
    /// The file does not end on a frame boundary (crash mid-write).
    Torn,
}

/// Outcome of a forward scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Frames visited
    pub frames: u64,
    /// End of the last verified frame
    pub valid_end: u64,
}

pub struct BlockLogFile {
    path: PathBuf,
    file: File,
    len: AtomicU64,
    read_only: bool,
}

impl BlockLogFile {
    /// Open `path`; created when writable and missing.
    pub fn open(path: &Path, read_only: bool) -> BlockLogResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(path)
            .map_err(BlockLogError::io(path, 0, 0))?;
        let len = file
            .metadata()
            .map_err(BlockLogError::io(path, 0, 0))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len: AtomicU64::new(len),
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Committed length.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> BlockLogResult<()> {
        read_exact_at(&self.file, buf, offset)
            .map_err(BlockLogError::io(&self.path, offset, buf.len() as u64))
    }

    /// Decode the frame header at `offset` without verifying the payload.
    pub fn read_frame_header(&self, offset: u64) -> BlockLogResult<FrameHeader> {
        let len = self.len();
        if offset + FRAME_OVERHEAD > len {
            return Err(BlockLogError::corruption(
                &self.path,
                format!("frame at offset {offset} extends past end of log ({len} bytes)"),
            ));
        }
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.read_at(&mut buf, offset)?;
        FrameHeader::decode(&buf).map_err(|e| {
            BlockLogError::corruption(&self.path, format!("frame at offset {offset}: {e}"))
        })
    }

    /// Read and verify the frame at `offset`, returning its header and
    /// payload.
    pub fn read_frame(&self, offset: u64) -> BlockLogResult<(FrameHeader, Vec<u8>)> {
        let header = self.read_frame_header(offset)?;
        let frame_len = header.frame_len();
        if offset + frame_len > self.len() {
            return Err(BlockLogError::corruption(
                &self.path,
                format!(
                    "frame at offset {offset} ({frame_len} bytes) extends past end of log"
                ),
            ));
        }

        let mut frame = vec![0u8; frame_len as usize];
        self.read_at(&mut frame, offset)?;
        verify_frame(&frame, offset).map_err(|e| {
            BlockLogError::corruption(&self.path, format!("frame at offset {offset}: {e}"))
        })?;

        frame.truncate(FRAME_HEADER_SIZE + header.payload_len as usize);
        frame.drain(..FRAME_HEADER_SIZE);
        Ok((header, frame))
    }

    /// Append one frame. Single writer only. Returns the frame's offset.
    pub fn append_frame(&self, header: &FrameHeader, payload: &[u8]) -> BlockLogResult<u64> {
        if self.read_only {
            return Err(BlockLogError::ReadOnly);
        }
        let offset = self.len();
        let frame = encode_frame(header, payload, offset);
        write_all_at(&self.file, &frame, offset)
            .map_err(BlockLogError::io(&self.path, offset, frame.len() as u64))?;
        self.len.store(offset + frame.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Force written frames to stable storage.
    pub fn sync(&self) -> BlockLogResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file
            .sync_data()
            .map_err(BlockLogError::io(&self.path, self.len(), 0))
    }

    /// Cut the file back to `new_len`.
    pub fn truncate(&self, new_len: u64) -> BlockLogResult<()> {
        if self.read_only {
            return Err(BlockLogError::ReadOnly);
        }
        let old_len = self.len();
        self.file
            .set_len(new_len)
            .map_err(BlockLogError::io(&self.path, new_len, old_len.saturating_sub(new_len)))?;
        self.file
            .sync_all()
            .map_err(BlockLogError::io(&self.path, new_len, 0))?;
        self.len.store(new_len, Ordering::Release);
        debug!(
            "[qc-02] Truncated {} from {} to {} bytes",
            self.path.display(),
            old_len,
            new_len
        );
        Ok(())
    }

    /// Locate and verify the last frame using the trailer's back-pointer.
    pub fn inspect_tail(&self) -> BlockLogResult<TailState> {
        let len = self.len();
        if len == 0 {
            return Ok(TailState::Empty);
        }
        if len < FRAME_OVERHEAD {
            return Ok(TailState::Torn);
        }

        let mut trailer = [0u8; FRAME_TRAILER_SIZE];
        self.read_at(&mut trailer, len - FRAME_TRAILER_SIZE as u64)?;
        let start = FrameTrailer::decode(&trailer).start_offset;
        if start > len - FRAME_OVERHEAD {
            return Ok(TailState::Torn);
        }

        match self.verified_header_at(start)? {
            Some(header) if start + header.frame_len() == len => Ok(TailState::Valid {
                offset: start,
                header,
            }),
            _ => Ok(TailState::Torn),
        }
    }

    /// Header of the frame at `offset` if the whole frame is present and its
    /// checksum holds; `None` otherwise. I/O failures still propagate.
    pub fn verified_header_at(&self, offset: u64) -> BlockLogResult<Option<FrameHeader>> {
        let len = self.len();
        if offset + FRAME_OVERHEAD > len {
            return Ok(None);
        }
        let mut head = [0u8; FRAME_HEADER_SIZE];
        self.read_at(&mut head, offset)?;
        let header = match FrameHeader::decode(&head) {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };
        if offset + header.frame_len() > len {
            return Ok(None);
        }
        let mut frame = vec![0u8; header.frame_len() as usize];
        self.read_at(&mut frame, offset)?;
        Ok(verify_frame(&frame, offset).ok())
    }

    /// Walk verified frames forward from `from` through a read-only map,
    /// stopping at the first frame that is incomplete or fails its checksum.
    ///
    /// `cancel` is polled once per frame.
    pub fn scan<F>(
        &self,
        from: u64,
        cancel: &CancellationFlag,
        mut visit: F,
    ) -> BlockLogResult<ScanOutcome>
    where
        F: FnMut(u64, &FrameHeader) -> BlockLogResult<()>,
    {
        let map = map_read_only(&self.file).map_err(BlockLogError::io(&self.path, 0, self.len()))?;
        let data: &[u8] = map.as_deref().unwrap_or(&[]);
        let end = (self.len() as usize).min(data.len());

        let mut offset = from as usize;
        let mut frames = 0u64;
        while offset + FRAME_OVERHEAD as usize <= end {
            if cancel.is_cancelled() {
                return Err(BlockLogError::Interrupted {
                    operation: "log scan",
                });
            }

            let mut head = [0u8; FRAME_HEADER_SIZE];
            head.copy_from_slice(&data[offset..offset + FRAME_HEADER_SIZE]);
            let Ok(header) = FrameHeader::decode(&head) else {
                break;
            };
            let frame_end = offset + header.frame_len() as usize;
            if frame_end > end || verify_frame(&data[offset..frame_end], offset as u64).is_err() {
                break;
            }

            visit(offset as u64, &header)?;
            frames += 1;
            offset = frame_end;
        }

        if offset < end {
            warn!(
                "[qc-02] Scan of {} stopped at offset {} of {} (unverifiable frame)",
                self.path.display(),
                offset,
                end
            );
        }

        Ok(ScanOutcome {
            frames,
            valid_end: offset as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BlockId, CompressionAttributes};
    use tempfile::TempDir;

    fn header(block_num: u32, payload_len: usize) -> FrameHeader {
        FrameHeader {
            block_num,
            attributes: CompressionAttributes::UNCOMPRESSED,
            payload_len: payload_len as u32,
            block_id: BlockId::from_parts(block_num, &[block_num as u8; 32]),
        }
    }

    fn write_frames(log: &BlockLogFile, count: u32) -> Vec<u64> {
        (1..=count)
            .map(|n| {
                let payload = vec![n as u8; 10 + n as usize];
                log.append_frame(&header(n, payload.len()), &payload).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = BlockLogFile::open(&dir.path().join("block_log"), false).unwrap();
        let offsets = write_frames(&log, 3);

        assert_eq!(offsets[0], 0);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));

        let (h, payload) = log.read_frame(offsets[1]).unwrap();
        assert_eq!(h.block_num, 2);
        assert_eq!(payload, vec![2u8; 12]);
    }

    #[test]
    fn test_tail_valid_then_torn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block_log");
        let log = BlockLogFile::open(&path, false).unwrap();
        assert_eq!(log.inspect_tail().unwrap(), TailState::Empty);

        let offsets = write_frames(&log, 2);
        match log.inspect_tail().unwrap() {
            TailState::Valid { offset, header } => {
                assert_eq!(offset, offsets[1]);
                assert_eq!(header.block_num, 2);
            }
            other => panic!("expected valid tail, got {other:?}"),
        }

        log.truncate(log.len() - 5).unwrap();
        assert_eq!(log.inspect_tail().unwrap(), TailState::Torn);
    }

    #[test]
    fn test_scan_stops_at_torn_frame() {
        let dir = TempDir::new().unwrap();
        let log = BlockLogFile::open(&dir.path().join("block_log"), false).unwrap();
        let offsets = write_frames(&log, 4);
        log.truncate(log.len() - 3).unwrap();

        let mut seen = Vec::new();
        let outcome = log
            .scan(0, &CancellationFlag::new(), |offset, h| {
                seen.push((offset, h.block_num));
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome.frames, 3);
        assert_eq!(outcome.valid_end, offsets[3]);
        assert_eq!(seen.last(), Some(&(offsets[2], 3)));
    }

    #[test]
    fn test_scan_honours_cancellation() {
        let dir = TempDir::new().unwrap();
        let log = BlockLogFile::open(&dir.path().join("block_log"), false).unwrap();
        write_frames(&log, 2);

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = log.scan(0, &cancel, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, BlockLogError::Interrupted { .. }));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block_log");
        {
            let log = BlockLogFile::open(&path, false).unwrap();
            write_frames(&log, 1);
        }
        let log = BlockLogFile::open(&path, true).unwrap();
        let payload = [0u8; 4];
        assert!(matches!(
            log.append_frame(&header(2, 4), &payload),
            Err(BlockLogError::ReadOnly)
        ));
        assert_eq!(log.read_frame(0).unwrap().0.block_num, 1);
    }

    #[test]
    fn test_corrupted_frame_is_storage_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block_log");
        let log = BlockLogFile::open(&path, false).unwrap();
        write_frames(&log, 1);
        write_all_at(&log.file, &[0xFF], FRAME_HEADER_SIZE as u64 + 1).unwrap();

        let err = log.read_frame(0).unwrap_err();
        assert!(matches!(err, BlockLogError::StorageCorruption { .. }));
    }
}
