//! # Log Frame Format
//!
//! Every block in a log file is stored as one self-describing frame:
//!
//! ```text
//! offset  size  field
//! 0       4     block_num          (LE)
//! 4       1     flags              bit0 = zstd, bit1 = has dictionary
//! 5       1     dictionary number
//! 6       2     magic 0xB10C       (LE)
//! 8       4     payload_len        (LE)
//! 12      20    block_id
//! 32      N     payload            (possibly compressed block bytes)
//! 32+N    4     crc32 over header + payload (LE)
//! 36+N    8     start offset of this frame  (LE)
//! ```
//!
//! The trailer repeats the frame's own start offset so the last frame of a
//! file can be found by reading backward from the end.

use shared_types::{BlockId, CompressionAttributes, CompressionKind};
use thiserror::Error;

pub const FRAME_MAGIC: u16 = 0xB10C;
pub const FRAME_HEADER_SIZE: usize = 32;
pub const FRAME_TRAILER_SIZE: usize = 12;
pub const FRAME_OVERHEAD: u64 = (FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE) as u64;

const FLAG_ZSTD: u8 = 0b0000_0001;
const FLAG_DICTIONARY: u8 = 0b0000_0010;
const KNOWN_FLAGS: u8 = FLAG_ZSTD | FLAG_DICTIONARY;

/// Malformed frame or record bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("bad frame magic {found:#06x}")]
    BadMagic { found: u16 },

    #[error("unknown compression flags {0:#04x}")]
    UnknownFlags(u8),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("trailer names start offset {stored}, frame is at {actual}")]
    OffsetMismatch { stored: u64, actual: u64 },

    #[error("frame image of {len} bytes, header requires {needed}")]
    Truncated { len: usize, needed: u64 },
}

/// Pack compression attributes into `(flags, dictionary)` bytes.
pub fn attributes_to_bytes(attributes: CompressionAttributes) -> (u8, u8) {
    match (attributes.kind, attributes.dictionary) {
        (CompressionKind::None, _) => (0, 0),
        (CompressionKind::Zstd, None) => (FLAG_ZSTD, 0),
        (CompressionKind::Zstd, Some(n)) => (FLAG_ZSTD | FLAG_DICTIONARY, n),
    }
}

/// Inverse of [`attributes_to_bytes`].
pub fn attributes_from_bytes(flags: u8, dictionary: u8) -> Result<CompressionAttributes, FrameError> {
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FrameError::UnknownFlags(flags));
    }
    match (flags & FLAG_ZSTD != 0, flags & FLAG_DICTIONARY != 0) {
        (false, false) => Ok(CompressionAttributes::UNCOMPRESSED),
        (true, false) => Ok(CompressionAttributes::zstd(None)),
        (true, true) => Ok(CompressionAttributes::zstd(Some(dictionary))),
        (false, true) => Err(FrameError::UnknownFlags(flags)),
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub block_num: u32,
    pub attributes: CompressionAttributes,
    pub payload_len: u32,
    pub block_id: BlockId,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        let (flags, dictionary) = attributes_to_bytes(self.attributes);
        buf[0..4].copy_from_slice(&self.block_num.to_le_bytes());
        buf[4] = flags;
        buf[5] = dictionary;
        buf[6..8].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..32].copy_from_slice(self.block_id.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, FrameError> {
        let magic = u16::from_le_bytes([buf[6], buf[7]]);
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic { found: magic });
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&buf[12..32]);
        Ok(Self {
            block_num: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            attributes: attributes_from_bytes(buf[4], buf[5])?,
            payload_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            block_id: BlockId(id),
        })
    }

    /// Total on-disk length of the frame this header starts.
    pub fn frame_len(&self) -> u64 {
        FRAME_OVERHEAD + u64::from(self.payload_len)
    }
}

/// Decoded frame trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTrailer {
    pub crc: u32,
    pub start_offset: u64,
}

impl FrameTrailer {
    pub fn decode(buf: &[u8; FRAME_TRAILER_SIZE]) -> Self {
        let mut crc = [0u8; 4];
        let mut offset = [0u8; 8];
        crc.copy_from_slice(&buf[0..4]);
        offset.copy_from_slice(&buf[4..12]);
        Self {
            crc: u32::from_le_bytes(crc),
            start_offset: u64::from_le_bytes(offset),
        }
    }
}

fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    hasher.finalize()
}

/// Serialize a complete frame starting at `start_offset`.
pub fn encode_frame(header: &FrameHeader, payload: &[u8], start_offset: u64) -> Vec<u8> {
    let header_bytes = header.encode();
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + payload.len());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum(&header_bytes, payload).to_le_bytes());
    frame.extend_from_slice(&start_offset.to_le_bytes());
    frame
}

/// Check a full frame image (header + payload + trailer) read from
/// `start_offset`, returning its header.
pub fn verify_frame(frame: &[u8], start_offset: u64) -> Result<FrameHeader, FrameError> {
    if frame.len() < FRAME_OVERHEAD as usize {
        return Err(FrameError::Truncated {
            len: frame.len(),
            needed: FRAME_OVERHEAD,
        });
    }
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    header_bytes.copy_from_slice(&frame[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::decode(&header_bytes)?;
    if frame.len() as u64 != header.frame_len() {
        return Err(FrameError::Truncated {
            len: frame.len(),
            needed: header.frame_len(),
        });
    }

    let payload_end = FRAME_HEADER_SIZE + header.payload_len as usize;
    let payload = &frame[FRAME_HEADER_SIZE..payload_end];

    let mut trailer_bytes = [0u8; FRAME_TRAILER_SIZE];
    trailer_bytes.copy_from_slice(&frame[payload_end..payload_end + FRAME_TRAILER_SIZE]);
    let trailer = FrameTrailer::decode(&trailer_bytes);

    let computed = checksum(&header_bytes, payload);
    if computed != trailer.crc {
        return Err(FrameError::ChecksumMismatch {
            stored: trailer.crc,
            computed,
        });
    }
    if trailer.start_offset != start_offset {
        return Err(FrameError::OffsetMismatch {
            stored: trailer.start_offset,
            actual: start_offset,
        });
    }
    Ok(header)
}
