//! # Artifacts File Format
//!
//! The artifacts file is a fixed-record index beside each log file:
//!
//! ```text
//! header (24 bytes)
//!   0   4  magic "QCBA"
//!   4   4  tool_version     (LE)
//!   8   2  format_major     (LE)
//!   10  2  format_minor     (LE)
//!   12  4  first_block_num  (LE)
//!   16  4  head_block_num   (LE)  first_block_num - 1 when empty
//!   20  1  dirty_close
//!   21  3  reserved
//! record (32 bytes) for block n at 24 + (n - first_block_num) * 32
//!   0   8  frame offset in the log (LE)
//!   8   1  compression flags
//!   9   1  dictionary number
//!   10  2  reserved
//!   12  20 block_id
//! ```

use shared_types::{BlockId, CompressionAttributes};
use thiserror::Error;

use super::frame::{attributes_from_bytes, attributes_to_bytes, FrameError};

pub const ARTIFACTS_MAGIC: [u8; 4] = *b"QCBA";
pub const ARTIFACTS_HEADER_SIZE: usize = 24;
pub const ARTIFACT_RECORD_SIZE: usize = 32;

/// Version of the writing tool, recorded for diagnostics only.
pub const TOOL_VERSION: u32 = 1;
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 0;

/// Header validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("bad artifacts magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported artifacts format {major}.{minor} (supported {FORMAT_MAJOR}.{FORMAT_MINOR})")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("head #{head} precedes first block #{first}")]
    InvalidRange { first: u32, head: u32 },

    #[error("artifacts file too short for a header ({0} bytes)")]
    TooShort(u64),
}

/// Decoded artifacts file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactsHeader {
    pub tool_version: u32,
    pub format_major: u16,
    pub format_minor: u16,
    pub first_block_num: u32,
    pub head_block_num: u32,
    pub dirty_close: bool,
}

impl ArtifactsHeader {
    /// Header of an empty index starting at `first_block_num`.
    pub fn new(first_block_num: u32) -> Self {
        Self {
            tool_version: TOOL_VERSION,
            format_major: FORMAT_MAJOR,
            format_minor: FORMAT_MINOR,
            first_block_num,
            head_block_num: first_block_num - 1,
            dirty_close: false,
        }
    }

    /// Number of records the header claims.
    pub fn record_count(&self) -> u64 {
        u64::from(self.head_block_num) + 1 - u64::from(self.first_block_num)
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Byte position of the record for `block_num`.
    pub fn record_position(&self, block_num: u32) -> u64 {
        record_position(self.first_block_num, block_num)
    }

    pub fn encode(&self) -> [u8; ARTIFACTS_HEADER_SIZE] {
        let mut buf = [0u8; ARTIFACTS_HEADER_SIZE];
        buf[0..4].copy_from_slice(&ARTIFACTS_MAGIC);
        buf[4..8].copy_from_slice(&self.tool_version.to_le_bytes());
        buf[8..10].copy_from_slice(&self.format_major.to_le_bytes());
        buf[10..12].copy_from_slice(&self.format_minor.to_le_bytes());
        buf[12..16].copy_from_slice(&self.first_block_num.to_le_bytes());
        buf[16..20].copy_from_slice(&self.head_block_num.to_le_bytes());
        buf[20] = u8::from(self.dirty_close);
        buf
    }

    /// Decode and validate. Never accepts a version it cannot interpret.
    pub fn decode(buf: &[u8; ARTIFACTS_HEADER_SIZE]) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != ARTIFACTS_MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }

        let header = Self {
            tool_version: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            format_major: u16::from_le_bytes([buf[8], buf[9]]),
            format_minor: u16::from_le_bytes([buf[10], buf[11]]),
            first_block_num: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            head_block_num: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            dirty_close: buf[20] != 0,
        };

        if header.format_major != FORMAT_MAJOR || header.format_minor > FORMAT_MINOR {
            return Err(HeaderError::UnsupportedVersion {
                major: header.format_major,
                minor: header.format_minor,
            });
        }
        if header.first_block_num == 0
            || u64::from(header.head_block_num) + 1 < u64::from(header.first_block_num)
        {
            return Err(HeaderError::InvalidRange {
                first: header.first_block_num,
                head: header.head_block_num,
            });
        }
        Ok(header)
    }
}

/// Byte position of the record for `block_num` in an index starting at
/// `first_block_num`.
#[inline]
pub fn record_position(first_block_num: u32, block_num: u32) -> u64 {
    ARTIFACTS_HEADER_SIZE as u64
        + u64::from(block_num - first_block_num) * ARTIFACT_RECORD_SIZE as u64
}

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Start of the block's frame in the log
    pub offset: u64,
    pub attributes: CompressionAttributes,
    pub block_id: BlockId,
}

impl ArtifactRecord {
    pub fn encode(&self) -> [u8; ARTIFACT_RECORD_SIZE] {
        let mut buf = [0u8; ARTIFACT_RECORD_SIZE];
        let (flags, dictionary) = attributes_to_bytes(self.attributes);
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8] = flags;
        buf[9] = dictionary;
        buf[12..32].copy_from_slice(self.block_id.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8; ARTIFACT_RECORD_SIZE]) -> Result<Self, FrameError> {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[0..8]);
        let mut id = [0u8; 20];
        id.copy_from_slice(&buf[12..32]);
        Ok(Self {
            offset: u64::from_le_bytes(offset),
            attributes: attributes_from_bytes(buf[8], buf[9])?,
            block_id: BlockId(id),
        })
    }
}
