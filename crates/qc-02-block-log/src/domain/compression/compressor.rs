//! # Block Compression
//!
//! Dictionary-based Zstd compression for block log payloads.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use zstd::dict::{DecoderDictionary, EncoderDictionary};

use super::security::{validate_decompressed_size, MAX_DECOMPRESSED_SIZE};

// =============================================================================
// DICTIONARY REFERENCE
// =============================================================================

/// A numbered compression dictionary, borrowed from the dictionary provider.
///
/// The number identifies the dictionary on disk; the same number must always
/// refer to the same bytes.
#[derive(Debug, Clone, Copy)]
pub struct DictionaryRef<'a> {
    pub number: u8,
    pub bytes: &'a [u8],
}

// =============================================================================
// COMPRESSION ERROR
// =============================================================================

/// Errors during compression/decompression
#[derive(Debug)]
pub enum CompressionError {
    /// Compression failed
    CompressFailed(io::Error),
    /// Decompression failed
    DecompressFailed(io::Error),
    /// Output exceeded the decompression limits
    OutputTooLarge { compressed: usize, limit: usize },
    /// Compressed data carries a dictionary number the provider does not know
    UnknownDictionary(u8),
}

impl std::fmt::Display for CompressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionError::CompressFailed(e) => write!(f, "Compression failed: {}", e),
            CompressionError::DecompressFailed(e) => write!(f, "Decompression failed: {}", e),
            CompressionError::OutputTooLarge { compressed, limit } => write!(
                f,
                "Decompressed output of {} compressed bytes exceeds limit of {} bytes",
                compressed, limit
            ),
            CompressionError::UnknownDictionary(n) => {
                write!(f, "Unknown compression dictionary #{}", n)
            }
        }
    }
}

impl std::error::Error for CompressionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompressionError::CompressFailed(e) | CompressionError::DecompressFailed(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// COMPRESSOR TRAIT
// =============================================================================

/// Trait for block compression implementations
pub trait BlockCompressor: Send + Sync {
    /// Compress data, optionally against a dictionary
    fn compress(
        &self,
        data: &[u8],
        dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError>;

    /// Reverse `compress`; the same dictionary must be supplied
    fn decompress(
        &self,
        data: &[u8],
        dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError>;

    /// Check if compression is enabled
    fn is_enabled(&self) -> bool;
}

// =============================================================================
// ZSTD COMPRESSOR
// =============================================================================

/// Zstd-based compressor with prepared-dictionary caching.
///
/// Preparing a dictionary is far more expensive than using one, so prepared
/// encoder and decoder dictionaries are kept per dictionary number for the
/// lifetime of the compressor.
pub struct ZstdCompressor {
    level: i32,
    pub(super) encoders: RwLock<HashMap<u8, Arc<EncoderDictionary<'static>>>>,
    pub(super) decoders: RwLock<HashMap<u8, Arc<DecoderDictionary<'static>>>>,
}

impl ZstdCompressor {
    /// Create a new Zstd compressor at `level` (1-22)
    pub fn new(level: i32) -> Self {
        Self {
            level,
            encoders: RwLock::new(HashMap::new()),
            decoders: RwLock::new(HashMap::new()),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    fn encoder_for(&self, dict: DictionaryRef<'_>) -> Arc<EncoderDictionary<'static>> {
        if let Some(prepared) = self.encoders.read().get(&dict.number) {
            return Arc::clone(prepared);
        }
        let prepared = Arc::new(EncoderDictionary::copy(dict.bytes, self.level));
        self.encoders
            .write()
            .entry(dict.number)
            .or_insert(prepared)
            .clone()
    }

    fn decoder_for(&self, dict: DictionaryRef<'_>) -> Arc<DecoderDictionary<'static>> {
        if let Some(prepared) = self.decoders.read().get(&dict.number) {
            return Arc::clone(prepared);
        }
        let prepared = Arc::new(DecoderDictionary::copy(dict.bytes));
        self.decoders
            .write()
            .entry(dict.number)
            .or_insert(prepared)
            .clone()
    }
}

/// Read a decoder to the end, refusing to grow past `MAX_DECOMPRESSED_SIZE`.
fn read_bounded<R: Read>(decoder: R, compressed_len: usize) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE as u64 + 1)
        .read_to_end(&mut output)
        .map_err(CompressionError::DecompressFailed)?;

    validate_decompressed_size(compressed_len, output.len()).map_err(|_| {
        CompressionError::OutputTooLarge {
            compressed: compressed_len,
            limit: MAX_DECOMPRESSED_SIZE,
        }
    })?;
    Ok(output)
}

impl BlockCompressor for ZstdCompressor {
    fn compress(
        &self,
        data: &[u8],
        dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError> {
        match dictionary {
            Some(dict) => {
                let prepared = self.encoder_for(dict);
                let mut output = Vec::new();
                let mut encoder =
                    zstd::stream::Encoder::with_prepared_dictionary(&mut output, &prepared)
                        .map_err(CompressionError::CompressFailed)?;
                encoder
                    .write_all(data)
                    .map_err(CompressionError::CompressFailed)?;
                encoder.finish().map_err(CompressionError::CompressFailed)?;
                Ok(output)
            }
            None => zstd::encode_all(data, self.level).map_err(CompressionError::CompressFailed),
        }
    }

    fn decompress(
        &self,
        data: &[u8],
        dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError> {
        match dictionary {
            Some(dict) => {
                let prepared = self.decoder_for(dict);
                let decoder = zstd::stream::Decoder::with_prepared_dictionary(data, &prepared)
                    .map_err(CompressionError::DecompressFailed)?;
                read_bounded(decoder, data.len())
            }
            None => {
                let decoder =
                    zstd::stream::Decoder::new(data).map_err(CompressionError::DecompressFailed)?;
                read_bounded(decoder, data.len())
            }
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

// =============================================================================
// NO-OP COMPRESSOR
// =============================================================================

/// No-op compressor that returns data unchanged
pub struct NoOpCompressor;

impl BlockCompressor for NoOpCompressor {
    fn compress(
        &self,
        data: &[u8],
        _dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(
        &self,
        data: &[u8],
        _dictionary: Option<DictionaryRef<'_>>,
    ) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
