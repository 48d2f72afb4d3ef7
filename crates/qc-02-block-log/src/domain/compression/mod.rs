//! # Compression Module
//!
//! Dictionary-based Zstd compression for block log payloads. Which
//! dictionary applies to a block is decided by the `DictionaryProvider`
//! port, by height epoch.

mod compressor;
pub mod security;


pub use compressor::{
    BlockCompressor, CompressionError, DictionaryRef, NoOpCompressor, ZstdCompressor,
};
