//! # Compression Security
//!
//! Decompression bomb prevention for stored block payloads.

/// Maximum decompressed size of one block (64MB).
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Maximum compression ratio accepted for large outputs.
pub const MAX_COMPRESSION_RATIO: usize = 1000;

/// Outputs below this size are never ratio-checked; tiny blocks compressed
/// against a dictionary legitimately reach extreme ratios.
pub const RATIO_CHECK_FLOOR: usize = 1024 * 1024;

/// Validate that decompressed data doesn't exceed limits.
pub fn validate_decompressed_size(
    compressed_size: usize,
    decompressed_size: usize,
) -> Result<(), &'static str> {
    if decompressed_size > MAX_DECOMPRESSED_SIZE {
        return Err("Decompressed size exceeds maximum");
    }

    if decompressed_size >= RATIO_CHECK_FLOOR && compressed_size > 0 {
        let ratio = decompressed_size / compressed_size;
        if ratio > MAX_COMPRESSION_RATIO {
            return Err("Suspicious compression ratio detected");
        }
    }

    Ok(())
}
