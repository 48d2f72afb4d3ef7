//! # Test Fixtures
//!
//! Deterministic block builders shared by the unit tests of every crate.
//! Enabled by the `test-utils` feature.

use crate::entities::{BlockHandle, BlockHeader, BlockId, FullBlock, SignedBlock};

/// Build a block on top of `previous` (`None` for block 1).
///
/// `producer` and `salt` distinguish competing blocks at the same height.
pub fn make_block(previous: Option<&BlockHandle>, producer: &str, salt: u64) -> BlockHandle {
    let previous_id = previous.map(|b| b.id()).unwrap_or(BlockId::ZERO);
    let block_num = previous_id.num() + 1;

    let transactions: Vec<Vec<u8>> = (0..3u64)
        .map(|i| {
            format!("transfer:{producer}:{block_num}:{salt}:{i}:")
                .repeat(8)
                .into_bytes()
        })
        .collect();

    let header = BlockHeader {
        previous: previous_id,
        timestamp: 1_700_000_000 + u64::from(block_num) * 3 + salt,
        producer: producer.to_string(),
        transaction_merkle_root: SignedBlock::compute_merkle_root(&transactions),
    };

    let block = SignedBlock {
        header,
        producer_signature: [block_num as u8; 64],
        transactions,
    };

    FullBlock::from_signed_block(block)
        .expect("fixture block serializes")
        .into_handle()
}

/// A linear chain of `len` blocks starting at block 1.
pub fn make_chain(len: u32) -> Vec<BlockHandle> {
    extend_chain(None, len, "producer-a", 0)
}

/// `len` blocks built on top of `parent`.
pub fn extend_chain(
    parent: Option<&BlockHandle>,
    len: u32,
    producer: &str,
    salt: u64,
) -> Vec<BlockHandle> {
    let mut blocks: Vec<BlockHandle> = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let next = make_block(blocks.last().or(parent), producer, salt);
        blocks.push(next);
    }
    blocks
}
