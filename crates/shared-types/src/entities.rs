//! # Core Domain Entities
//!
//! The block value types shared by the block log (qc-02) and the fork
//! database (qc-08).
//!
//! ## Clusters
//!
//! - **Identity**: `Hash`, `BlockId`
//! - **Chain**: `BlockHeader`, `SignedBlock`
//! - **Handles**: `FullBlock`, `BlockHandle`, `CompressedBuffer`
//! - **Storage metadata**: `CompressionKind`, `CompressionAttributes`

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

use crate::errors::BlockDecodeError;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// A 32-byte hash (SHA-256).
pub type Hash = [u8; 32];

/// A 64-byte producer signature.
pub type Signature = [u8; 64];

/// Size of a block id in bytes.
pub const BLOCK_ID_SIZE: usize = 20;

/// Identifier of a block.
///
/// The first four bytes carry the block number (big-endian) so that the
/// height of any block can be recovered from its id alone. The remaining
/// sixteen bytes are the leading bytes of the SHA-256 digest of the header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockId(pub [u8; BLOCK_ID_SIZE]);

impl BlockId {
    /// The all-zero id, used as the `previous` of the first block.
    pub const ZERO: BlockId = BlockId([0u8; BLOCK_ID_SIZE]);

    /// Build an id from a block number and a header digest.
    pub fn from_parts(block_num: u32, digest: &Hash) -> Self {
        let mut bytes = [0u8; BLOCK_ID_SIZE];
        bytes[..4].copy_from_slice(&block_num.to_be_bytes());
        bytes[4..].copy_from_slice(&digest[..BLOCK_ID_SIZE - 4]);
        BlockId(bytes)
    }

    /// Block number embedded in the id.
    #[inline]
    pub fn num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// True for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; BLOCK_ID_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_SIZE] {
        &self.0
    }

    /// Parse an id from exactly twenty bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; BLOCK_ID_SIZE] = bytes.try_into().ok()?;
        Some(BlockId(arr))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId(#{} {})", self.num(), hex::encode(&self.0[4..10]))
    }
}

// =============================================================================
// CLUSTER B: THE CHAIN
// =============================================================================

/// Header of a block. Only the fields the storage core needs to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Id of the parent block (`BlockId::ZERO` for the first block).
    pub previous: BlockId,
    /// Unix timestamp (seconds) at which the block was produced.
    pub timestamp: u64,
    /// Name of the producer.
    pub producer: String,
    /// Merkle root over the transactions.
    pub transaction_merkle_root: Hash,
}

impl BlockHeader {
    /// Height of the block described by this header.
    pub fn block_num(&self) -> u32 {
        self.previous.num() + 1
    }

    /// Compute the id of the block described by this header.
    pub fn id(&self) -> Result<BlockId, BlockDecodeError> {
        let encoded = bincode::serialize(self)?;
        let digest: Hash = Sha256::digest(&encoded).into();
        Ok(BlockId::from_parts(self.block_num(), &digest))
    }
}

/// A complete block as produced and propagated on the network.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    /// Producer signature over the header.
    #[serde_as(as = "Bytes")]
    pub producer_signature: Signature,
    /// Opaque serialized transactions. Validation lives outside the core.
    pub transactions: Vec<Vec<u8>>,
}

impl SignedBlock {
    /// Compute a merkle root over the transaction payloads.
    pub fn compute_merkle_root(transactions: &[Vec<u8>]) -> Hash {
        if transactions.is_empty() {
            return [0u8; 32];
        }

        let mut layer: Vec<Hash> = transactions
            .iter()
            .map(|tx| Sha256::digest(tx).into())
            .collect();

        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    hasher.update(pair.get(1).unwrap_or(&pair[0]));
                    hasher.finalize().into()
                })
                .collect();
        }

        layer[0]
    }
}

// =============================================================================
// CLUSTER C: STORAGE METADATA
// =============================================================================

/// How the bytes of a block are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompressionKind {
    /// Stored verbatim.
    #[default]
    None,
    /// Zstd frame, optionally against a pre-trained dictionary.
    Zstd,
}

/// Compression metadata recorded per block.
///
/// Chosen at write time by the height-epoch dictionary policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct CompressionAttributes {
    pub kind: CompressionKind,
    /// Number of the dictionary used, if any.
    pub dictionary: Option<u8>,
}

impl CompressionAttributes {
    pub const UNCOMPRESSED: CompressionAttributes = CompressionAttributes {
        kind: CompressionKind::None,
        dictionary: None,
    };

    pub fn zstd(dictionary: Option<u8>) -> Self {
        Self {
            kind: CompressionKind::Zstd,
            dictionary,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.kind == CompressionKind::Zstd
    }
}

/// Compressed form of a block together with the attributes needed to
/// reverse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBuffer {
    pub bytes: Vec<u8>,
    pub attributes: CompressionAttributes,
}

// =============================================================================
// CLUSTER D: HANDLES
// =============================================================================

/// Shared, immutable handle to a parsed block.
///
/// The same handle is held by the fork database, the block log writer and
/// callers; nothing mutates a `FullBlock` after construction.
pub type BlockHandle = Arc<FullBlock>;

/// A parsed block with its raw byte buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullBlock {
    block_num: u32,
    id: BlockId,
    block: SignedBlock,
    uncompressed: Vec<u8>,
    compressed: Option<CompressedBuffer>,
}

impl FullBlock {
    /// Build a handle from a block value, serializing it.
    pub fn from_signed_block(block: SignedBlock) -> Result<Self, BlockDecodeError> {
        let uncompressed = bincode::serialize(&block)?;
        let id = block.header.id()?;
        Ok(Self {
            block_num: block.header.block_num(),
            id,
            block,
            uncompressed,
            compressed: None,
        })
    }

    /// Reconstruct a block from its uncompressed serialized bytes.
    pub fn from_uncompressed(bytes: Vec<u8>) -> Result<Self, BlockDecodeError> {
        Self::from_raw(bytes, None)
    }

    /// Reconstruct a block from its uncompressed bytes, keeping the stored
    /// compressed form alongside so it can be written again without
    /// recompression.
    pub fn from_raw(
        uncompressed: Vec<u8>,
        compressed: Option<CompressedBuffer>,
    ) -> Result<Self, BlockDecodeError> {
        if uncompressed.is_empty() {
            return Err(BlockDecodeError::Empty);
        }
        let block: SignedBlock = bincode::deserialize(&uncompressed)?;
        let id = block.header.id()?;
        Ok(Self {
            block_num: block.header.block_num(),
            id,
            block,
            uncompressed,
            compressed,
        })
    }

    /// Attach a compressed form while the value is still uniquely owned.
    pub fn with_compressed(mut self, compressed: CompressedBuffer) -> Self {
        self.compressed = Some(compressed);
        self
    }

    pub fn into_handle(self) -> BlockHandle {
        Arc::new(self)
    }

    #[inline]
    pub fn block_num(&self) -> u32 {
        self.block_num
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn previous_id(&self) -> BlockId {
        self.block.header.previous
    }

    pub fn header(&self) -> &BlockHeader {
        &self.block.header
    }

    pub fn block(&self) -> &SignedBlock {
        &self.block
    }

    pub fn uncompressed_bytes(&self) -> &[u8] {
        &self.uncompressed
    }

    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed.len()
    }

    pub fn compressed(&self) -> Option<&CompressedBuffer> {
        self.compressed.as_ref()
    }

    pub fn compressed_size(&self) -> Option<usize> {
        self.compressed.as_ref().map(|c| c.bytes.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
