//! # Outbound Ports
//!
//! Collaborators injected into the block log.

use std::sync::Arc;

/// Supplies compression dictionaries by height epoch.
///
/// The policy that decides which dictionary applies to a block lives outside
/// the block log; stored blocks only remember the dictionary number.
pub trait DictionaryProvider: Send + Sync {
    /// Dictionary to compress `block_num` with, if any.
    fn dictionary_for_block(&self, block_num: u32) -> Option<u8>;

    /// Bytes of dictionary `number`.
    fn dictionary(&self, number: u8) -> Option<Arc<[u8]>>;
}

/// No dictionaries: blocks are compressed without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDictionaries;

impl DictionaryProvider for NoDictionaries {
    fn dictionary_for_block(&self, _block_num: u32) -> Option<u8> {
        None
    }

    fn dictionary(&self, _number: u8) -> Option<Arc<[u8]>> {
        None
    }
}

/// One height epoch: blocks from `first_block` onward use `number`.
#[derive(Debug, Clone)]
pub struct DictionaryEpoch {
    pub first_block: u32,
    pub number: u8,
    pub bytes: Arc<[u8]>,
}

/// Ordered list of epochs. The last epoch whose `first_block` is at or
/// below a block's number applies to it.
#[derive(Debug, Clone, Default)]
pub struct EpochDictionaries {
    epochs: Vec<DictionaryEpoch>,
}

impl EpochDictionaries {
    pub fn new(mut epochs: Vec<DictionaryEpoch>) -> Self {
        epochs.sort_by_key(|e| e.first_block);
        Self { epochs }
    }

    pub fn epochs(&self) -> &[DictionaryEpoch] {
        &self.epochs
    }
}

impl DictionaryProvider for EpochDictionaries {
    fn dictionary_for_block(&self, block_num: u32) -> Option<u8> {
        let idx = self.epochs.partition_point(|e| e.first_block <= block_num);
        idx.checked_sub(1).map(|i| self.epochs[i].number)
    }

    fn dictionary(&self, number: u8) -> Option<Arc<[u8]>> {
        self.epochs
            .iter()
            .find(|e| e.number == number)
            .map(|e| Arc::clone(&e.bytes))
    }
}
