//! Synthetic blocks and the frozen block index
//!
//! Every persisted call mints one block. The store keeps, per block, a deep
//! frozen capture of the fork store taken at mint time; historical reads at
//! intermediate heights are served from those captures.

use crate::state::{AccountsState, AccountsStorage};
use alloy_consensus::Header;
use alloy_primitives::{B256, U256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Fixed gas limit stamped on every minted block.
pub const BLOCK_GAS_LIMIT: u64 = 90_000_000;

/// A block minted from exactly one persisted call.
///
/// The hash is the keccak of the RLP-encoded header, the same legacy
/// hashing the chain family uses.
#[derive(Debug, Clone)]
pub struct ForkBlock {
    pub header: Header,
    pub transactions: Vec<B256>,
    pub hash: B256,
}

impl ForkBlock {
    pub fn new(
        parent_hash: B256,
        number: U256,
        timestamp: u64,
        gas_used: u64,
        transactions: Vec<B256>,
    ) -> Self {
        let header = Header {
            parent_hash,
            number: number.saturating_to::<u64>(),
            timestamp,
            gas_limit: BLOCK_GAS_LIMIT,
            gas_used,
            ..Default::default()
        };
        let hash = header.hash_slow();

        Self { header, transactions, hash }
    }

    pub fn number(&self) -> U256 {
        U256::from(self.header.number)
    }
}

/// A block plus the frozen fork-store capture taken right after its
/// transaction merged. Read-only once inserted.
#[derive(Debug)]
pub struct BlockState {
    pub accounts: AccountsStorage,
    pub state: AccountsState,
    pub block: ForkBlock,
}

/// Append-only in-memory block index: hash → capture, number → hash.
#[derive(Debug, Default)]
pub struct BlockStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_hash: HashMap<B256, Arc<BlockState>>,
    num_to_hash: HashMap<u64, B256>,
    latest: u64,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, number: u64) -> bool {
        self.inner.lock().unwrap().num_to_hash.contains_key(&number)
    }

    pub fn by_number(&self, number: u64) -> Option<Arc<BlockState>> {
        let inner = self.inner.lock().unwrap();
        let hash = inner.num_to_hash.get(&number)?;
        inner.by_hash.get(hash).cloned()
    }

    pub fn by_hash(&self, hash: B256) -> Option<Arc<BlockState>> {
        self.inner.lock().unwrap().by_hash.get(&hash).cloned()
    }

    /// Insert a capture. A second insert for the same block number is a
    /// no-op.
    pub fn add_block(&self, state: BlockState) {
        let mut inner = self.inner.lock().unwrap();
        let number = state.block.header.number;
        if inner.num_to_hash.contains_key(&number) {
            return;
        }

        let hash = state.block.hash;
        inner.by_hash.insert(hash, Arc::new(state));
        inner.num_to_hash.insert(number, hash);
        if inner.latest < number {
            inner.latest = number;
        }
    }

    /// Highest minted block number, zero when nothing was minted yet.
    pub fn latest_number(&self) -> u64 {
        self.inner.lock().unwrap().latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(number: u64) -> BlockState {
        BlockState {
            accounts: AccountsStorage::new(),
            state: AccountsState::new(),
            block: ForkBlock::new(B256::ZERO, U256::from(number), 1_700_000_000, 21_000, vec![]),
        }
    }

    #[test]
    fn test_block_hash_depends_on_header() {
        let a = ForkBlock::new(B256::ZERO, U256::from(1), 0, 0, vec![]);
        let b = ForkBlock::new(B256::ZERO, U256::from(2), 0, 0, vec![]);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.header.gas_limit, BLOCK_GAS_LIMIT);
    }

    #[test]
    fn test_add_and_lookup() {
        let store = BlockStore::new();
        store.add_block(capture(5));

        assert!(store.exists(5));
        assert_eq!(store.latest_number(), 5);

        let by_num = store.by_number(5).unwrap();
        assert_eq!(store.by_hash(by_num.block.hash).unwrap().block.header.number, 5);
        assert!(store.by_number(6).is_none());
    }

    #[test]
    fn test_second_insert_for_same_number_is_noop() {
        let store = BlockStore::new();
        let first = capture(3);
        let first_hash = first.block.hash;
        store.add_block(first);

        let mut other = capture(3);
        other.block = ForkBlock::new(B256::repeat_byte(9), U256::from(3), 1, 1, vec![]);
        store.add_block(other);

        assert_eq!(store.by_number(3).unwrap().block.hash, first_hash);
    }
}
