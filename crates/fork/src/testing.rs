//! In-memory reader for tests
//!
//! A [`StateReader`] over hash maps, with call counters so
//! tests can assert how often the upstream was actually consulted.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rpc_types_eth::{Block, BlockTransactions, Header, Transaction, TransactionReceipt};
use smelter_primitives::{BatchRequest, CallMsg, SmelterError, StateReader};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
};

/// Scripted upstream chain backed by maps.
#[derive(Debug, Default)]
pub struct MockReader {
    accounts: RwLock<HashMap<Address, (U256, u64, Bytes)>>,
    slots: RwLock<HashMap<(Address, B256), B256>>,
    batch_results: RwLock<Vec<serde_json::Value>>,
    tip: RwLock<u64>,
    account_reads: AtomicUsize,
    slot_reads: AtomicUsize,
    batch_calls: AtomicUsize,
    batching: bool,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reader that claims batching support and replays `results` on the
    /// next `batch` call.
    pub fn with_batching(results: Vec<serde_json::Value>) -> Self {
        Self { batching: true, batch_results: RwLock::new(results), ..Self::default() }
    }

    pub fn put_account(&self, addr: Address, balance: U256, nonce: u64, code: Bytes) {
        self.accounts.write().unwrap().insert(addr, (balance, nonce, code));
    }

    pub fn put_slot(&self, addr: Address, key: B256, value: B256) {
        self.slots.write().unwrap().insert((addr, key), value);
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.write().unwrap() = tip;
    }

    /// Individual account-field reads issued so far (code + balance + nonce
    /// each count as one).
    pub fn account_reads(&self) -> usize {
        self.account_reads.load(Ordering::SeqCst)
    }

    pub fn slot_reads(&self) -> usize {
        self.slot_reads.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn account(&self, addr: Address) -> (U256, u64, Bytes) {
        self.account_reads.fetch_add(1, Ordering::SeqCst);
        self.accounts.read().unwrap().get(&addr).cloned().unwrap_or_default()
    }
}

impl StateReader for MockReader {
    fn code_at(&self, addr: Address, _block: U256) -> Result<Bytes, SmelterError> {
        Ok(self.account(addr).2)
    }

    fn balance_at(&self, addr: Address, _block: U256) -> Result<U256, SmelterError> {
        Ok(self.account(addr).0)
    }

    fn nonce_at(&self, addr: Address, _block: U256) -> Result<u64, SmelterError> {
        Ok(self.account(addr).1)
    }

    fn storage_at(&self, addr: Address, slot: B256, _block: U256) -> Result<B256, SmelterError> {
        self.slot_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.slots.read().unwrap().get(&(addr, slot)).copied().unwrap_or_default())
    }

    fn block_number(&self) -> Result<u64, SmelterError> {
        Ok(*self.tip.read().unwrap())
    }

    fn chain_id(&self) -> Result<u64, SmelterError> {
        Ok(1)
    }

    fn block_by_number(&self, number: U256) -> Result<Option<Block>, SmelterError> {
        let n = number.saturating_to::<u64>();
        let inner = alloy_consensus::Header { number: n, ..Default::default() };
        let header = Header {
            hash: keccak256(n.to_be_bytes()),
            inner,
            total_difficulty: None,
            size: None,
        };
        Ok(Some(Block {
            header,
            uncles: vec![],
            transactions: BlockTransactions::Hashes(vec![]),
            withdrawals: None,
        }))
    }

    fn block_by_hash(&self, _hash: B256) -> Result<Option<Block>, SmelterError> {
        Ok(None)
    }

    fn transaction_by_hash(&self, _hash: B256) -> Result<Option<Transaction>, SmelterError> {
        Ok(None)
    }

    fn receipt_by_hash(&self, _hash: B256) -> Result<Option<TransactionReceipt>, SmelterError> {
        Ok(None)
    }

    fn call_at(&self, _msg: &CallMsg, _block: U256) -> Result<Bytes, SmelterError> {
        Ok(Bytes::new())
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    fn batch(&self, requests: &[BatchRequest]) -> Result<Vec<serde_json::Value>, SmelterError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = std::mem::take(&mut *self.batch_results.write().unwrap());
        if scripted.len() != requests.len() {
            return Err(SmelterError::UpstreamIo(format!(
                "scripted {} results for {} requests",
                scripted.len(),
                requests.len()
            )));
        }
        Ok(scripted)
    }
}
