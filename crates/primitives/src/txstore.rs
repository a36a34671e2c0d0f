//! Transaction, receipt, and trace indices

use crate::{receipt::TxReceipt, trace::TransactionTraces, transaction::TxRecord};
use alloy_primitives::B256;
use std::{collections::HashMap, sync::RwLock};

/// Append-only in-memory transaction index. Insertion order is preserved
/// so history can be listed newest-first.
#[derive(Debug, Default)]
pub struct TxStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    txs: HashMap<B256, TxRecord>,
    receipts: HashMap<B256, TxReceipt>,
    traces: HashMap<B256, TransactionTraces>,
    order: Vec<B256>,
}

impl TxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: TxRecord) {
        let mut inner = self.inner.write().unwrap();
        if !inner.txs.contains_key(&tx.hash) {
            inner.order.push(tx.hash);
        }
        inner.txs.insert(tx.hash, tx);
    }

    pub fn get_transaction(&self, hash: B256) -> Option<TxRecord> {
        self.inner.read().unwrap().txs.get(&hash).cloned()
    }

    pub fn add_receipt(&self, receipt: TxReceipt) {
        let mut inner = self.inner.write().unwrap();
        inner.receipts.insert(receipt.tx_hash, receipt);
    }

    pub fn get_receipt(&self, hash: B256) -> Option<TxReceipt> {
        self.inner.read().unwrap().receipts.get(&hash).cloned()
    }

    pub fn add_trace(&self, hash: B256, trace: TransactionTraces) {
        self.inner.write().unwrap().traces.insert(hash, trace);
    }

    pub fn get_trace(&self, hash: B256) -> Option<TransactionTraces> {
        self.inner.read().unwrap().traces.get(&hash).cloned()
    }

    /// All stored transactions in insertion order.
    pub fn all(&self) -> Vec<TxRecord> {
        let inner = self.inner.read().unwrap();
        inner.order.iter().filter_map(|h| inner.txs.get(h)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    fn record(nonce: u64) -> TxRecord {
        TxRecord::new(Address::ZERO, nonce, 0, 21_000, Address::ZERO, U256::ZERO, Bytes::new())
    }

    #[test]
    fn test_round_trip_and_order() {
        let store = TxStore::new();
        let a = record(1);
        let b = record(2);
        store.add_transaction(a.clone());
        store.add_transaction(b.clone());

        assert_eq!(store.get_transaction(a.hash).unwrap().nonce, 1);
        assert!(store.get_transaction(B256::ZERO).is_none());

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].hash, a.hash);
        assert_eq!(all[1].hash, b.hash);
    }

    #[test]
    fn test_trace_lookup() {
        let store = TxStore::new();
        let hash = B256::repeat_byte(7);
        store.add_trace(hash, vec![]);
        assert!(store.get_trace(hash).is_some());
        assert!(store.get_trace(B256::ZERO).is_none());
    }
}
