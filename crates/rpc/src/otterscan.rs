//! ots and erigon namespace services
//!
//! Enough of the Otterscan backend surface for the explorer UI to browse a
//! session: block details, per-block transactions, address history, and
//! stored call traces.

use crate::{
    context::SessionStore,
    eth::EthRpc,
    types::{BlockView, HeaderView, ReceiptView, TxView},
};
use alloy_primitives::{Address, B256};
use serde::Serialize;
use smelter_primitives::{SmelterError, TransactionTraces};
use std::sync::Arc;

/// ots_getApiLevel response expected by current Otterscan builds.
const API_LEVEL: u64 = 8;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockIssuance {
    pub block_reward: u64,
    pub uncle_reward: u64,
    pub issuance: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetails {
    pub block: BlockView,
    pub total_fees: String,
    pub issuance: BlockIssuance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullBlock {
    #[serde(flatten)]
    pub block: BlockView,
    pub transaction_count: usize,
    pub full_transactions: Vec<TxView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTransactions {
    pub fullblock: FullBlock,
    pub receipts: Vec<ReceiptView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSearchResult {
    pub txs: Vec<TxView>,
    pub receipts: Vec<ReceiptView>,
    pub first_page: bool,
    pub last_page: bool,
}

pub struct OtterscanRpc {
    sessions: Arc<SessionStore>,
    eth: Arc<EthRpc>,
}

impl OtterscanRpc {
    pub fn new(sessions: Arc<SessionStore>, eth: Arc<EthRpc>) -> Self {
        Self { sessions, eth }
    }

    pub fn get_api_level(&self) -> u64 {
        API_LEVEL
    }

    pub fn has_code(&self, key: &str, addr: Address, tag: Option<&str>) -> Result<bool, SmelterError> {
        let code = self.eth.get_code(key, addr, tag)?;
        Ok(code != "0x")
    }

    pub fn get_block_details(&self, key: &str, number: u64) -> Result<Option<BlockDetails>, SmelterError> {
        let block = self.eth.get_block_by_number(key, Some(&number.to_string()))?;
        Ok(block.map(|block| BlockDetails {
            block,
            total_fees: "0x0".to_string(),
            issuance: BlockIssuance { block_reward: 0, uncle_reward: 0, issuance: 0 },
        }))
    }

    pub fn get_block_transactions(
        &self,
        key: &str,
        number: u64,
    ) -> Result<Option<BlockTransactions>, SmelterError> {
        let Some(block) = self.eth.get_block_by_number(key, Some(&number.to_string()))? else {
            return Ok(None);
        };

        let mut txs = Vec::new();
        let mut receipts = Vec::new();
        for hash in &block.transactions {
            if let Some(tx) = self.eth.get_transaction_by_hash(key, *hash)? {
                txs.push(tx);
            }
            if let Some(receipt) = self.eth.get_transaction_receipt(key, *hash)? {
                receipts.push(receipt);
            }
        }

        Ok(Some(BlockTransactions {
            fullblock: FullBlock { transaction_count: txs.len(), full_transactions: txs, block },
            receipts,
        }))
    }

    /// Address history. The whole session fits a page: everything is both
    /// the first and the last page.
    pub fn search_transactions_before(
        &self,
        key: &str,
        addr: Address,
    ) -> Result<TransactionSearchResult, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let store = ctx.executor.tx_store();

        let mut txs = Vec::new();
        let mut receipts = Vec::new();
        for tx in store.all().into_iter().rev() {
            if tx.from != addr && tx.to != addr {
                continue;
            }
            let receipt = store.get_receipt(tx.hash);
            txs.push(TxView::from_record(&tx, receipt.as_ref()));
            if let Some(receipt) = receipt {
                receipts.push(ReceiptView::from_receipt(&receipt, tx.from));
            }
        }

        Ok(TransactionSearchResult { txs, receipts, first_page: true, last_page: true })
    }

    pub fn get_transaction_error(&self, _key: &str, _hash: B256) -> String {
        "0x".to_string()
    }

    pub fn trace_transaction(
        &self,
        key: &str,
        hash: B256,
    ) -> Result<Option<TransactionTraces>, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        Ok(ctx.executor.tx_store().get_trace(hash))
    }
}

pub struct ErigonRpc {
    eth: Arc<EthRpc>,
}

impl ErigonRpc {
    pub fn new(eth: Arc<EthRpc>) -> Self {
        Self { eth }
    }

    pub fn get_header_by_number(
        &self,
        key: &str,
        number: u64,
    ) -> Result<Option<HeaderView>, SmelterError> {
        self.eth.get_header_by_number(key, Some(&number.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Bytes, U256};
    use smelter_fork::testing::MockReader;
    use smelter_primitives::ForkConfig;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn services() -> (Arc<SessionStore>, Arc<EthRpc>, OtterscanRpc) {
        let reader = Arc::new(MockReader::default());
        reader.put_account(
            address!("0000000000000000000000000000000000000006"),
            U256::from(1_000_000u64),
            0,
            Bytes::new(),
        );

        let sessions = Arc::new(SessionStore::new(
            ForkConfig { chain_id: 1, fork_block: U256::from(100) },
            reader,
            Duration::from_secs(60),
        ));
        let eth = Arc::new(EthRpc::new(Arc::clone(&sessions)));
        let ots = OtterscanRpc::new(Arc::clone(&sessions), Arc::clone(&eth));
        (sessions, eth, ots)
    }

    fn persist_transfer(sessions: &SessionStore, to: Address) -> B256 {
        use smelter_evm::CallTracer;
        use smelter_primitives::{CallMsg, StateOverrides};

        let ctx = sessions.get_or_create("s").unwrap();
        let msg = CallMsg {
            from: address!("0000000000000000000000000000000000000006"),
            to,
            value: U256::from(1),
            ..Default::default()
        };
        let mut tracer = CallTracer::new();
        let (hash, _, _) = ctx
            .executor
            .call_and_persist(&msg, &mut tracer, &StateOverrides::new(), CancellationToken::new())
            .unwrap();
        hash
    }

    #[test]
    fn test_api_level_and_error_placeholders() {
        let (_, _, ots) = services();
        assert_eq!(ots.get_api_level(), 8);
        assert_eq!(ots.get_transaction_error("s", B256::ZERO), "0x");
    }

    #[test]
    fn test_search_filters_by_address() {
        let (sessions, _, ots) = services();
        let to = address!("0000000000000000000000000000000000000007");
        persist_transfer(&sessions, to);

        let hits = ots.search_transactions_before("s", to).unwrap();
        assert_eq!(hits.txs.len(), 1);
        assert_eq!(hits.receipts.len(), 1);

        let misses = ots
            .search_transactions_before("s", address!("00000000000000000000000000000000000000ff"))
            .unwrap();
        assert!(misses.txs.is_empty());
    }

    #[test]
    fn test_block_transactions_pairs_txs_with_receipts() {
        let (sessions, _, ots) = services();
        let to = address!("0000000000000000000000000000000000000007");
        persist_transfer(&sessions, to);

        let page = ots.get_block_transactions("s", 101).unwrap().unwrap();
        assert_eq!(page.fullblock.transaction_count, 1);
        assert_eq!(page.receipts.len(), 1);

        let details = ots.get_block_details("s", 101).unwrap().unwrap();
        assert_eq!(details.total_fees, "0x0");
    }

    #[test]
    fn test_trace_round_trip() {
        let (sessions, _, ots) = services();
        let hash = persist_transfer(&sessions, address!("0000000000000000000000000000000000000007"));

        let trace = ots.trace_transaction("s", hash).unwrap().unwrap();
        assert!(trace.iter().any(|frame| frame.kind == "CALL"));
        assert!(ots.trace_transaction("s", B256::ZERO).unwrap().is_none());
    }
}
