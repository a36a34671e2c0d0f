//! Upstream chain reader contracts
//!
//! The engine reads the remote chain through these traits so that the fork
//! store, executor, and RPC services never touch a transport directly.

use crate::{CallMsg, SmelterError};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::{Block, Transaction, TransactionReceipt};

/// Method tags used by batched requests.
pub const METHOD_GET_CODE: &str = "eth_getCode";
pub const METHOD_GET_BALANCE: &str = "eth_getBalance";
pub const METHOD_GET_NONCE: &str = "eth_getTransactionCount";
pub const METHOD_GET_STORAGE_AT: &str = "eth_getStorageAt";
pub const METHOD_BLOCK_NUMBER: &str = "eth_blockNumber";

/// Read-only window onto an upstream chain.
///
/// All account reads are pinned to an explicit block height. Implementations
/// must be shareable across sessions and safe to call from blocking
/// contexts. Batching is opt-in: the defaults declare no support.
pub trait StateReader: Send + Sync {
    fn code_at(&self, addr: Address, block: U256) -> Result<Bytes, SmelterError>;
    fn balance_at(&self, addr: Address, block: U256) -> Result<U256, SmelterError>;
    fn nonce_at(&self, addr: Address, block: U256) -> Result<u64, SmelterError>;
    fn storage_at(&self, addr: Address, slot: B256, block: U256) -> Result<B256, SmelterError>;

    /// Current upstream tip.
    fn block_number(&self) -> Result<u64, SmelterError>;
    fn chain_id(&self) -> Result<u64, SmelterError>;

    fn block_by_number(&self, number: U256) -> Result<Option<Block>, SmelterError>;
    fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, SmelterError>;
    fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, SmelterError>;
    fn receipt_by_hash(&self, hash: B256) -> Result<Option<TransactionReceipt>, SmelterError>;

    /// `eth_call` against the upstream at a pinned height, for reads below
    /// the fork point.
    fn call_at(&self, msg: &CallMsg, block: U256) -> Result<Bytes, SmelterError>;

    /// Whether [`StateReader::batch`] is backed by real fan-out.
    fn supports_batching(&self) -> bool {
        false
    }

    /// Fan out a JSON-RPC batch. `results[i]` answers `requests[i]`
    /// regardless of the order the server replied in; one failing request
    /// fails the batch with its id attached.
    fn batch(&self, _requests: &[BatchRequest]) -> Result<Vec<serde_json::Value>, SmelterError> {
        Err(SmelterError::UpstreamIo("batching not supported".to_string()))
    }
}

/// One positional parameter of a batched request.
///
/// Block tags get their own variant because their wire encoding is
/// contextual: `None` encodes as `"latest"`, a height as minimal hex.
#[derive(Debug, Clone)]
pub enum BatchParam {
    Value(serde_json::Value),
    Block(Option<U256>),
}

impl From<serde_json::Value> for BatchParam {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}

/// A single request inside a JSON-RPC batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub method: &'static str,
    pub params: Vec<BatchParam>,
}

impl BatchRequest {
    pub fn new(method: &'static str, params: Vec<BatchParam>) -> Self {
        Self { method, params }
    }
}

