//! Blocking HTTP reader over an alloy provider
//!
//! The execution path is synchronous (the interpreter drives its backing
//! state without yielding), so remote reads bridge into the tokio runtime
//! with `block_in_place` + `Handle::block_on`. A shutdown token aborts
//! pending I/O instead of letting a dying server hang on the upstream.

use alloy_eips::{BlockId, BlockNumberOrTag};
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::{Block, Transaction, TransactionInput, TransactionReceipt, TransactionRequest};
use smelter_primitives::{CallMsg, SmelterError, StateReader};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Upstream reader backed by a single HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpReader {
    provider: RootProvider,
    handle: Handle,
    shutdown: CancellationToken,
}

impl HttpReader {
    /// Connect to `url`. The handle must belong to a multi-threaded
    /// runtime; reads re-enter it from blocking contexts.
    pub fn new(url: &str, handle: Handle, shutdown: CancellationToken) -> Result<Self, SmelterError> {
        let url = url.parse::<reqwest::Url>().map_err(SmelterError::decode)?;
        Ok(Self { provider: RootProvider::new_http(url), handle, shutdown })
    }

    /// Drive an upstream future to completion from a blocking context,
    /// racing it against the shutdown token.
    pub(crate) fn run<F, T, E>(&self, fut: F) -> Result<T, SmelterError>
    where
        F: std::future::IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.shutdown.is_cancelled() {
            return Err(SmelterError::Aborted);
        }

        let shutdown = self.shutdown.clone();
        let fut = fut.into_future();
        let wrapped = async move {
            tokio::select! {
                _ = shutdown.cancelled() => Err(SmelterError::Aborted),
                out = fut => out.map_err(SmelterError::upstream),
            }
        };

        match Handle::try_current() {
            Ok(current) => tokio::task::block_in_place(|| current.block_on(wrapped)),
            Err(_) => self.handle.block_on(wrapped),
        }
    }

    fn block_id(block: U256) -> BlockId {
        BlockId::Number(BlockNumberOrTag::Number(block.saturating_to::<u64>()))
    }
}

impl StateReader for HttpReader {
    fn code_at(&self, addr: Address, block: U256) -> Result<Bytes, SmelterError> {
        self.run(self.provider.get_code_at(addr).block_id(Self::block_id(block)))
    }

    fn balance_at(&self, addr: Address, block: U256) -> Result<U256, SmelterError> {
        self.run(self.provider.get_balance(addr).block_id(Self::block_id(block)))
    }

    fn nonce_at(&self, addr: Address, block: U256) -> Result<u64, SmelterError> {
        self.run(self.provider.get_transaction_count(addr).block_id(Self::block_id(block)))
    }

    fn storage_at(&self, addr: Address, slot: B256, block: U256) -> Result<B256, SmelterError> {
        let key = U256::from_be_bytes(slot.0);
        let value =
            self.run(self.provider.get_storage_at(addr, key).block_id(Self::block_id(block)))?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    fn block_number(&self) -> Result<u64, SmelterError> {
        self.run(self.provider.get_block_number())
    }

    fn chain_id(&self) -> Result<u64, SmelterError> {
        self.run(self.provider.get_chain_id())
    }

    fn block_by_number(&self, number: U256) -> Result<Option<Block>, SmelterError> {
        let tag = BlockNumberOrTag::Number(number.saturating_to::<u64>());
        self.run(self.provider.get_block_by_number(tag))
    }

    fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, SmelterError> {
        self.run(self.provider.get_block_by_hash(hash))
    }

    fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, SmelterError> {
        self.run(self.provider.get_transaction_by_hash(hash))
    }

    fn receipt_by_hash(&self, hash: B256) -> Result<Option<TransactionReceipt>, SmelterError> {
        self.run(self.provider.get_transaction_receipt(hash))
    }

    fn call_at(&self, msg: &CallMsg, block: U256) -> Result<Bytes, SmelterError> {
        let request = TransactionRequest {
            from: Some(msg.from),
            to: Some(TxKind::Call(msg.to)),
            gas: (msg.gas > 0).then_some(msg.gas),
            value: Some(msg.value),
            input: TransactionInput::new(msg.data.clone()),
            ..Default::default()
        };
        self.run(self.provider.call(request).block(Self::block_id(block)))
    }
}
