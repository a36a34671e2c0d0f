//! eth namespace service
//!
//! Account and block reads follow a three-way dispatch: the live fork store
//! at the tip, the frozen capture for minted heights (falling through to the
//! upstream for addresses never touched locally), and the upstream alone at
//! or below the fork point.

use crate::{
    context::{SessionContext, SessionStore},
    types::{parse_block_tag, BlockView, CallRequest, HeaderView, ReceiptView, TxView},
};
use alloy_primitives::{hex, Address, Bytes, B256, U256};
use smelter_evm::CallTracer;
use smelter_fork::{ForkDb, Prefetcher};
use smelter_primitives::{
    AccountsState, AccountsStorage, BlockState, CallMsg, RawLegacyTx, SmelterError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// eth_* method implementations over the session store.
pub struct EthRpc {
    sessions: Arc<SessionStore>,
    prefetcher: Prefetcher,
}

impl EthRpc {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        let prefetcher = Prefetcher::new(sessions.reader());
        Self { sessions, prefetcher }
    }

    pub fn chain_id(&self) -> String {
        format!("{:#x}", self.sessions.config().chain_id)
    }

    pub fn block_number(&self, key: &str) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        Ok(format!("{:#x}", ctx.executor.latest().number))
    }

    pub fn get_block_by_hash(
        &self,
        key: &str,
        hash: B256,
    ) -> Result<Option<BlockView>, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        if let Some(state) = ctx.executor.block_store().by_hash(hash) {
            return Ok(Some(BlockView::from(&state.block)));
        }

        Ok(self.sessions.reader().block_by_hash(hash)?.as_ref().map(BlockView::from))
    }

    pub fn get_block_by_number(
        &self,
        key: &str,
        tag: Option<&str>,
    ) -> Result<Option<BlockView>, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let number = parse_block_tag(tag, ctx.executor.latest().number)?;

        if let Some(state) = ctx.executor.block_store().by_number(number.saturating_to::<u64>()) {
            return Ok(Some(BlockView::from(&state.block)));
        }

        Ok(self.sessions.reader().block_by_number(number)?.as_ref().map(BlockView::from))
    }

    pub fn get_header_by_hash(
        &self,
        key: &str,
        hash: B256,
    ) -> Result<Option<HeaderView>, SmelterError> {
        Ok(self.get_block_by_hash(key, hash)?.as_ref().map(HeaderView::from))
    }

    pub fn get_header_by_number(
        &self,
        key: &str,
        tag: Option<&str>,
    ) -> Result<Option<HeaderView>, SmelterError> {
        Ok(self.get_block_by_number(key, tag)?.as_ref().map(HeaderView::from))
    }

    pub fn get_balance(
        &self,
        key: &str,
        addr: Address,
        tag: Option<&str>,
    ) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let latest = ctx.executor.latest().number;
        let number = parse_block_tag(tag, latest)?;

        let balance = if number == latest {
            ctx.db.get_balance(addr)?
        } else if number > self.fork_block() {
            match self.capture(&ctx, number)?.state.get_balance(addr) {
                Some(balance) => balance,
                None => self.sessions.reader().balance_at(addr, number)?,
            }
        } else {
            self.sessions.reader().balance_at(addr, number)?
        };

        Ok(format!("{balance:#x}"))
    }

    pub fn get_code(
        &self,
        key: &str,
        addr: Address,
        tag: Option<&str>,
    ) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let latest = ctx.executor.latest().number;
        let number = parse_block_tag(tag, latest)?;

        let code = if number == latest {
            ctx.db.get_code(addr)?
        } else if number > self.fork_block() {
            match self.capture(&ctx, number)?.accounts.code_of(addr) {
                Some(code) => code,
                None => self.sessions.reader().code_at(addr, number)?,
            }
        } else {
            self.sessions.reader().code_at(addr, number)?
        };

        Ok(hex::encode_prefixed(code))
    }

    pub fn get_storage_at(
        &self,
        key: &str,
        addr: Address,
        slot: B256,
        tag: Option<&str>,
    ) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let latest = ctx.executor.latest().number;
        let number = parse_block_tag(tag, latest)?;

        let value = if number == latest {
            ctx.db.storage_at(addr, slot)?
        } else if number > self.fork_block() {
            match self.capture(&ctx, number)?.accounts.cached_slot(addr, slot) {
                Some(value) => value,
                None => self.sessions.reader().storage_at(addr, slot, number)?,
            }
        } else {
            self.sessions.reader().storage_at(addr, slot, number)?
        };

        Ok(format!("{value}"))
    }

    pub fn call(
        &self,
        key: &str,
        request: &CallRequest,
        tag: Option<&str>,
        token: CancellationToken,
    ) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let latest = ctx.executor.latest().number;
        let number = parse_block_tag(tag, latest)?;

        let msg = CallMsg {
            from: request.from.unwrap_or_default(),
            to: request.to.ok_or_else(|| {
                SmelterError::Decode("call target is required".to_string())
            })?,
            gas: request.gas.map(|g| g.to::<u64>()).unwrap_or_default(),
            gas_price: request.gas_price.map(|p| p.saturating_to::<u128>()).unwrap_or_default(),
            value: request.value.unwrap_or_default(),
            data: request.input_bytes(),
        };

        let mut tracer = CallTracer::new();
        let overrides = ctx.overrides();

        let output = if number == latest {
            let (output, _) = ctx.executor.call(&msg, &mut tracer, &overrides, token)?;
            output
        } else if number > self.fork_block() {
            let view = self.capture_view(&ctx, number)?;
            let (output, _) =
                ctx.executor.call_with_db(&msg, &mut tracer, &view, &overrides, token)?;
            output
        } else {
            self.sessions.reader().call_at(&msg, number)?
        };

        Ok(hex::encode_prefixed(output))
    }

    /// Decode a raw legacy envelope, resolve the sender (impersonator first,
    /// then the transport-supplied caller), warm the cache, and persist.
    pub fn send_raw_transaction(
        &self,
        key: &str,
        raw: &str,
        caller: Option<Address>,
        token: CancellationToken,
    ) -> Result<String, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;

        let bytes = hex::decode(raw).map_err(SmelterError::decode)?;
        let tx = RawLegacyTx::decode_raw(&bytes)?;

        let impersonator = ctx.impersonator();
        let from = if !impersonator.is_zero() {
            impersonator
        } else {
            caller.ok_or(SmelterError::BadCaller)?
        };

        let msg = CallMsg {
            from,
            to: tx.to,
            gas: tx.gas,
            gas_price: tx.gas_price,
            value: tx.value,
            data: tx.input,
        };

        if let Err(err) = self.prefetcher.prefetch(&ctx.db, &msg) {
            tracing::warn!(%err, "prefetch failed, continuing cold");
        }

        let mut tracer = CallTracer::new();
        let overrides = ctx.overrides();
        let (tx_hash, _, _) =
            ctx.executor.call_and_persist(&msg, &mut tracer, &overrides, token)?;
        tracing::debug!(tx = %tx_hash, trace = %tracer.fmt(), "transaction executed");

        Ok(format!("{tx_hash}"))
    }

    pub fn get_transaction_by_hash(
        &self,
        key: &str,
        hash: B256,
    ) -> Result<Option<TxView>, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let store = ctx.executor.tx_store();

        if let Some(tx) = store.get_transaction(hash) {
            let receipt = store.get_receipt(hash);
            return Ok(Some(TxView::from_record(&tx, receipt.as_ref())));
        }

        Ok(self.sessions.reader().transaction_by_hash(hash)?.map(|tx| remote_tx_view(&tx)))
    }

    pub fn get_transaction_receipt(
        &self,
        key: &str,
        hash: B256,
    ) -> Result<Option<ReceiptView>, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let store = ctx.executor.tx_store();

        if let Some(receipt) = store.get_receipt(hash) {
            let from = store.get_transaction(hash).map(|tx| tx.from).unwrap_or_default();
            return Ok(Some(ReceiptView::from_receipt(&receipt, from)));
        }

        Ok(self.sessions.reader().receipt_by_hash(hash)?.map(|r| remote_receipt_view(&r)))
    }

    /// Placeholder: estimation is out of scope, clients get zero.
    pub fn estimate_gas(&self) -> String {
        "0x0".to_string()
    }

    pub fn gas_price(&self) -> String {
        "0x0".to_string()
    }

    pub fn set_balance(&self, key: &str, addr: Address, amount: &str) -> Result<(), SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let amount = parse_quantity(amount)?;
        ctx.db.set_balance(addr, amount)
    }

    fn fork_block(&self) -> U256 {
        self.sessions.config().fork_block
    }

    fn capture(
        &self,
        ctx: &SessionContext,
        number: U256,
    ) -> Result<Arc<BlockState>, SmelterError> {
        ctx.executor
            .block_store()
            .by_number(number.saturating_to::<u64>())
            .ok_or_else(|| SmelterError::BadBlock(format!("block {number} not minted locally")))
    }

    /// Wrap a frozen capture as a standalone fork store for historical
    /// calls. Misses inside it still fall through to the upstream.
    fn capture_view(&self, ctx: &SessionContext, number: U256) -> Result<ForkDb, SmelterError> {
        let capture = self.capture(ctx, number)?;
        Ok(ForkDb::with_parts(
            self.sessions.reader(),
            self.sessions.config().clone(),
            AccountsStorage::from_data(capture.accounts.clone_data()),
            AccountsState::from_data(capture.state.clone_data()),
        ))
    }
}

fn parse_quantity(value: &str) -> Result<U256, SmelterError> {
    if let Some(hex_digits) = value.strip_prefix("0x") {
        return U256::from_str_radix(hex_digits, 16).map_err(SmelterError::decode);
    }
    U256::from_str_radix(value, 10).map_err(SmelterError::decode)
}

fn remote_tx_view(tx: &alloy_rpc_types_eth::Transaction) -> TxView {
    use alloy_consensus::Transaction as _;
    use alloy_primitives::U64;

    TxView {
        hash: *tx.inner.tx_hash(),
        nonce: U64::from(tx.inner.nonce()),
        block_hash: tx.block_hash,
        block_number: tx.block_number.map(U64::from),
        transaction_index: tx.transaction_index.map(U64::from),
        from: tx.inner.signer(),
        to: tx.inner.to(),
        value: tx.inner.value(),
        gas: U64::from(tx.inner.gas_limit()),
        gas_price: U256::from(tx.inner.gas_price().unwrap_or_default()),
        input: tx.inner.input().clone(),
        tx_type: U64::from(u8::from(tx.inner.tx_type())),
        v: U64::ZERO,
        r: U256::ZERO,
        s: U256::ZERO,
    }
}

fn remote_receipt_view(receipt: &alloy_rpc_types_eth::TransactionReceipt) -> ReceiptView {
    use alloy_consensus::TxReceipt as _;
    use alloy_primitives::U64;

    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| crate::types::LogView {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_hash: log.block_hash.unwrap_or_default(),
            block_number: U64::from(log.block_number.unwrap_or_default()),
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            transaction_index: U64::from(log.transaction_index.unwrap_or_default()),
            log_index: U64::from(log.log_index.unwrap_or_default()),
            removed: log.removed,
        })
        .collect();

    ReceiptView {
        transaction_hash: receipt.transaction_hash,
        transaction_index: U64::from(receipt.transaction_index.unwrap_or_default()),
        block_hash: receipt.block_hash.unwrap_or_default(),
        block_number: U64::from(receipt.block_number.unwrap_or_default()),
        from: receipt.from,
        to: receipt.to,
        cumulative_gas_used: U64::from(receipt.inner.cumulative_gas_used()),
        gas_used: U64::from(receipt.gas_used),
        contract_address: receipt.contract_address,
        logs,
        logs_bloom: Bytes::from(vec![0u8; 256]),
        status: U64::from(receipt.status() as u64),
        tx_type: U64::from(u8::from(receipt.transaction_type())),
        effective_gas_price: U256::from(receipt.effective_gas_price),
    }
}
