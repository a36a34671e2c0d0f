//! Serial executor
//!
//! Owns a session's fork store, transaction and block indices, and the
//! rolling latest-block pointer. A single lock covers every execution, so
//! within one session block numbers are a gapless total order.

use crate::{env::EnvConfig, inspector::CallTracer};
use alloy_primitives::{Bytes, B256, U256};
use revm::{
    context::{
        result::{EVMError, ExecutionResult, Output},
        Context, LocalContext,
    },
    DatabaseCommit, InspectEvm, Journal, JournalEntry, MainBuilder,
};
use revm::context::JournalTr;
use smelter_fork::{DbError, ForkDb, OverlayDb};
use smelter_primitives::{
    BlockState, BlockStore, CallMsg, ForkBlock, SmelterError, StateOverrides, StateReader,
    TxReceipt, TxRecord, TxStore,
};
use std::{
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};
use tokio_util::sync::CancellationToken;

/// Rolling pointer to the most recently minted block. Starts at the pinned
/// fork block so the first minted block lands one above it.
#[derive(Debug, Clone)]
pub struct LatestBlock {
    pub hash: B256,
    pub number: U256,
}

/// One-at-a-time EVM executor over a session's fork store.
pub struct SerialExecutor {
    cfg: EnvConfig,
    db: Arc<ForkDb>,
    txs: Arc<TxStore>,
    blocks: Arc<BlockStore>,
    latest: Mutex<LatestBlock>,
}

impl SerialExecutor {
    /// Build an executor whose first minted block will be `fork_block + 1`.
    /// Resolves the pinned block's hash upstream once.
    pub fn new(
        cfg: EnvConfig,
        db: Arc<ForkDb>,
        reader: &dyn StateReader,
    ) -> Result<Self, SmelterError> {
        let fork_block = db.config().fork_block;
        let pinned = reader.block_by_number(fork_block)?.ok_or_else(|| {
            SmelterError::BadBlock(format!("fork block {fork_block} not found upstream"))
        })?;

        Ok(Self {
            cfg,
            db,
            txs: Arc::new(TxStore::new()),
            blocks: Arc::new(BlockStore::new()),
            latest: Mutex::new(LatestBlock { hash: pinned.header.hash, number: fork_block }),
        })
    }

    pub fn latest(&self) -> LatestBlock {
        self.latest.lock().unwrap().clone()
    }

    pub fn block_store(&self) -> Arc<BlockStore> {
        Arc::clone(&self.blocks)
    }

    pub fn tx_store(&self) -> Arc<TxStore> {
        Arc::clone(&self.txs)
    }

    pub fn db(&self) -> Arc<ForkDb> {
        Arc::clone(&self.db)
    }

    /// Read-only execution against the live fork store. The overlay is
    /// discarded after the interpreter returns.
    pub fn call(
        &self,
        msg: &CallMsg,
        tracer: &mut CallTracer,
        overrides: &StateOverrides,
        token: CancellationToken,
    ) -> Result<(Bytes, u64), SmelterError> {
        let latest = self.latest.lock().unwrap();
        let run = self.run_interpreter(&self.db, msg, tracer, overrides, token, latest.number)?;
        Ok((run.output, run.gas_left))
    }

    /// Read-only execution over a caller-supplied store, used to call into
    /// a frozen historical capture instead of the live state.
    pub fn call_with_db(
        &self,
        msg: &CallMsg,
        tracer: &mut CallTracer,
        db: &ForkDb,
        overrides: &StateOverrides,
        token: CancellationToken,
    ) -> Result<(Bytes, u64), SmelterError> {
        let latest = self.latest.lock().unwrap();
        let run = self.run_interpreter(db, msg, tracer, overrides, token, latest.number)?;
        Ok((run.output, run.gas_left))
    }

    /// Mutating execution: on success the overlay is folded into the fork
    /// store, the sender nonce advances, and a one-transaction block is
    /// minted and indexed together with its receipt, trace, and a frozen
    /// state capture. On any interpreter error nothing is recorded.
    pub fn call_and_persist(
        &self,
        msg: &CallMsg,
        tracer: &mut CallTracer,
        overrides: &StateOverrides,
        token: CancellationToken,
    ) -> Result<(B256, Bytes, u64), SmelterError> {
        let mut latest = self.latest.lock().unwrap();

        let pre_nonce = self.db.get_nonce(msg.from)?;
        let run = self.run_interpreter(&self.db, msg, tracer, overrides, token, latest.number)?;

        let (accounts, state) = run.overlay.parts();
        self.db.apply_storage(accounts);
        self.db.apply_state(state);

        // The interpreter already advanced the sender nonce inside the
        // merged state; setting it keeps the invariant explicit.
        let next_nonce = pre_nonce + 1;
        self.db.set_nonce(msg.from, next_nonce)?;

        let gas = if msg.gas == 0 { self.cfg.default_gas } else { msg.gas };
        let tx = TxRecord::new(
            msg.from,
            next_nonce,
            msg.gas_price,
            gas,
            msg.to,
            msg.value,
            msg.data.clone(),
        );

        let number = latest.number + U256::from(1);
        let block =
            ForkBlock::new(latest.hash, number, run.timestamp, run.gas_used, vec![tx.hash]);
        let block_hash = block.hash;

        let receipt = TxReceipt {
            status: 1,
            cumulative_gas_used: run.gas_used,
            gas_used: run.gas_used,
            logs: run.overlay.logs().to_vec(),
            tx_hash: tx.hash,
            contract_address: msg.to,
            block_hash,
            block_number: number,
            tx_index: 0,
            effective_gas_price: msg.gas_price,
        };

        if !run.overlay.warnings().is_empty() {
            tracing::debug!(tx = %tx.hash, warnings = ?run.overlay.warnings(), "overlay warnings");
        }

        self.txs.add_transaction(tx.clone());
        self.txs.add_receipt(receipt);
        self.txs.add_trace(tx.hash, tracer.traces());

        let (frozen_accounts, frozen_state) = self.db.copy();
        self.blocks.add_block(BlockState {
            accounts: frozen_accounts,
            state: frozen_state,
            block,
        });

        latest.hash = block_hash;
        latest.number = number;
        tracing::info!(tx = %tx.hash, block = %number, gas_used = run.gas_used, "minted block");

        Ok((tx.hash, run.output, run.gas_left))
    }

    fn run_interpreter<'d>(
        &self,
        db: &'d ForkDb,
        msg: &CallMsg,
        tracer: &mut CallTracer,
        overrides: &StateOverrides,
        token: CancellationToken,
        parent_number: U256,
    ) -> Result<InterpreterRun<'d>, SmelterError> {
        if token.is_cancelled() {
            return Err(SmelterError::Aborted);
        }

        let timestamp =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();

        let mut overlay = OverlayDb::new(db, token);
        overlay.apply_overrides(overrides)?;

        let block_env = self.cfg.block_env(parent_number + U256::from(1), timestamp);
        let tx_env = self.cfg.tx_env(msg);
        let gas_limit = tx_env.gas_limit;

        let journal: Journal<&mut OverlayDb<'d>, JournalEntry> = Journal::new(&mut overlay);
        let ctx = Context {
            block: block_env,
            tx: tx_env.clone(),
            cfg: self.cfg.cfg_env(),
            journaled_state: journal,
            chain: (),
            local: LocalContext::default(),
            error: Ok(()),
        };

        let mut evm = ctx.build_mainnet_with_inspector(&mut *tracer);
        let outcome = evm.inspect_tx(tx_env);
        drop(evm);

        let result_and_state = outcome.map_err(map_evm_error)?;
        match result_and_state.result {
            ExecutionResult::Success { gas_used, output, logs, .. } => {
                overlay.commit(result_and_state.state);
                for log in logs {
                    overlay.add_log(log);
                }

                let output = match output {
                    Output::Call(bytes) => bytes,
                    Output::Create(bytes, _) => bytes,
                };
                Ok(InterpreterRun {
                    overlay,
                    output,
                    gas_left: gas_limit.saturating_sub(gas_used),
                    gas_used,
                    timestamp,
                })
            }
            ExecutionResult::Revert { output, .. } => Err(SmelterError::Revert(output)),
            ExecutionResult::Halt { reason, .. } => {
                Err(SmelterError::Fatal(format!("{reason:?}")))
            }
        }
    }

}

struct InterpreterRun<'d> {
    overlay: OverlayDb<'d>,
    output: Bytes,
    gas_left: u64,
    gas_used: u64,
    timestamp: u64,
}

fn map_evm_error(err: EVMError<DbError>) -> SmelterError {
    match err {
        EVMError::Database(db_err) => db_err.0,
        other => SmelterError::Fatal(format!("{other:?}")),
    }
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor").field("latest", &self.latest).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address};
    use smelter_fork::testing::MockReader;
    use smelter_primitives::{ForkConfig, StateOverride};

    const FORK_BLOCK: u64 = 100;

    /// PUSH1 0x42, PUSH1 0x00, SSTORE, PUSH1 0x00 PUSH1 0x00 RETURN
    const STORE_42: &[u8] = &[0x60, 0x42, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xf3];
    /// Same store, then REVERT instead of RETURN.
    const STORE_42_REVERT: &[u8] = &[0x60, 0x42, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd];
    /// Stores the sent value at slot 0 when nonzero, then returns the
    /// current slot 0 as a 32-byte word.
    const STORE_VALUE: &[u8] = &[
        0x34, 0x15, 0x60, 0x09, 0x57, // CALLVALUE ISZERO PUSH1 0x09 JUMPI
        0x34, 0x60, 0x00, 0x55, // CALLVALUE PUSH1 0x00 SSTORE
        0x5b, 0x60, 0x00, 0x54, // JUMPDEST PUSH1 0x00 SLOAD
        0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3, // MSTORE RETURN 32 bytes
    ];
    /// LOG0 over empty memory, then RETURN.
    const EMIT_LOG: &[u8] = &[0x60, 0x00, 0x60, 0x00, 0xa0, 0x60, 0x00, 0x60, 0x00, 0xf3];
    /// MSTORE8 0xaa at 0, REVERT with that single byte.
    const REVERT_AA: &[u8] = &[0x60, 0xaa, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xfd];

    fn sender() -> Address {
        address!("0000000000000000000000000000000000000006")
    }

    fn target() -> Address {
        address!("0000000000000000000000000000000000000069")
    }

    fn setup(code: &[u8]) -> (Arc<MockReader>, Arc<ForkDb>, SerialExecutor) {
        let reader = Arc::new(MockReader::default());
        reader.put_account(target(), U256::ZERO, 1, Bytes::copy_from_slice(code));
        reader.put_account(sender(), U256::from(1_000_000_000u64), 0, Bytes::new());

        let db = Arc::new(ForkDb::new(
            reader.clone(),
            ForkConfig { chain_id: 1, fork_block: U256::from(FORK_BLOCK) },
        ));
        let exec = SerialExecutor::new(EnvConfig::new(1), db.clone(), reader.as_ref()).unwrap();
        (reader, db, exec)
    }

    fn msg_with_value(value: u64) -> CallMsg {
        CallMsg {
            from: sender(),
            to: target(),
            gas: 0,
            gas_price: 0,
            value: U256::from(value),
            data: Bytes::new(),
        }
    }

    #[test]
    fn test_persisted_store_reaches_fork_db() {
        let (_, db, exec) = setup(STORE_42);
        let mut tracer = CallTracer::new();

        let (tx_hash, _, _) = exec
            .call_and_persist(
                &msg_with_value(0),
                &mut tracer,
                &StateOverrides::new(),
                CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(db.storage_at(target(), B256::ZERO).unwrap(), B256::with_last_byte(0x42));
        assert!(exec.tx_store().get_transaction(tx_hash).is_some());
        assert!(exec.tx_store().get_receipt(tx_hash).is_some());
        assert!(exec.tx_store().get_trace(tx_hash).is_some());
        assert_eq!(exec.latest().number, U256::from(FORK_BLOCK + 1));
    }

    #[test]
    fn test_reverted_store_leaves_no_trace() {
        let (_, db, exec) = setup(STORE_42_REVERT);
        let mut tracer = CallTracer::new();

        let err = exec
            .call_and_persist(
                &msg_with_value(0),
                &mut tracer,
                &StateOverrides::new(),
                CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SmelterError::Revert(_)));

        // Nothing persisted: no slot write, no block, no transaction.
        assert_eq!(db.storage_at(target(), B256::ZERO).unwrap(), B256::ZERO);
        assert_eq!(exec.latest().number, U256::from(FORK_BLOCK));
        assert_eq!(exec.block_store().latest_number(), 0);
        assert!(exec.tx_store().all().is_empty());
    }

    #[test]
    fn test_read_only_call_discards_overlay() {
        let (_, db, exec) = setup(STORE_42);
        let mut tracer = CallTracer::new();

        exec.call(
            &msg_with_value(0),
            &mut tracer,
            &StateOverrides::new(),
            CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(db.storage_at(target(), B256::ZERO).unwrap(), B256::ZERO);
        assert_eq!(exec.latest().number, U256::from(FORK_BLOCK));
    }

    #[test]
    fn test_revert_output_propagates() {
        let (_, _, exec) = setup(REVERT_AA);
        let mut tracer = CallTracer::new();

        let err = exec
            .call(&msg_with_value(0), &mut tracer, &StateOverrides::new(), CancellationToken::new())
            .unwrap_err();
        match err {
            SmelterError::Revert(output) => assert_eq!(output.as_ref(), &[0xaa]),
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn test_blocks_and_nonces_advance_in_lockstep() {
        let (_, db, exec) = setup(STORE_VALUE);
        let overrides = StateOverrides::new();

        for (i, value) in [5u64, 9].iter().enumerate() {
            let mut tracer = CallTracer::new();
            let (tx_hash, _, _) = exec
                .call_and_persist(
                    &msg_with_value(*value),
                    &mut tracer,
                    &overrides,
                    CancellationToken::new(),
                )
                .unwrap();

            let stored = exec.tx_store().get_transaction(tx_hash).unwrap();
            assert_eq!(stored.nonce, i as u64 + 1);

            let receipt = exec.tx_store().get_receipt(tx_hash).unwrap();
            assert_eq!(receipt.block_number, U256::from(FORK_BLOCK + 1 + i as u64));
            assert_eq!(receipt.status, 1);
        }

        assert_eq!(db.get_nonce(sender()).unwrap(), 2);
        assert_eq!(exec.latest().number, U256::from(FORK_BLOCK + 2));

        // Parent linkage holds across the mints.
        let first = exec.block_store().by_number(FORK_BLOCK + 1).unwrap();
        let second = exec.block_store().by_number(FORK_BLOCK + 2).unwrap();
        assert_eq!(second.block.header.parent_hash, first.block.hash);
    }

    #[test]
    fn test_historical_captures_are_immutable() {
        let (_, _, exec) = setup(STORE_VALUE);
        let overrides = StateOverrides::new();

        for value in [5u64, 9] {
            let mut tracer = CallTracer::new();
            exec.call_and_persist(
                &msg_with_value(value),
                &mut tracer,
                &overrides,
                CancellationToken::new(),
            )
            .unwrap();
        }

        let at_first = exec.block_store().by_number(FORK_BLOCK + 1).unwrap();
        assert_eq!(
            at_first.accounts.read_slot(target(), B256::ZERO),
            B256::with_last_byte(5),
        );
        let at_second = exec.block_store().by_number(FORK_BLOCK + 2).unwrap();
        assert_eq!(
            at_second.accounts.read_slot(target(), B256::ZERO),
            B256::with_last_byte(9),
        );
    }

    #[test]
    fn test_call_with_db_reads_capture_not_live_state() {
        let (reader, _, exec) = setup(STORE_VALUE);
        let overrides = StateOverrides::new();

        for value in [5u64, 9] {
            let mut tracer = CallTracer::new();
            exec.call_and_persist(
                &msg_with_value(value),
                &mut tracer,
                &overrides,
                CancellationToken::new(),
            )
            .unwrap();
        }

        // Wrap the first capture as a store; a zero-value call returns the
        // slot as it stood at that height, not the live value.
        let capture = exec.block_store().by_number(FORK_BLOCK + 1).unwrap();
        let view = ForkDb::with_parts(
            reader.clone(),
            ForkConfig { chain_id: 1, fork_block: U256::from(FORK_BLOCK) },
            smelter_primitives::AccountsStorage::from_data(capture.accounts.clone_data()),
            smelter_primitives::AccountsState::from_data(capture.state.clone_data()),
        );

        let mut tracer = CallTracer::new();
        let (output, _) = exec
            .call_with_db(
                &msg_with_value(0),
                &mut tracer,
                &view,
                &overrides,
                CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(U256::from_be_slice(output.as_ref()), U256::from(5));
    }

    #[test]
    fn test_receipt_carries_logs() {
        let (_, _, exec) = setup(EMIT_LOG);
        let mut tracer = CallTracer::new();

        let (tx_hash, _, _) = exec
            .call_and_persist(
                &msg_with_value(0),
                &mut tracer,
                &StateOverrides::new(),
                CancellationToken::new(),
            )
            .unwrap();

        let receipt = exec.tx_store().get_receipt(tx_hash).unwrap();
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].address, target());
        assert_eq!(receipt.cumulative_gas_used, receipt.gas_used);

        let trace = exec.tx_store().get_trace(tx_hash).unwrap();
        assert!(trace.iter().any(|f| f.kind == "EMIT"));
        assert!(trace.iter().any(|f| f.kind == "CALL"));
    }

    #[test]
    fn test_overridden_balance_funds_transfer() {
        let (_, db, exec) = setup(&[]);
        let poor = address!("00000000000000000000000000000000000000cc");

        let mut overrides = StateOverrides::new();
        overrides
            .insert(poor, StateOverride { balance: Some(U256::MAX), ..Default::default() });

        let msg = CallMsg {
            from: poor,
            to: target(),
            gas: 0,
            gas_price: 0,
            value: U256::from(6969),
            data: Bytes::new(),
        };

        let mut tracer = CallTracer::new();
        exec.call_and_persist(&msg, &mut tracer, &overrides, CancellationToken::new()).unwrap();
        assert_eq!(db.get_balance(target()).unwrap(), U256::from(6969));
    }

    #[test]
    fn test_cancelled_token_aborts_without_mint() {
        let (_, _, exec) = setup(STORE_42);
        let token = CancellationToken::new();
        token.cancel();

        let mut tracer = CallTracer::new();
        let err = exec
            .call_and_persist(&msg_with_value(0), &mut tracer, &StateOverrides::new(), token)
            .unwrap_err();
        assert!(matches!(err, SmelterError::Aborted));
        assert_eq!(exec.latest().number, U256::from(FORK_BLOCK));
    }
}
