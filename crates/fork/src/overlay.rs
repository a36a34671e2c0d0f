//! Per-execution dirty overlay
//!
//! The interpreter runs against an [`OverlayDb`]: reads that miss the
//! overlay fall through to the [`ForkDb`] (which may in turn hit the
//! upstream), writes land in the overlay only. The executor either merges
//! the overlay back into the fork store after a successful persisted call
//! or drops it on the floor.

use crate::ForkDb;
use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use revm::{
    bytecode::Bytecode,
    database_interface::DBErrorMarker,
    primitives::KECCAK_EMPTY,
    state::{AccountInfo, EvmState},
    Database, DatabaseCommit,
};
use smelter_primitives::{
    AccountState, AccountStorage, AccountsState, AccountsStorage, SmelterError, StateOverrides,
};
use std::{collections::HashMap, fmt};
use tokio_util::sync::CancellationToken;

/// Database error type handed to the interpreter.
#[derive(Debug)]
pub struct DbError(pub SmelterError);

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DbError {}

impl DBErrorMarker for DbError {}

impl From<SmelterError> for DbError {
    fn from(e: SmelterError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Clone)]
struct OverlaySnapshot {
    accounts: HashMap<Address, AccountStorage>,
    state: HashMap<Address, AccountState>,
    log_len: usize,
}

/// Scratch state layered over a fork store for exactly one execution.
pub struct OverlayDb<'a> {
    db: &'a ForkDb,
    accounts: AccountsStorage,
    state: AccountsState,
    logs: Vec<Log>,
    code_index: HashMap<B256, Bytecode>,
    snapshots: HashMap<u64, OverlaySnapshot>,
    snapshot_counter: u64,
    warnings: Vec<String>,
    token: CancellationToken,
}

impl<'a> OverlayDb<'a> {
    pub fn new(db: &'a ForkDb, token: CancellationToken) -> Self {
        Self {
            db,
            accounts: AccountsStorage::new(),
            state: AccountsState::new(),
            logs: Vec::new(),
            code_index: HashMap::new(),
            snapshots: HashMap::new(),
            snapshot_counter: 0,
            warnings: Vec::new(),
            token,
        }
    }

    /// Copy an address into the overlay on first touch. Later reads and
    /// writes never leave the overlay.
    fn load(&mut self, addr: Address) -> Result<(), SmelterError> {
        if self.state.exists(addr) {
            return Ok(());
        }
        if self.token.is_cancelled() {
            return Err(SmelterError::Aborted);
        }

        let (state, storage) = self.db.state_of(addr)?;
        self.state.new_account(addr, state.nonce, state.balance);
        self.accounts.new_account_with_slots(addr, storage.code, storage.slots);
        Ok(())
    }

    fn unsupported(&mut self, what: &str) {
        self.warnings.push(format!("unimplemented {what}"));
    }

    pub fn create_account(&mut self, addr: Address) {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("create_account: {err}"));
        }
    }

    pub fn get_balance(&mut self, addr: Address) -> U256 {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("get_balance: {err}"));
            return U256::ZERO;
        }
        self.state.get_balance(addr).unwrap_or_default()
    }

    pub fn add_balance(&mut self, addr: Address, amount: U256) {
        let balance = self.get_balance(addr);
        self.state.set_balance(addr, balance.saturating_add(amount));
    }

    pub fn sub_balance(&mut self, addr: Address, amount: U256) {
        let balance = self.get_balance(addr);
        self.state.set_balance(addr, balance.saturating_sub(amount));
    }

    pub fn get_nonce(&mut self, addr: Address) -> u64 {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("get_nonce: {err}"));
            return 0;
        }
        self.state.get_nonce(addr)
    }

    pub fn set_nonce(&mut self, addr: Address, nonce: u64) {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("set_nonce: {err}"));
            return;
        }
        self.state.set_nonce(addr, nonce);
    }

    pub fn get_code(&mut self, addr: Address) -> Bytes {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("get_code: {err}"));
            return Bytes::new();
        }
        self.accounts.code_of(addr).unwrap_or_default()
    }

    pub fn set_code(&mut self, addr: Address, code: Bytes) {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("set_code: {err}"));
            return;
        }
        self.accounts.set_code(addr, code);
    }

    /// Keccak of the account code; the canonical empty-code hash for
    /// codeless accounts.
    pub fn get_code_hash(&mut self, addr: Address) -> B256 {
        let code = self.get_code(addr);
        if code.is_empty() {
            return KECCAK_EMPTY;
        }
        keccak256(&code)
    }

    pub fn get_code_size(&mut self, addr: Address) -> usize {
        self.get_code(addr).len()
    }

    /// Slot read: overlay first, then the fork store (which caches remote
    /// values), memoizing the result in the overlay.
    pub fn get_state(&mut self, addr: Address, key: B256) -> Result<B256, SmelterError> {
        self.load(addr)?;
        if let Some(cached) = self.accounts.cached_slot(addr, key) {
            return Ok(cached);
        }

        let value = self.db.storage_at(addr, key)?;
        self.accounts.set_slot(addr, key, value);
        Ok(value)
    }

    pub fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        if let Err(err) = self.load(addr) {
            self.warnings.push(format!("set_state: {err}"));
            return;
        }
        self.accounts.set_slot(addr, key, value);
    }

    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn exist(&mut self, addr: Address) -> bool {
        !self.empty(addr)
    }

    pub fn empty(&mut self, addr: Address) -> bool {
        let balance = self.get_balance(addr);
        let code_hash = self.get_code_hash(addr);
        balance.is_zero() && self.get_nonce(addr) == 0 && code_hash == KECCAK_EMPTY
    }

    /// Take a deep snapshot of the overlay and return its id. Ids are
    /// monotonic within one overlay.
    pub fn snapshot(&mut self) -> u64 {
        self.snapshot_counter += 1;
        self.snapshots.insert(
            self.snapshot_counter,
            OverlaySnapshot {
                accounts: self.accounts.clone_data(),
                state: self.state.clone_data(),
                log_len: self.logs.len(),
            },
        );
        self.snapshot_counter
    }

    /// Restore the overlay to the state captured by `id`. Snapshots taken
    /// after `id` become invalid; logs emitted after it are truncated. An
    /// unknown id records a warning and leaves the overlay untouched.
    pub fn revert_to_snapshot(&mut self, id: u64) {
        let Some(snap) = self.snapshots.remove(&id) else {
            self.warnings.push(format!("failed to revert to snapshot {id}"));
            return;
        };

        self.accounts.replace(snap.accounts);
        self.state.replace(snap.state);
        self.logs.truncate(snap.log_len);
        self.snapshots.retain(|&k, _| k < id);
    }

    /// Apply client state overrides before execution. Idempotent.
    pub fn apply_overrides(&mut self, overrides: &StateOverrides) -> Result<(), SmelterError> {
        for (addr, replacement) in overrides {
            self.load(*addr)?;

            if let Some(balance) = replacement.balance {
                self.state.set_balance(*addr, balance);
            }
            if !replacement.code.is_empty() {
                self.accounts.set_code(*addr, replacement.code.clone());
            }
            for (key, value) in &replacement.storage {
                self.accounts.set_slot(*addr, *key, *value);
            }
        }

        Ok(())
    }

    // The interpreter's wider state surface. These members of the contract
    // are not exercised by the supported call shapes; they record a warning
    // and return zero values rather than aborting execution.

    pub fn transient_state(&mut self, _addr: Address, _key: B256) -> B256 {
        self.unsupported("transient_state");
        B256::ZERO
    }

    pub fn set_transient_state(&mut self, _addr: Address, _key: B256, _value: B256) {
        self.unsupported("set_transient_state");
    }

    pub fn self_destruct(&mut self, _addr: Address) {
        self.unsupported("self_destruct");
    }

    pub fn refund(&mut self) -> u64 {
        self.unsupported("refund");
        0
    }

    pub fn storage_root(&mut self, _addr: Address) -> B256 {
        self.unsupported("storage_root");
        B256::ZERO
    }

    pub fn add_preimage(&mut self, _hash: B256, _data: &[u8]) {
        self.unsupported("add_preimage");
    }

    /// Warnings accumulated during execution; never user-visible errors.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The overlay's write sets, for merging into the fork store.
    pub fn parts(&self) -> (&AccountsStorage, &AccountsState) {
        (&self.accounts, &self.state)
    }
}

impl Database for OverlayDb<'_> {
    type Error = DbError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.load(address)?;

        let balance = self.state.get_balance(address).unwrap_or_default();
        let nonce = self.state.get_nonce(address);
        let code = self.accounts.code_of(address).unwrap_or_default();

        let (code_hash, bytecode) = if code.is_empty() {
            (KECCAK_EMPTY, None)
        } else {
            let hash = keccak256(&code);
            let bytecode = Bytecode::new_raw(code);
            self.code_index.insert(hash, bytecode.clone());
            (hash, Some(bytecode))
        };

        Ok(Some(AccountInfo { balance, nonce, code_hash, code: bytecode }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(Bytecode::new());
        }

        self.code_index.get(&code_hash).cloned().ok_or_else(|| {
            DbError(SmelterError::Fatal(format!("code not found for hash {code_hash}")))
        })
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        let key = B256::from(index.to_be_bytes::<32>());
        let value = self.get_state(address, key)?;
        Ok(U256::from_be_bytes(value.0))
    }

    /// Hash for the BLOCKHASH opcode: keccak of the decimal rendering of
    /// the height. Deterministic but not authentic chain data.
    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        Ok(keccak256(number.to_string().as_bytes()))
    }
}

impl DatabaseCommit for OverlayDb<'_> {
    fn commit(&mut self, changes: EvmState) {
        for (address, account) in changes {
            if !account.is_touched() {
                continue;
            }

            if let Err(err) = self.load(address) {
                self.warnings.push(format!("commit load {address}: {err}"));
                continue;
            }

            self.state.set_balance(address, account.info.balance);
            self.state.set_nonce(address, account.info.nonce);

            if let Some(code) = account.info.code {
                if account.info.code_hash != KECCAK_EMPTY && account.info.code_hash != B256::ZERO {
                    self.accounts.set_code(address, code.original_bytes());
                    self.code_index.insert(account.info.code_hash, code);
                }
            }

            for (slot, value) in account.storage {
                if value.is_changed() {
                    self.accounts.set_slot(
                        address,
                        B256::from(slot.to_be_bytes::<32>()),
                        B256::from(value.present_value.to_be_bytes::<32>()),
                    );
                }
            }
        }
    }
}

impl fmt::Debug for OverlayDb<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayDb")
            .field("logs", &self.logs.len())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}
