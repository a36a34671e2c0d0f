//! Lazy copy-on-read fork store
//!
//! Account state is seeded from the upstream reader on first touch, always
//! at the pinned fork block, and cached for the lifetime of the session.
//! The balance/nonce pair and the code/slots aggregate are created
//! atomically so an address is either fully known or fully absent.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use revm::primitives::KECCAK_EMPTY;
use smelter_primitives::{
    AccountState, AccountStorage, AccountsState, AccountsStorage, ForkConfig, SmelterError,
    StateReader,
};
use std::sync::Arc;

/// Fork store: remote reader, pinned config, and the two cached aggregates.
pub struct ForkDb {
    reader: Arc<dyn StateReader>,
    config: ForkConfig,
    accounts: AccountsStorage,
    state: AccountsState,
}

impl ForkDb {
    pub fn new(reader: Arc<dyn StateReader>, config: ForkConfig) -> Self {
        Self::with_parts(reader, config, AccountsStorage::new(), AccountsState::new())
    }

    /// Assemble a store around pre-seeded aggregates. Used to view a frozen
    /// block capture as a live store for historical calls.
    pub fn with_parts(
        reader: Arc<dyn StateReader>,
        config: ForkConfig,
        accounts: AccountsStorage,
        state: AccountsState,
    ) -> Self {
        Self { reader, config, accounts, state }
    }

    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    /// Seed an address from the upstream at the fork block. Idempotent:
    /// once an address is initialized this never issues another read.
    pub fn create_state(&self, addr: Address) -> Result<(), SmelterError> {
        if self.state.exists(addr) {
            return Ok(());
        }

        let block = self.config.fork_block;
        let code = self.reader.code_at(addr, block)?;
        let balance = self.reader.balance_at(addr, block)?;
        let nonce = self.reader.nonce_at(addr, block)?;

        tracing::debug!(%addr, %balance, nonce, code_len = code.len(), "seeded account from upstream");
        self.state.new_account(addr, nonce, balance);
        self.accounts.new_account(addr, code);
        Ok(())
    }

    /// Seed an address from values already in hand (batched prefetch path).
    pub fn create_state_with_values(&self, addr: Address, nonce: u64, balance: U256, code: Bytes) {
        self.state.new_account(addr, nonce, balance);
        self.accounts.new_account(addr, code);
    }

    /// Touch and return defensive copies of both aggregates for an address.
    pub fn state_of(&self, addr: Address) -> Result<(AccountState, AccountStorage), SmelterError> {
        self.create_state(addr)?;
        // Both lookups must succeed: the pair is created atomically.
        let state = self
            .state
            .state_of(addr)
            .ok_or_else(|| SmelterError::Fatal(format!("account state missing for {addr}")))?;
        let storage = self
            .accounts
            .state_of(addr)
            .ok_or_else(|| SmelterError::Fatal(format!("account storage missing for {addr}")))?;
        Ok((state, storage))
    }

    pub fn get_balance(&self, addr: Address) -> Result<U256, SmelterError> {
        self.create_state(addr)?;
        Ok(self.state.get_balance(addr).unwrap_or_default())
    }

    pub fn set_balance(&self, addr: Address, balance: U256) -> Result<(), SmelterError> {
        self.create_state(addr)?;
        self.state.set_balance(addr, balance);
        Ok(())
    }

    pub fn get_nonce(&self, addr: Address) -> Result<u64, SmelterError> {
        self.create_state(addr)?;
        Ok(self.state.get_nonce(addr))
    }

    pub fn set_nonce(&self, addr: Address, nonce: u64) -> Result<(), SmelterError> {
        self.create_state(addr)?;
        self.state.set_nonce(addr, nonce);
        Ok(())
    }

    pub fn get_code(&self, addr: Address) -> Result<Bytes, SmelterError> {
        self.create_state(addr)?;
        Ok(self.accounts.code_of(addr).unwrap_or_default())
    }

    pub fn set_code(&self, addr: Address, code: Bytes) -> Result<(), SmelterError> {
        self.create_state(addr)?;
        self.accounts.set_code(addr, code);
        Ok(())
    }

    /// Keccak of the account code; the canonical empty-code hash when the
    /// account carries no code (EXTCODEHASH contract).
    pub fn get_code_hash(&self, addr: Address) -> Result<B256, SmelterError> {
        let code = self.get_code(addr)?;
        if code.is_empty() {
            return Ok(KECCAK_EMPTY);
        }
        Ok(keccak256(&code))
    }

    pub fn get_code_size(&self, addr: Address) -> Result<usize, SmelterError> {
        Ok(self.get_code(addr)?.len())
    }

    /// Slot read with cache fall-through: a cached value (zero included) is
    /// served locally, anything else is fetched at the fork block and
    /// cached.
    pub fn storage_at(&self, addr: Address, key: B256) -> Result<B256, SmelterError> {
        self.create_state(addr)?;
        if let Some(cached) = self.accounts.cached_slot(addr, key) {
            return Ok(cached);
        }

        let value = self.reader.storage_at(addr, key, self.config.fork_block)?;
        self.accounts.set_slot(addr, key, value);
        Ok(value)
    }

    pub fn set_storage(&self, addr: Address, key: B256, value: B256) -> Result<(), SmelterError> {
        self.create_state(addr)?;
        self.accounts.set_slot(addr, key, value);
        Ok(())
    }

    /// Bulk slot seeding for prefetched data. Slots for addresses that were
    /// never initialized are skipped.
    pub fn load_slots(&self, slots: &[(Address, B256, B256)]) {
        for (addr, key, value) in slots {
            if self.state.exists(*addr) {
                self.accounts.set_slot(*addr, *key, *value);
            } else {
                tracing::debug!(addr = %addr, "skipping prefetched slot for unseeded account");
            }
        }
    }

    /// Merge an overlay's balance/nonce map into the store.
    pub fn apply_state(&self, other: &AccountsState) {
        self.state.apply(other);
    }

    /// Merge an overlay's code/slots map into the store.
    pub fn apply_storage(&self, other: &AccountsStorage) {
        self.accounts.apply(other);
    }

    /// Deep clone of both aggregates, for frozen block captures.
    pub fn copy(&self) -> (AccountsStorage, AccountsState) {
        (
            AccountsStorage::from_data(self.accounts.clone_data()),
            AccountsState::from_data(self.state.clone_data()),
        )
    }
}

impl std::fmt::Debug for ForkDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkDb").field("config", &self.config).finish_non_exhaustive()
    }
}
