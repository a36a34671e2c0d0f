//! Per-account state and storage aggregates
//!
//! Two maps back every fork store and overlay: `AccountsState` holds
//! balance/nonce pairs, `AccountsStorage` holds code and storage slots.
//! They are kept separate because they are seeded from distinct upstream
//! calls and merged under different write paths. Entries carry an
//! `initialized` flag; an uninitialized entry is indistinguishable from a
//! missing one, and reads and writes ignore it.

use alloy_primitives::{Address, Bytes, B256, U256};
use std::{
    collections::HashMap,
    sync::RwLock,
};

/// Balance and nonce of a single account.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub address: Address,
    pub balance: U256,
    pub nonce: u64,
    pub initialized: bool,
}

/// Code and storage slots of a single account.
///
/// Code hash and storage root are derived on demand rather than stored.
#[derive(Debug, Clone, Default)]
pub struct AccountStorage {
    pub code: Bytes,
    pub initialized: bool,
    pub slots: HashMap<B256, B256>,
}

/// Map of account balances and nonces, guarded for concurrent readers.
#[derive(Debug, Default)]
pub struct AccountsState {
    data: RwLock<HashMap<Address, AccountState>>,
}

impl AccountsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a previously cloned snapshot.
    pub fn from_data(data: HashMap<Address, AccountState>) -> Self {
        Self { data: RwLock::new(data) }
    }

    pub fn exists(&self, addr: Address) -> bool {
        self.data.read().unwrap().get(&addr).is_some_and(|s| s.initialized)
    }

    /// Defensive copy of an initialized entry.
    pub fn state_of(&self, addr: Address) -> Option<AccountState> {
        self.data.read().unwrap().get(&addr).filter(|s| s.initialized).cloned()
    }

    pub fn get_balance(&self, addr: Address) -> Option<U256> {
        self.data.read().unwrap().get(&addr).filter(|s| s.initialized).map(|s| s.balance)
    }

    pub fn set_balance(&self, addr: Address, balance: U256) {
        let mut data = self.data.write().unwrap();
        if let Some(s) = data.get_mut(&addr).filter(|s| s.initialized) {
            s.balance = balance;
        }
    }

    pub fn get_nonce(&self, addr: Address) -> u64 {
        self.data
            .read()
            .unwrap()
            .get(&addr)
            .filter(|s| s.initialized)
            .map(|s| s.nonce)
            .unwrap_or_default()
    }

    pub fn set_nonce(&self, addr: Address, nonce: u64) {
        let mut data = self.data.write().unwrap();
        if let Some(s) = data.get_mut(&addr).filter(|s| s.initialized) {
            s.nonce = nonce;
        }
    }

    /// Initialize an entry, keeping an existing initialized one.
    pub fn new_account(&self, addr: Address, nonce: u64, balance: U256) {
        let mut data = self.data.write().unwrap();
        if data.get(&addr).is_some_and(|s| s.initialized) {
            return;
        }

        data.insert(addr, AccountState { address: addr, balance, nonce, initialized: true });
    }

    /// Deep clone of the underlying map.
    pub fn clone_data(&self) -> HashMap<Address, AccountState> {
        self.data.read().unwrap().clone()
    }

    /// Replace the underlying map wholesale.
    pub fn replace(&self, data: HashMap<Address, AccountState>) {
        *self.data.write().unwrap() = data;
    }

    /// Merge another map into this one, entry by entry. Balance and nonce
    /// of existing entries are overwritten.
    pub fn apply(&self, other: &Self) {
        let mut data = self.data.write().unwrap();
        for (addr, incoming) in other.data.read().unwrap().iter() {
            match data.get_mut(addr) {
                Some(existing) => {
                    existing.balance = incoming.balance;
                    existing.nonce = incoming.nonce;
                }
                None => {
                    data.insert(*addr, incoming.clone());
                }
            }
        }
    }
}

/// Map of account code and storage slots, guarded for concurrent readers.
#[derive(Debug, Default)]
pub struct AccountsStorage {
    data: RwLock<HashMap<Address, AccountStorage>>,
}

impl AccountsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a previously cloned snapshot.
    pub fn from_data(data: HashMap<Address, AccountStorage>) -> Self {
        Self { data: RwLock::new(data) }
    }

    /// Defensive copy of an initialized entry.
    pub fn state_of(&self, addr: Address) -> Option<AccountStorage> {
        self.data.read().unwrap().get(&addr).filter(|s| s.initialized).cloned()
    }

    /// Cached slot value, `None` if the slot was never cached. Lets callers
    /// distinguish "cached as zero" from "not seen yet".
    pub fn cached_slot(&self, addr: Address, key: B256) -> Option<B256> {
        self.data
            .read()
            .unwrap()
            .get(&addr)
            .filter(|s| s.initialized)
            .and_then(|s| s.slots.get(&key).copied())
    }

    /// Cached slot value, zero if the slot was never written.
    pub fn read_slot(&self, addr: Address, key: B256) -> B256 {
        self.data
            .read()
            .unwrap()
            .get(&addr)
            .filter(|s| s.initialized)
            .and_then(|s| s.slots.get(&key).copied())
            .unwrap_or_default()
    }

    pub fn set_slot(&self, addr: Address, key: B256, value: B256) {
        let mut data = self.data.write().unwrap();
        if let Some(s) = data.get_mut(&addr).filter(|s| s.initialized) {
            s.slots.insert(key, value);
        }
    }

    pub fn code_of(&self, addr: Address) -> Option<Bytes> {
        self.data.read().unwrap().get(&addr).filter(|s| s.initialized).map(|s| s.code.clone())
    }

    pub fn set_code(&self, addr: Address, code: Bytes) {
        let mut data = self.data.write().unwrap();
        if let Some(s) = data.get_mut(&addr).filter(|s| s.initialized) {
            s.code = code;
        }
    }

    /// Initialize an entry with code and no slots, keeping an existing
    /// initialized one.
    pub fn new_account(&self, addr: Address, code: Bytes) {
        self.new_account_with_slots(addr, code, HashMap::new());
    }

    /// Initialize an entry with code and pre-seeded slots, keeping an
    /// existing initialized one.
    pub fn new_account_with_slots(&self, addr: Address, code: Bytes, slots: HashMap<B256, B256>) {
        let mut data = self.data.write().unwrap();
        if data.get(&addr).is_some_and(|s| s.initialized) {
            return;
        }

        data.insert(addr, AccountStorage { code, initialized: true, slots });
    }

    /// Deep clone of the underlying map.
    pub fn clone_data(&self) -> HashMap<Address, AccountStorage> {
        self.data.read().unwrap().clone()
    }

    /// Replace the underlying map wholesale.
    pub fn replace(&self, data: HashMap<Address, AccountStorage>) {
        *self.data.write().unwrap() = data;
    }

    /// Merge another map into this one. Code overwrites, slots merge key
    /// by key.
    pub fn apply(&self, other: &Self) {
        let mut data = self.data.write().unwrap();
        for (addr, incoming) in other.data.read().unwrap().iter() {
            match data.get_mut(addr) {
                Some(existing) => {
                    existing.code = incoming.code.clone();
                    for (k, v) in &incoming.slots {
                        existing.slots.insert(*k, *v);
                    }
                }
                None => {
                    data.insert(*addr, incoming.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_state_initialization_is_sticky() {
        let state = AccountsState::new();
        let addr = address!("1111111111111111111111111111111111111111");

        assert!(!state.exists(addr));
        state.new_account(addr, 3, U256::from(100));
        assert!(state.exists(addr));

        // A second initialization keeps the first values.
        state.new_account(addr, 9, U256::from(999));
        assert_eq!(state.get_nonce(addr), 3);
        assert_eq!(state.get_balance(addr), Some(U256::from(100)));
    }

    #[test]
    fn test_writes_ignore_unknown_accounts() {
        let state = AccountsState::new();
        let addr = address!("2222222222222222222222222222222222222222");

        state.set_balance(addr, U256::from(1));
        assert_eq!(state.get_balance(addr), None);

        let storage = AccountsStorage::new();
        storage.set_slot(addr, B256::ZERO, B256::repeat_byte(1));
        assert_eq!(storage.read_slot(addr, B256::ZERO), B256::ZERO);
    }

    #[test]
    fn test_clone_is_independent() {
        let state = AccountsState::new();
        let addr = address!("3333333333333333333333333333333333333333");
        state.new_account(addr, 0, U256::from(50));

        let snapshot = state.clone_data();
        state.set_balance(addr, U256::from(75));

        assert_eq!(snapshot.get(&addr).unwrap().balance, U256::from(50));
        assert_eq!(state.get_balance(addr), Some(U256::from(75)));
    }

    #[test]
    fn test_apply_merges_entry_by_entry() {
        let a = AccountsStorage::new();
        let b = AccountsStorage::new();
        let addr = address!("4444444444444444444444444444444444444444");

        a.new_account(addr, Bytes::from_static(&[0x60, 0x00]));
        a.set_slot(addr, B256::repeat_byte(1), B256::repeat_byte(0xaa));

        b.new_account(addr, Bytes::from_static(&[0x60, 0x01]));
        b.set_slot(addr, B256::repeat_byte(2), B256::repeat_byte(0xbb));

        a.apply(&b);

        let merged = a.state_of(addr).unwrap();
        assert_eq!(merged.code, Bytes::from_static(&[0x60, 0x01]));
        // Untouched slots survive, incoming slots land.
        assert_eq!(a.read_slot(addr, B256::repeat_byte(1)), B256::repeat_byte(0xaa));
        assert_eq!(a.read_slot(addr, B256::repeat_byte(2)), B256::repeat_byte(0xbb));
    }

    #[test]
    fn test_replace_restores_snapshot() {
        let state = AccountsState::new();
        let addr = address!("5555555555555555555555555555555555555555");
        state.new_account(addr, 1, U256::from(10));

        let snapshot = state.clone_data();
        state.set_nonce(addr, 7);
        state.replace(snapshot);

        assert_eq!(state.get_nonce(addr), 1);
    }
}
