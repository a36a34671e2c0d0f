//! Synthetic transaction receipts

use alloy_primitives::{Address, Log, B256, U256};

/// Receipt minted alongside every persisted call.
///
/// Blocks carry exactly one transaction, so `cumulative_gas_used` equals
/// `gas_used`. The logs bloom is deliberately zero-filled: bloom-based
/// filtering over minted blocks finds nothing.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// 1 for success, 0 for revert.
    pub status: u64,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    pub tx_hash: B256,
    /// The call target; zero when nothing was created.
    pub contract_address: Address,
    /// Stamped once the containing block hash is known.
    pub block_hash: B256,
    pub block_number: U256,
    /// Always 0: one transaction per block.
    pub tx_index: u64,
    pub effective_gas_price: u128,
}
