//! Fork configuration and state overrides

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable per-session description of the pinned upstream fork point.
///
/// The fork block is a full-width integer: some chains carry heights that
/// do not fit in 64 bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConfig {
    pub chain_id: u64,
    pub fork_block: U256,
}

/// Client-supplied replacement values for a single account, applied to the
/// scratch overlay before every execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    #[serde(default)]
    pub code: Bytes,
    #[serde(default)]
    pub storage: HashMap<B256, B256>,
}

/// Override set keyed by account. Application is idempotent.
pub type StateOverrides = HashMap<Address, StateOverride>;
