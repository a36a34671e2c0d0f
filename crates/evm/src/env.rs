//! Interpreter environment construction

use alloy_primitives::{TxKind, U256};
use revm::{
    context::{BlockEnv, CfgEnv, TxEnv},
    primitives::hardfork::SpecId,
};
use smelter_primitives::{block::BLOCK_GAS_LIMIT, CallMsg};

/// Gas limit applied when a message arrives with zero gas.
pub const DEFAULT_CALL_GAS: u64 = 30_000_000;

/// Chain parameters and environment builders shared by every execution in a
/// session.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub chain_id: u64,
    pub spec: SpecId,
    pub default_gas: u64,
    pub block_gas_limit: u64,
    pub base_fee: u64,
}

impl EnvConfig {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            spec: SpecId::CANCUN,
            default_gas: DEFAULT_CALL_GAS,
            block_gas_limit: BLOCK_GAS_LIMIT,
            base_fee: 0,
        }
    }

    /// Interpreter config. Preflight checks are switched off: senders are
    /// impersonated, so nonces and balances cannot be required to line up
    /// with a signed transaction, and contract accounts must be allowed to
    /// originate calls.
    pub fn cfg_env(&self) -> CfgEnv {
        let mut cfg = CfgEnv::new_with_spec(self.spec).with_chain_id(self.chain_id);
        cfg.disable_nonce_check = true;
        cfg.disable_balance_check = true;
        cfg.disable_block_gas_limit = true;
        cfg.disable_eip3607 = true;
        cfg.disable_base_fee = true;
        cfg
    }

    pub fn block_env(&self, number: U256, timestamp: u64) -> BlockEnv {
        BlockEnv {
            number,
            timestamp: U256::from(timestamp),
            gas_limit: self.block_gas_limit,
            basefee: self.base_fee,
            ..Default::default()
        }
    }

    pub fn tx_env(&self, msg: &CallMsg) -> TxEnv {
        let gas = if msg.gas == 0 { self.default_gas } else { msg.gas };
        TxEnv {
            caller: msg.from,
            kind: TxKind::Call(msg.to),
            value: msg.value,
            data: msg.data.clone(),
            gas_limit: gas,
            gas_price: msg.gas_price,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    #[test]
    fn test_zero_gas_uses_default() {
        let cfg = EnvConfig::new(1);
        let msg = CallMsg { to: Address::ZERO, ..Default::default() };
        assert_eq!(cfg.tx_env(&msg).gas_limit, DEFAULT_CALL_GAS);

        let msg = CallMsg { gas: 21_000, ..Default::default() };
        assert_eq!(cfg.tx_env(&msg).gas_limit, 21_000);
    }

    #[test]
    fn test_block_env_carries_fixed_gas_limit() {
        let cfg = EnvConfig::new(1);
        let env = cfg.block_env(U256::from(7), 1_700_000_000);
        assert_eq!(env.gas_limit, BLOCK_GAS_LIMIT);
        assert_eq!(env.basefee, 0);
    }
}
