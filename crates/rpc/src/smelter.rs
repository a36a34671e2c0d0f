//! smelter namespace service
//!
//! Session-level controls: impersonation, state overrides, and a JSON dump
//! of the execution context for debugging.

use crate::context::SessionStore;
use alloy_primitives::Address;
use smelter_primitives::{SmelterError, StateOverrides};
use std::sync::Arc;

pub struct SmelterRpc {
    sessions: Arc<SessionStore>,
}

impl SmelterRpc {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Execute everything in this session as `address`, signatures unseen.
    /// This is a debugging tool, not a node.
    pub fn impersonate_account(&self, key: &str, address: Address) -> Result<(), SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        *ctx.impersonator.write().unwrap() = address;
        tracing::info!(key, %address, "impersonation enabled");
        Ok(())
    }

    pub fn stop_impersonating_account(&self, key: &str) -> Result<(), SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        *ctx.impersonator.write().unwrap() = Address::ZERO;
        Ok(())
    }

    /// Replace the session's override set, applied before every execution.
    pub fn set_state_overrides(
        &self,
        key: &str,
        overrides: StateOverrides,
    ) -> Result<(), SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        *ctx.overrides.write().unwrap() = overrides;
        Ok(())
    }

    /// Debug dump of the session.
    pub fn get_state(&self, key: &str) -> Result<serde_json::Value, SmelterError> {
        let ctx = self.sessions.get_or_create(key)?;
        let latest = ctx.executor.latest();

        Ok(serde_json::json!({
            "impersonator": ctx.impersonator(),
            "overrides": ctx.overrides(),
            "createdAgoSecs": ctx.created_at.elapsed().as_secs(),
            "forkConfig": self.sessions.config(),
            "latest": {
                "hash": latest.hash,
                "number": latest.number,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use smelter_fork::testing::MockReader;
    use smelter_primitives::{ForkConfig, StateOverride};
    use std::time::Duration;

    fn service() -> SmelterRpc {
        let reader = Arc::new(MockReader::default());
        let sessions = Arc::new(SessionStore::new(
            ForkConfig { chain_id: 1, fork_block: U256::from(100) },
            reader,
            Duration::from_secs(60),
        ));
        SmelterRpc::new(sessions)
    }

    #[test]
    fn test_impersonation_round_trip() {
        let rpc = service();
        let who = Address::repeat_byte(0x69);

        rpc.impersonate_account("s", who).unwrap();
        let dump = rpc.get_state("s").unwrap();
        assert_eq!(dump["impersonator"], serde_json::json!(who));

        rpc.stop_impersonating_account("s").unwrap();
        let dump = rpc.get_state("s").unwrap();
        assert_eq!(dump["impersonator"], serde_json::json!(Address::ZERO));
    }

    #[test]
    fn test_overrides_are_stored_per_session() {
        let rpc = service();
        let mut overrides = StateOverrides::new();
        overrides.insert(
            Address::repeat_byte(1),
            StateOverride { balance: Some(U256::MAX), ..Default::default() },
        );

        rpc.set_state_overrides("a", overrides).unwrap();

        let a = rpc.get_state("a").unwrap();
        let b = rpc.get_state("b").unwrap();
        assert_eq!(a["overrides"].as_object().unwrap().len(), 1);
        assert!(b["overrides"].as_object().unwrap().is_empty());
    }
}
