//! Transaction-shape-aware cache warming
//!
//! Cold execution discovers storage one slot at a time, each a round trip to
//! the upstream. For call shapes we recognize by selector, the prefetcher
//! instead issues one batched request for the target account plus the slots
//! that shape is known to touch, and seeds the fork store before the
//! interpreter starts.

use crate::ForkDb;
use alloy_primitives::{Address, Bytes, B256, U256};
use smelter_primitives::{
    BatchParam, BatchRequest, CallMsg, ForkConfig, SmelterError, StateReader, METHOD_GET_BALANCE,
    METHOD_GET_CODE, METHOD_GET_NONCE, METHOD_GET_STORAGE_AT,
};
use std::{collections::HashMap, sync::Arc};

/// Plans the storage slots a recognized call will touch.
type SlotPlanner = fn(&CallMsg, &ForkConfig) -> Vec<(Address, B256)>;

struct Handler {
    planner: SlotPlanner,
    /// Treat the first planned slot as a proxy implementation pointer and
    /// seed that account as well.
    follow_singleton: bool,
}

/// Selector-keyed batch prefetcher over a batching-capable reader.
pub struct Prefetcher {
    rpc: Arc<dyn StateReader>,
    handlers: HashMap<[u8; 4], Handler>,
}

/// Gnosis Safe `execTransaction(...)`.
const SAFE_EXEC_SELECTOR: [u8; 4] = [0x6a, 0x76, 0x12, 0x02];

fn safe_exec_slots(msg: &CallMsg, _config: &ForkConfig) -> Vec<(Address, B256)> {
    let slot = |n: u64| B256::from(U256::from(n).to_be_bytes::<32>());
    vec![
        // implementation singleton
        (msg.to, slot(0)),
        // nonce
        (msg.to, slot(5)),
        // threshold
        (msg.to, slot(4)),
        // guard
        (
            msg.to,
            "0x4a204f620c8c5ccdca3fd54d003badd85ba500436a431f0cbda4f558c93c34c8"
                .parse()
                .expect("static slot"),
        ),
    ]
}

impl Prefetcher {
    pub fn new(rpc: Arc<dyn StateReader>) -> Self {
        let mut prefetcher = Self { rpc, handlers: HashMap::new() };
        prefetcher.register(SAFE_EXEC_SELECTOR, safe_exec_slots, true);
        prefetcher
    }

    pub fn register(&mut self, selector: [u8; 4], planner: SlotPlanner, follow_singleton: bool) {
        self.handlers.insert(selector, Handler { planner, follow_singleton });
    }

    /// Inspect a call and warm the fork store for it. A quiet no-op when
    /// batching is unavailable or the selector is unknown.
    pub fn prefetch(&self, db: &ForkDb, msg: &CallMsg) -> Result<(), SmelterError> {
        if !self.rpc.supports_batching() || msg.data.len() < 4 {
            return Ok(());
        }

        let selector: [u8; 4] = msg.data[..4].try_into().expect("length checked");
        let Some(handler) = self.handlers.get(&selector) else {
            return Ok(());
        };

        let slots = (handler.planner)(msg, db.config());
        if slots.is_empty() {
            return Ok(());
        }

        tracing::debug!(to = %msg.to, slots = slots.len(), "prefetching call state");

        let fork_block = db.config().fork_block;
        let mut requests = account_requests(msg.to, fork_block);
        for (addr, key) in &slots {
            requests.push(BatchRequest::new(
                METHOD_GET_STORAGE_AT,
                vec![
                    serde_json::json!(addr).into(),
                    serde_json::json!(key).into(),
                    BatchParam::Block(Some(fork_block)),
                ],
            ));
        }

        let responses = self.rpc.batch(&requests)?;
        if responses.len() != requests.len() {
            return Err(SmelterError::Decode("short batch response".to_string()));
        }

        seed_account(db, msg.to, &responses[0], &responses[1], &responses[2])?;

        let mut seeded = Vec::with_capacity(slots.len());
        for ((addr, key), value) in slots.iter().zip(&responses[3..]) {
            seeded.push((*addr, *key, decode_hash(value)?));
        }
        db.load_slots(&seeded);

        if handler.follow_singleton {
            let singleton = Address::from_slice(&seeded[0].2[12..]);
            if !singleton.is_zero() && singleton != msg.to {
                let impl_reqs = account_requests(singleton, fork_block);
                let impl_resps = self.rpc.batch(&impl_reqs)?;
                if impl_resps.len() == 3 {
                    seed_account(db, singleton, &impl_resps[0], &impl_resps[1], &impl_resps[2])?;
                }
            }
        }

        Ok(())
    }
}

fn account_requests(addr: Address, fork_block: U256) -> Vec<BatchRequest> {
    let param = |method| {
        BatchRequest::new(
            method,
            vec![serde_json::json!(addr).into(), BatchParam::Block(Some(fork_block))],
        )
    };
    vec![param(METHOD_GET_CODE), param(METHOD_GET_BALANCE), param(METHOD_GET_NONCE)]
}

fn seed_account(
    db: &ForkDb,
    addr: Address,
    code: &serde_json::Value,
    balance: &serde_json::Value,
    nonce: &serde_json::Value,
) -> Result<(), SmelterError> {
    let code: Bytes = decode_json(code)?;
    let balance: U256 = decode_json(balance)?;
    let nonce: U256 = decode_json(nonce)?;
    db.create_state_with_values(addr, nonce.saturating_to::<u64>(), balance, code);
    Ok(())
}

fn decode_json<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Result<T, SmelterError> {
    serde_json::from_value(value.clone()).map_err(SmelterError::decode)
}

fn decode_hash(value: &serde_json::Value) -> Result<B256, SmelterError> {
    let s: String = decode_json(value)?;
    // Upstreams disagree on slot padding; left-pad to a full word.
    let trimmed = s.trim_start_matches("0x");
    let padded = format!("{trimmed:0>64}");
    padded.parse::<B256>().map_err(SmelterError::decode)
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher").field("handlers", &self.handlers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockReader;

    fn safe_call(to: Address) -> CallMsg {
        CallMsg {
            from: Address::ZERO,
            to,
            gas: 0,
            gas_price: 0,
            value: U256::ZERO,
            data: Bytes::from(SAFE_EXEC_SELECTOR.to_vec()),
        }
    }

    #[test]
    fn test_unknown_selector_is_a_noop() {
        let reader = Arc::new(MockReader::with_batching(vec![]));
        let db = ForkDb::new(
            reader.clone(),
            ForkConfig { chain_id: 1, fork_block: U256::from(1) },
        );
        let prefetcher = Prefetcher::new(reader.clone());

        let msg = CallMsg { data: Bytes::from_static(&[1, 2, 3, 4]), ..Default::default() };
        prefetcher.prefetch(&db, &msg).unwrap();
        assert_eq!(reader.batch_calls(), 0);
    }

    #[test]
    fn test_without_batching_nothing_happens() {
        let reader = Arc::new(MockReader::default());
        let db = ForkDb::new(
            reader.clone(),
            ForkConfig { chain_id: 1, fork_block: U256::from(1) },
        );
        let prefetcher = Prefetcher::new(reader.clone());

        prefetcher.prefetch(&db, &safe_call(Address::repeat_byte(2))).unwrap();
        assert_eq!(reader.batch_calls(), 0);
    }

    #[test]
    fn test_safe_call_seeds_account_and_slots() {
        let to = Address::repeat_byte(0x5a);
        let responses = vec![
            serde_json::json!("0x6000"),
            serde_json::json!("0x64"),
            serde_json::json!("0x1"),
            // singleton slot left zero so no follow-up batch fires
            serde_json::json!("0x0"),
            serde_json::json!("0x3"),
            serde_json::json!("0x2"),
            serde_json::json!("0x0"),
        ];
        let reader = Arc::new(MockReader::with_batching(responses));
        let db = ForkDb::new(
            reader.clone(),
            ForkConfig { chain_id: 1, fork_block: U256::from(1) },
        );
        let prefetcher = Prefetcher::new(reader.clone());

        prefetcher.prefetch(&db, &safe_call(to)).unwrap();

        assert_eq!(reader.batch_calls(), 1);
        // Seeded without touching the per-account read path.
        assert_eq!(reader.account_reads(), 0);
        assert_eq!(db.get_balance(to).unwrap(), U256::from(0x64));
        let nonce_slot = B256::from(U256::from(5).to_be_bytes::<32>());
        assert_eq!(db.storage_at(to, nonce_slot).unwrap(), B256::with_last_byte(3));
        assert_eq!(reader.slot_reads(), 0);
    }
}
