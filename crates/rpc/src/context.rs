//! Session-keyed execution contexts
//!
//! Every session key gets its own fork store and executor, created on first
//! use and dropped by a background reaper once the session outlives its
//! TTL. Sessions are fully independent universes over the same pinned fork.

use alloy_primitives::Address;
use smelter_evm::{EnvConfig, SerialExecutor};
use smelter_fork::ForkDb;
use smelter_primitives::{ForkConfig, SmelterError, StateOverrides, StateReader};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// One isolated fork universe.
pub struct SessionContext {
    /// Zero means no impersonation is active.
    pub impersonator: RwLock<Address>,
    pub overrides: RwLock<StateOverrides>,
    pub created_at: Instant,
    pub executor: SerialExecutor,
    /// The same store instance the executor writes through.
    pub db: Arc<ForkDb>,
}

impl SessionContext {
    pub fn impersonator(&self) -> Address {
        *self.impersonator.read().unwrap()
    }

    pub fn overrides(&self) -> StateOverrides {
        self.overrides.read().unwrap().clone()
    }
}

/// Map of session key → context, plus the eviction policy.
pub struct SessionStore {
    config: ForkConfig,
    reader: Arc<dyn StateReader>,
    ttl: Duration,
    sessions: RwLock<HashMap<String, Arc<SessionContext>>>,
}

impl SessionStore {
    pub fn new(config: ForkConfig, reader: Arc<dyn StateReader>, ttl: Duration) -> Self {
        Self { config, reader, ttl, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    pub fn reader(&self) -> Arc<dyn StateReader> {
        Arc::clone(&self.reader)
    }

    /// Return the context for `key`, creating a fresh fork universe on the
    /// first visit. Concurrent first visits race on the write lock and the
    /// first writer wins.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<SessionContext>, SmelterError> {
        if let Some(ctx) = self.sessions.read().unwrap().get(key) {
            return Ok(Arc::clone(ctx));
        }

        let mut sessions = self.sessions.write().unwrap();
        if let Some(ctx) = sessions.get(key) {
            return Ok(Arc::clone(ctx));
        }

        let db = Arc::new(ForkDb::new(Arc::clone(&self.reader), self.config.clone()));
        let executor = SerialExecutor::new(
            EnvConfig::new(self.config.chain_id),
            Arc::clone(&db),
            self.reader.as_ref(),
        )?;

        tracing::info!(key, fork_block = %self.config.fork_block, "created execution context");
        let ctx = Arc::new(SessionContext {
            impersonator: RwLock::new(Address::ZERO),
            overrides: RwLock::new(StateOverrides::new()),
            created_at: Instant::now(),
            executor,
            db,
        });
        sessions.insert(key.to_string(), Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Existing context only.
    pub fn get(&self, key: &str) -> Result<Arc<SessionContext>, SmelterError> {
        self.sessions
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(SmelterError::SessionNotFound)
    }

    /// Drop every context older than the TTL. In-flight handlers holding an
    /// `Arc` keep their context alive until they return.
    pub fn cleanup(&self) {
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|key, ctx| {
            let keep = ctx.created_at.elapsed() <= ttl;
            if !keep {
                tracing::info!(key, "evicting expired execution context");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "session cleanup pass");
        }
    }

    /// Background reaper loop. Runs until the token fires.
    pub async fn watch(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.cleanup(),
                _ = token.cancelled() => {
                    tracing::info!("stopping session reaper");
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, B256, U256};
    use smelter_fork::testing::MockReader;

    fn store(ttl: Duration) -> SessionStore {
        let reader = Arc::new(MockReader::default());
        SessionStore::new(ForkConfig { chain_id: 1, fork_block: U256::from(100) }, reader, ttl)
    }

    #[test]
    fn test_get_or_create_returns_same_context() {
        let store = store(Duration::from_secs(60));
        let a = store.get_or_create("s1").unwrap();
        let b = store.get_or_create("s1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown_session_fails() {
        let store = store(Duration::from_secs(60));
        assert!(matches!(store.get("nope"), Err(SmelterError::SessionNotFound)));
    }

    #[test]
    fn test_sessions_do_not_observe_each_other() {
        let store = store(Duration::from_secs(60));
        let a = store.get_or_create("a").unwrap();
        let b = store.get_or_create("b").unwrap();

        let addr = Address::repeat_byte(9);
        a.db.set_balance(addr, U256::from(777)).unwrap();

        assert_eq!(a.db.get_balance(addr).unwrap(), U256::from(777));
        assert_eq!(b.db.get_balance(addr).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_cleanup_evicts_expired_and_recreates_fresh() {
        let store = store(Duration::from_millis(0));
        let addr = Address::repeat_byte(3);

        let ctx = store.get_or_create("x").unwrap();
        ctx.db.set_balance(addr, U256::from(42)).unwrap();
        ctx.db.set_code(addr, Bytes::from_static(&[0x60])).unwrap();
        drop(ctx);

        std::thread::sleep(Duration::from_millis(5));
        store.cleanup();
        assert_eq!(store.len(), 0);

        // A new request under the same key starts from the pristine fork.
        let fresh = store.get_or_create("x").unwrap();
        assert_eq!(fresh.db.get_balance(addr).unwrap(), U256::ZERO);
        assert_eq!(fresh.db.storage_at(addr, B256::ZERO).unwrap(), B256::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_loop_evicts_on_tick() {
        let store = Arc::new(store(Duration::from_millis(10)));
        store.get_or_create("gone").unwrap();

        let token = CancellationToken::new();
        let watcher = {
            let store = Arc::clone(&store);
            let token = token.clone();
            tokio::spawn(async move {
                store.watch(Duration::from_millis(20), token).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.len(), 0);

        token.cancel();
        watcher.await.unwrap();
    }
}
