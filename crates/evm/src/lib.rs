//! Serial EVM execution over fork state
//!
//! One interpreter invocation at a time per session: read-only calls run
//! against a throwaway overlay, persisted calls merge their overlay back
//! into the fork store and mint a synthetic block.

mod env;
mod executor;
mod inspector;

pub use env::EnvConfig;
pub use executor::{LatestBlock, SerialExecutor};
pub use inspector::CallTracer;
