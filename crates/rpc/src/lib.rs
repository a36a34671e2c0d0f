//! JSON-RPC surface of the fork server
//!
//! Session-keyed execution contexts with TTL eviction, the eth/smelter/
//! ots/erigon method services, and the axum transport that dispatches
//! JSON-RPC 2.0 requests arriving at `POST /v1/rpc/{key}`.

mod context;
mod eth;
mod otterscan;
mod server;
mod smelter;
mod types;

pub use context::{SessionContext, SessionStore};
pub use eth::EthRpc;
pub use otterscan::{ErigonRpc, OtterscanRpc};
pub use server::{router, serve, AppState};
pub use smelter::SmelterRpc;
pub use types::{parse_block_tag, JsonRpcRequest, JsonRpcResponse};
