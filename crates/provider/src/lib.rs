//! Upstream JSON-RPC providers
//!
//! Blocking [`StateReader`] implementations over an async alloy HTTP
//! provider, plus a batched variant that fans out JSON-RPC 2.0 arrays.
//!
//! [`StateReader`]: smelter_primitives::StateReader

mod batch;
mod reader;

pub use batch::BatchHttpReader;
pub use reader::HttpReader;
