//! Engine-wide error kinds
//!
//! Every fallible path in the engine funnels into [`SmelterError`]; the RPC
//! edge maps the variants onto JSON-RPC error objects.

use alloy_primitives::Bytes;

/// Error kinds surfaced by the fork engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SmelterError {
    /// Upstream reader I/O failure (network, HTTP, RPC-level error).
    #[error("upstream error: {0}")]
    UpstreamIo(String),

    /// Malformed hex, RLP, or JSON at a boundary.
    #[error("decode error: {0}")]
    Decode(String),

    /// No sender could be resolved for a submitted transaction.
    #[error("no caller could be resolved")]
    BadCaller,

    /// Height above the local tip, or an unparseable block tag.
    #[error("bad block: {0}")]
    BadBlock(String),

    /// The interpreter reverted; carries the revert output bytes.
    #[error("execution reverted")]
    Revert(Bytes),

    /// Out-of-gas, invalid opcode, stack errors and other interpreter halts.
    #[error("execution failed: {0}")]
    Fatal(String),

    /// Unknown session key.
    #[error("session not found")]
    SessionNotFound,

    /// The call was cancelled or timed out.
    #[error("aborted")]
    Aborted,
}

impl SmelterError {
    /// Shorthand for wrapping an upstream transport error.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamIo(err.to_string())
    }

    /// Shorthand for wrapping a boundary decode failure.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}
