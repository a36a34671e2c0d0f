//! Structured call-trace frames

use serde::{Deserialize, Serialize};

/// One frame of a transaction trace: a call/create entry, a return, or a
/// log emission, annotated with its depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Opcode-style tag: CALL, STATICCALL, DELEGATECALL, CALLCODE, CREATE,
    /// CREATE2, RETURN, or EMIT.
    #[serde(rename = "type")]
    pub kind: String,
    pub depth: u64,
    pub from: String,
    pub to: String,
    pub value: String,
    pub input: String,
    pub output: String,
}

/// Ordered frames of a single transaction.
pub type TransactionTraces = Vec<TraceFrame>;
