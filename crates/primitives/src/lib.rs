//! Core data model for the smelter forked-chain engine
//!
//! Account state and storage aggregates, fork configuration, synthetic
//! blocks/transactions/receipts, the in-memory block and transaction
//! indices, and the upstream reader contracts.

pub mod block;
pub mod error;
pub mod fork;
pub mod reader;
pub mod receipt;
pub mod state;
pub mod trace;
pub mod transaction;
pub mod txstore;

pub use block::{BlockState, BlockStore, ForkBlock};
pub use error::SmelterError;
pub use fork::{ForkConfig, StateOverride, StateOverrides};
pub use reader::{
    BatchParam, BatchRequest, StateReader, METHOD_BLOCK_NUMBER, METHOD_GET_BALANCE,
    METHOD_GET_CODE, METHOD_GET_NONCE, METHOD_GET_STORAGE_AT,
};
pub use receipt::TxReceipt;
pub use state::{AccountState, AccountStorage, AccountsState, AccountsStorage};
pub use trace::{TraceFrame, TransactionTraces};
pub use transaction::{CallMsg, RawLegacyTx, TxRecord};
pub use txstore::TxStore;
