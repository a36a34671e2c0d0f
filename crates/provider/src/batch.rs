//! Batched JSON-RPC provider
//!
//! Fans a set of requests out as one JSON-RPC 2.0 array. Servers may answer
//! out of order, so results are re-keyed by request id before returning;
//! `results[i]` always corresponds to `requests[i]`. One failing request
//! fails the whole batch with its id attached.

use crate::HttpReader;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::{Block, Transaction, TransactionReceipt};
use serde::Deserialize;
use smelter_primitives::{BatchParam, BatchRequest, CallMsg, SmelterError, StateReader};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// [`HttpReader`] plus raw JSON-RPC array batching.
#[derive(Debug, Clone)]
pub struct BatchHttpReader {
    inner: HttpReader,
    url: reqwest::Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BatchResponseItem {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<BatchResponseError>,
}

#[derive(Debug, Deserialize)]
struct BatchResponseError {
    code: i64,
    message: String,
}

impl BatchHttpReader {
    pub fn new(url: &str, handle: Handle, shutdown: CancellationToken) -> Result<Self, SmelterError> {
        let inner = HttpReader::new(url, handle, shutdown)?;
        let url = url.parse::<reqwest::Url>().map_err(SmelterError::decode)?;
        Ok(Self { inner, url, client: reqwest::Client::new() })
    }

    /// The plain reader this batcher wraps.
    pub fn reader(&self) -> &HttpReader {
        &self.inner
    }
}

/// Encode one positional parameter. Block tags are contextual: absent means
/// the upstream tip, a height encodes as minimal hex.
fn encode_param(param: &BatchParam) -> serde_json::Value {
    match param {
        BatchParam::Value(v) => v.clone(),
        BatchParam::Block(None) => serde_json::Value::String("latest".to_string()),
        BatchParam::Block(Some(n)) => serde_json::Value::String(format!("{n:#x}")),
    }
}

fn encode_batch(requests: &[BatchRequest]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = requests
        .iter()
        .enumerate()
        .map(|(i, req)| {
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": req.method,
                "params": req.params.iter().map(encode_param).collect::<Vec<_>>(),
                "id": i + 1,
            })
        })
        .collect();

    serde_json::Value::Array(entries)
}

/// Re-key responses by id into request order.
fn collect_results(
    responses: Vec<BatchResponseItem>,
    len: usize,
) -> Result<Vec<serde_json::Value>, SmelterError> {
    let mut results = vec![serde_json::Value::Null; len];
    for resp in responses {
        if let Some(err) = resp.error {
            return Err(SmelterError::UpstreamIo(format!(
                "rpc error (request {}): {} (code {})",
                resp.id, err.message, err.code
            )));
        }

        let idx = (resp.id as usize)
            .checked_sub(1)
            .filter(|i| *i < len)
            .ok_or_else(|| SmelterError::Decode(format!("unknown batch response id {}", resp.id)))?;
        results[idx] = resp.result.unwrap_or(serde_json::Value::Null);
    }

    Ok(results)
}

impl StateReader for BatchHttpReader {
    fn code_at(&self, addr: Address, block: U256) -> Result<Bytes, SmelterError> {
        self.inner.code_at(addr, block)
    }

    fn balance_at(&self, addr: Address, block: U256) -> Result<U256, SmelterError> {
        self.inner.balance_at(addr, block)
    }

    fn nonce_at(&self, addr: Address, block: U256) -> Result<u64, SmelterError> {
        self.inner.nonce_at(addr, block)
    }

    fn storage_at(&self, addr: Address, slot: B256, block: U256) -> Result<B256, SmelterError> {
        self.inner.storage_at(addr, slot, block)
    }

    fn block_number(&self) -> Result<u64, SmelterError> {
        self.inner.block_number()
    }

    fn chain_id(&self) -> Result<u64, SmelterError> {
        self.inner.chain_id()
    }

    fn block_by_number(&self, number: U256) -> Result<Option<Block>, SmelterError> {
        self.inner.block_by_number(number)
    }

    fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, SmelterError> {
        self.inner.block_by_hash(hash)
    }

    fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, SmelterError> {
        self.inner.transaction_by_hash(hash)
    }

    fn receipt_by_hash(&self, hash: B256) -> Result<Option<TransactionReceipt>, SmelterError> {
        self.inner.receipt_by_hash(hash)
    }

    fn call_at(&self, msg: &CallMsg, block: U256) -> Result<Bytes, SmelterError> {
        self.inner.call_at(msg, block)
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn batch(&self, requests: &[BatchRequest]) -> Result<Vec<serde_json::Value>, SmelterError> {
        if requests.is_empty() {
            return Ok(vec![]);
        }

        let body = encode_batch(requests);
        tracing::debug!(count = requests.len(), "dispatching batched upstream request");

        let client = self.client.clone();
        let url = self.url.clone();
        let responses: Vec<BatchResponseItem> = self.inner.run(async move {
            let resp = client.post(url).json(&body).send().await?;
            resp.error_for_status()?.json::<Vec<BatchResponseItem>>().await
        })?;

        collect_results(responses, requests.len())
    }
}
