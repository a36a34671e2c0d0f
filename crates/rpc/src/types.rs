//! Wire types of the RPC edge
//!
//! JSON-RPC 2.0 envelopes, the serialized block/transaction/receipt views,
//! and block-tag parsing. Hex and RLP stay on this boundary; everything
//! behind it works with typed values.

use alloy_primitives::{Address, Bytes, B256, B64, U256, U64};
use alloy_rpc_types_eth::BlockTransactions;
use serde::{Deserialize, Serialize};
use smelter_primitives::{ForkBlock, SmelterError, TxReceipt, TxRecord};

/// Incoming JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outgoing JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    pub fn result(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn error(id: serde_json::Value, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

/// Map an engine error onto a JSON-RPC error object. Reverts carry their
/// output bytes in `data`.
pub fn error_object(err: &SmelterError) -> JsonRpcError {
    let (code, data) = match err {
        SmelterError::Revert(output) => {
            (-32015, Some(serde_json::json!(format!("0x{}", alloy_primitives::hex::encode(output)))))
        }
        SmelterError::Fatal(_) => (-32015, None),
        SmelterError::Decode(_) => (-32602, None),
        SmelterError::BadCaller => (-32000, None),
        SmelterError::BadBlock(_) => (-32000, None),
        SmelterError::SessionNotFound => (-32001, None),
        SmelterError::Aborted => (-32002, None),
        SmelterError::UpstreamIo(_) => (-32010, None),
    };
    JsonRpcError { code, message: err.to_string(), data }
}

/// Parse a block tag against the session tip. Empty and "latest"/"pending"
/// mean the tip, `0x…` is big-endian hex, anything else is decimal.
/// Heights above the tip are rejected.
pub fn parse_block_tag(tag: Option<&str>, latest: U256) -> Result<U256, SmelterError> {
    let number = match tag {
        None | Some("") | Some("latest") | Some("pending") => latest,
        Some(s) if s.starts_with("0x") => U256::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| SmelterError::BadBlock(format!("bad hex block tag {s}: {e}")))?,
        Some(s) => U256::from(
            s.parse::<u64>()
                .map_err(|e| SmelterError::BadBlock(format!("bad block tag {s}: {e}")))?,
        ),
    };

    if number > latest {
        return Err(SmelterError::BadBlock(format!("block {number} above tip {latest}")));
    }
    Ok(number)
}

/// `eth_call` style request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub gas: Option<U64>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub data: Option<Bytes>,
    pub input: Option<Bytes>,
    pub nonce: Option<U64>,
}

impl CallRequest {
    pub fn input_bytes(&self) -> Bytes {
        self.input.clone().or_else(|| self.data.clone()).unwrap_or_default()
    }
}

/// Log entry as served to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_hash: B256,
    pub block_number: U64,
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub log_index: U64,
    pub removed: bool,
}

/// Receipt as served to clients. The bloom is always zero-filled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptView {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub from: Address,
    pub to: Option<Address>,
    pub cumulative_gas_used: U64,
    pub gas_used: U64,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogView>,
    pub logs_bloom: Bytes,
    pub status: U64,
    #[serde(rename = "type")]
    pub tx_type: U64,
    pub effective_gas_price: U256,
}

impl ReceiptView {
    pub fn from_receipt(receipt: &TxReceipt, from: Address) -> Self {
        let logs = receipt
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| LogView {
                address: log.address,
                topics: log.data.topics().to_vec(),
                data: log.data.data.clone(),
                block_hash: receipt.block_hash,
                block_number: U64::from(receipt.block_number.saturating_to::<u64>()),
                transaction_hash: receipt.tx_hash,
                transaction_index: U64::from(receipt.tx_index),
                log_index: U64::from(i as u64),
                removed: false,
            })
            .collect();

        Self {
            transaction_hash: receipt.tx_hash,
            transaction_index: U64::from(receipt.tx_index),
            block_hash: receipt.block_hash,
            block_number: U64::from(receipt.block_number.saturating_to::<u64>()),
            from,
            to: Some(receipt.contract_address),
            cumulative_gas_used: U64::from(receipt.cumulative_gas_used),
            gas_used: U64::from(receipt.gas_used),
            contract_address: None,
            logs,
            logs_bloom: Bytes::from(vec![0u8; 256]),
            status: U64::from(receipt.status),
            tx_type: U64::ZERO,
            effective_gas_price: U256::from(receipt.effective_gas_price),
        }
    }
}

/// Transaction as served to clients, always legacy-shaped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxView {
    pub hash: B256,
    pub nonce: U64,
    pub block_hash: Option<B256>,
    pub block_number: Option<U64>,
    pub transaction_index: Option<U64>,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas: U64,
    pub gas_price: U256,
    pub input: Bytes,
    #[serde(rename = "type")]
    pub tx_type: U64,
    pub v: U64,
    pub r: U256,
    pub s: U256,
}

impl TxView {
    pub fn from_record(tx: &TxRecord, receipt: Option<&TxReceipt>) -> Self {
        Self {
            hash: tx.hash,
            nonce: U64::from(tx.nonce),
            block_hash: receipt.map(|r| r.block_hash),
            block_number: receipt.map(|r| U64::from(r.block_number.saturating_to::<u64>())),
            transaction_index: receipt.map(|r| U64::from(r.tx_index)),
            from: tx.from,
            to: Some(tx.to),
            value: tx.value,
            gas: U64::from(tx.gas),
            gas_price: U256::from(tx.gas_price),
            input: tx.input.clone(),
            tx_type: U64::ZERO,
            v: U64::ZERO,
            r: U256::ZERO,
            s: U256::ZERO,
        }
    }
}

/// Keccak of the RLP of an empty list, the conventional empty-section root.
const EMPTY_LIST_HASH: B256 = B256::new([
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4,
    0x1a, 0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4,
    0x93, 0x47,
]);

/// Block as served to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub sha3_uncles: B256,
    pub logs_bloom: Bytes,
    pub transactions_root: B256,
    pub state_root: B256,
    pub receipts_root: B256,
    pub miner: Address,
    pub difficulty: U256,
    pub total_difficulty: U256,
    pub extra_data: Bytes,
    pub size: U64,
    pub gas_limit: U64,
    pub gas_used: U64,
    pub timestamp: U64,
    pub transactions: Vec<B256>,
    pub uncles: Vec<B256>,
    pub nonce: B64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
}

impl From<&ForkBlock> for BlockView {
    fn from(block: &ForkBlock) -> Self {
        Self {
            number: U64::from(block.header.number),
            hash: block.hash,
            parent_hash: block.header.parent_hash,
            sha3_uncles: EMPTY_LIST_HASH,
            logs_bloom: Bytes::from(vec![0u8; 256]),
            transactions_root: block.header.transactions_root,
            state_root: block.header.state_root,
            receipts_root: block.header.receipts_root,
            miner: block.header.beneficiary,
            difficulty: U256::ZERO,
            total_difficulty: U256::ZERO,
            extra_data: Bytes::default(),
            size: U64::ZERO,
            gas_limit: U64::from(block.header.gas_limit),
            gas_used: U64::from(block.header.gas_used),
            timestamp: U64::from(block.header.timestamp),
            transactions: block.transactions.clone(),
            uncles: vec![],
            nonce: B64::ZERO,
            base_fee_per_gas: Some(U256::ZERO),
        }
    }
}

impl From<&alloy_rpc_types_eth::Block> for BlockView {
    fn from(block: &alloy_rpc_types_eth::Block) -> Self {
        let transactions = match &block.transactions {
            BlockTransactions::Hashes(hashes) => hashes.clone(),
            BlockTransactions::Full(txs) => {
                txs.iter().map(|tx| *tx.inner.tx_hash()).collect()
            }
            BlockTransactions::Uncle => vec![],
        };

        Self {
            number: U64::from(block.header.inner.number),
            hash: block.header.hash,
            parent_hash: block.header.inner.parent_hash,
            sha3_uncles: block.header.inner.ommers_hash,
            logs_bloom: Bytes::from(block.header.inner.logs_bloom.0.to_vec()),
            transactions_root: block.header.inner.transactions_root,
            state_root: block.header.inner.state_root,
            receipts_root: block.header.inner.receipts_root,
            miner: block.header.inner.beneficiary,
            difficulty: block.header.inner.difficulty,
            total_difficulty: block.header.total_difficulty.unwrap_or_default(),
            extra_data: block.header.inner.extra_data.clone(),
            size: U64::from(block.header.size.unwrap_or_default().saturating_to::<u64>()),
            gas_limit: U64::from(block.header.inner.gas_limit),
            gas_used: U64::from(block.header.inner.gas_used),
            timestamp: U64::from(block.header.inner.timestamp),
            transactions,
            uncles: block.uncles.clone(),
            nonce: block.header.inner.nonce,
            base_fee_per_gas: block.header.inner.base_fee_per_gas.map(U256::from),
        }
    }
}

/// Header subset for the header lookup methods.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderView {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: U64,
    pub timestamp: U64,
    pub gas_limit: U64,
    pub gas_used: U64,
    pub miner: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
}

impl From<&BlockView> for HeaderView {
    fn from(block: &BlockView) -> Self {
        Self {
            hash: block.hash,
            parent_hash: block.parent_hash,
            number: block.number,
            timestamp: block.timestamp,
            gas_limit: block.gas_limit,
            gas_used: block.gas_used,
            miner: block.miner,
            state_root: block.state_root,
            transactions_root: block.transactions_root,
            receipts_root: block.receipts_root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_tag_variants() {
        let latest = U256::from(110);
        assert_eq!(parse_block_tag(None, latest).unwrap(), latest);
        assert_eq!(parse_block_tag(Some(""), latest).unwrap(), latest);
        assert_eq!(parse_block_tag(Some("latest"), latest).unwrap(), latest);
        assert_eq!(parse_block_tag(Some("0x6e"), latest).unwrap(), latest);
        assert_eq!(parse_block_tag(Some("0x64"), latest).unwrap(), U256::from(100));
        assert_eq!(parse_block_tag(Some("105"), latest).unwrap(), U256::from(105));
    }

    #[test]
    fn test_block_tag_above_tip_fails() {
        let err = parse_block_tag(Some("0x6f"), U256::from(110)).unwrap_err();
        assert!(matches!(err, SmelterError::BadBlock(_)));
        assert!(matches!(
            parse_block_tag(Some("garbage"), U256::from(1)),
            Err(SmelterError::BadBlock(_))
        ));
    }

    #[test]
    fn test_revert_error_carries_output() {
        let err = SmelterError::Revert(Bytes::from_static(&[0xde, 0xad]));
        let obj = error_object(&err);
        assert_eq!(obj.code, -32015);
        assert_eq!(obj.data, Some(serde_json::json!("0xdead")));
    }

    #[test]
    fn test_receipt_view_field_names() {
        let receipt = TxReceipt {
            status: 1,
            cumulative_gas_used: 21_000,
            gas_used: 21_000,
            logs: vec![],
            tx_hash: B256::repeat_byte(1),
            contract_address: Address::ZERO,
            block_hash: B256::repeat_byte(2),
            block_number: U256::from(7),
            tx_index: 0,
            effective_gas_price: 0,
        };

        let json = serde_json::to_value(ReceiptView::from_receipt(&receipt, Address::ZERO)).unwrap();
        assert_eq!(json["transactionHash"], serde_json::json!(B256::repeat_byte(1)));
        assert_eq!(json["blockNumber"], serde_json::json!("0x7"));
        assert_eq!(json["status"], serde_json::json!("0x1"));
        // 256 zero bytes.
        assert_eq!(json["logsBloom"].as_str().unwrap().len(), 2 + 512);
    }

    #[test]
    fn test_call_request_prefers_input_over_data() {
        let req = CallRequest {
            data: Some(Bytes::from_static(&[1])),
            input: Some(Bytes::from_static(&[2])),
            ..Default::default()
        };
        assert_eq!(req.input_bytes(), Bytes::from_static(&[2]));
    }
}
