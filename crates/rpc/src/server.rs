//! HTTP transport and JSON-RPC dispatch
//!
//! One route: `POST /v1/rpc/:key`. The path parameter names the session,
//! the optional `X-Caller` header (a 20-byte hex address) rides along as
//! the impersonation fallback for submitted transactions. Dispatch is a
//! plain method-name match; nothing here holds state beyond the services.

use crate::{
    context::SessionStore,
    eth::EthRpc,
    otterscan::{ErigonRpc, OtterscanRpc},
    smelter::SmelterRpc,
    types::{error_object, CallRequest, JsonRpcRequest, JsonRpcResponse},
};
use alloy_primitives::{Address, B256};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use smelter_primitives::{SmelterError, StateOverrides};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;

/// All method services plus the shutdown token handed to executions.
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub eth: Arc<EthRpc>,
    pub smelter: SmelterRpc,
    pub ots: OtterscanRpc,
    pub erigon: ErigonRpc,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(sessions: Arc<SessionStore>, shutdown: CancellationToken) -> Self {
        let eth = Arc::new(EthRpc::new(Arc::clone(&sessions)));
        Self {
            smelter: SmelterRpc::new(Arc::clone(&sessions)),
            ots: OtterscanRpc::new(Arc::clone(&sessions), Arc::clone(&eth)),
            erigon: ErigonRpc::new(Arc::clone(&eth)),
            eth,
            sessions,
            shutdown,
        }
    }
}

/// Build the single-route router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/v1/rpc/:key", post(handle_rpc)).with_state(state)
}

/// Bind and serve until the token fires.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "rpc server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn handle_rpc(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let caller = caller_from_headers(&headers);
    let id = request.id.clone();
    tracing::debug!(key, method = %request.method, "rpc request");

    // Executions and cold reads block on upstream I/O and the per-session
    // executor lock; keep the runtime's event loop out of it.
    let response = tokio::task::block_in_place(|| dispatch(&state, &key, caller, &request));

    Json(match response {
        Ok(result) => JsonRpcResponse::result(id, result),
        Err(err) => {
            tracing::debug!(key, method = %request.method, %err, "rpc error");
            JsonRpcResponse::error(id, error_object(&err))
        }
    })
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Address> {
    headers.get("X-Caller")?.to_str().ok()?.parse::<Address>().ok()
}

fn param<T: DeserializeOwned>(request: &JsonRpcRequest, index: usize) -> Result<T, SmelterError> {
    let value = request
        .params
        .get(index)
        .cloned()
        .ok_or_else(|| SmelterError::Decode(format!("missing param {index}")))?;
    serde_json::from_value(value).map_err(SmelterError::decode)
}

fn opt_param<T: DeserializeOwned>(
    request: &JsonRpcRequest,
    index: usize,
) -> Result<Option<T>, SmelterError> {
    match request.params.get(index) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(SmelterError::decode),
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<serde_json::Value, SmelterError> {
    serde_json::to_value(value).map_err(SmelterError::decode)
}

fn dispatch(
    state: &AppState,
    key: &str,
    caller: Option<Address>,
    request: &JsonRpcRequest,
) -> Result<serde_json::Value, SmelterError> {
    let token = state.shutdown.child_token();

    match request.method.as_str() {
        "eth_chainId" => to_json(state.eth.chain_id()),
        "eth_blockNumber" => to_json(state.eth.block_number(key)?),
        "eth_getBalance" => {
            let addr: Address = param(request, 0)?;
            let tag: Option<String> = opt_param(request, 1)?;
            to_json(state.eth.get_balance(key, addr, tag.as_deref())?)
        }
        "eth_getCode" => {
            let addr: Address = param(request, 0)?;
            let tag: Option<String> = opt_param(request, 1)?;
            to_json(state.eth.get_code(key, addr, tag.as_deref())?)
        }
        "eth_getStorageAt" => {
            let addr: Address = param(request, 0)?;
            let slot: B256 = param(request, 1)?;
            let tag: Option<String> = opt_param(request, 2)?;
            to_json(state.eth.get_storage_at(key, addr, slot, tag.as_deref())?)
        }
        "eth_getBlockByHash" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.eth.get_block_by_hash(key, hash)?)
        }
        "eth_getBlockByNumber" => {
            let tag: Option<String> = opt_param(request, 0)?;
            to_json(state.eth.get_block_by_number(key, tag.as_deref())?)
        }
        "eth_getHeaderByHash" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.eth.get_header_by_hash(key, hash)?)
        }
        "eth_getHeaderByNumber" => {
            let tag: Option<String> = opt_param(request, 0)?;
            to_json(state.eth.get_header_by_number(key, tag.as_deref())?)
        }
        "eth_call" => {
            let call: CallRequest = param(request, 0)?;
            let tag: Option<String> = opt_param(request, 1)?;
            to_json(state.eth.call(key, &call, tag.as_deref(), token)?)
        }
        "eth_sendRawTransaction" => {
            let raw: String = param(request, 0)?;
            to_json(state.eth.send_raw_transaction(key, &raw, caller, token)?)
        }
        "eth_getTransactionByHash" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.eth.get_transaction_by_hash(key, hash)?)
        }
        "eth_getTransactionReceipt" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.eth.get_transaction_receipt(key, hash)?)
        }
        "eth_estimateGas" => to_json(state.eth.estimate_gas()),
        "eth_gasPrice" => to_json(state.eth.gas_price()),
        "eth_setBalance" => {
            let addr: Address = param(request, 0)?;
            let amount: String = param(request, 1)?;
            state.eth.set_balance(key, addr, &amount)?;
            to_json(true)
        }
        "smelter_impersonateAccount" => {
            let addr: Address = param(request, 0)?;
            state.smelter.impersonate_account(key, addr)?;
            to_json(true)
        }
        "smelter_stopImpersonatingAccount" => {
            state.smelter.stop_impersonating_account(key)?;
            to_json(true)
        }
        "smelter_setStateOverrides" => {
            let overrides: StateOverrides = param(request, 0)?;
            state.smelter.set_state_overrides(key, overrides)?;
            to_json(true)
        }
        "smelter_getState" => state.smelter.get_state(key),
        "ots_getApiLevel" => to_json(state.ots.get_api_level()),
        "ots_hasCode" => {
            let addr: Address = param(request, 0)?;
            let tag: Option<String> = opt_param(request, 1)?;
            to_json(state.ots.has_code(key, addr, tag.as_deref())?)
        }
        "ots_getBlockDetails" => {
            let number: u64 = param(request, 0)?;
            to_json(state.ots.get_block_details(key, number)?)
        }
        "ots_getBlockTransactions" => {
            let number: u64 = param(request, 0)?;
            to_json(state.ots.get_block_transactions(key, number)?)
        }
        "ots_searchTransactionsBefore" => {
            let addr: Address = param(request, 0)?;
            to_json(state.ots.search_transactions_before(key, addr)?)
        }
        "ots_getTransactionError" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.ots.get_transaction_error(key, hash))
        }
        "ots_traceTransaction" => {
            let hash: B256 = param(request, 0)?;
            to_json(state.ots.trace_transaction(key, hash)?)
        }
        "erigon_getHeaderByNumber" => {
            let number: u64 = param(request, 0)?;
            to_json(state.erigon.get_header_by_number(key, number)?)
        }
        other => Err(SmelterError::Decode(format!("method {other} not found"))),
    }
}
