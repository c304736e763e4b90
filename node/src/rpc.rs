//! JSON-RPC 2.0 gateway: the surface endorsing clients and orderers use.
//!
//! Two methods, both POSTed to `/`:
//!
//! | Method                      | Params                               |
//! |-----------------------------|--------------------------------------|
//! | `mempool_submitTransaction` | `{ "tx": "<hex>" }`                  |
//! | `mempool_fetchTransactions` | `{ "requester", "block_height" }`    |
//!
//! Submission answers `{"status": "SUCCESS"}` or a JSON-RPC error carrying
//! the admission failure. A fetch answers the batch count only; the
//! transaction bytes are delivered on the orderer's stream, never inline.

use axum::extract::State;
use axum::http::Method;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use stagepool::error::DispatchError;

use crate::api::AppState;

/// Builds the RPC router.
pub fn rpc_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", post(rpc_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC envelope types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
    id: serde_json::Value,
}

/// A JSON-RPC 2.0 response. Exactly one of `result`/`error` is set.
#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: serde_json::Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitParams {
    /// Hex-encoded endorsed transaction blob.
    tx: String,
}

#[derive(Debug, Deserialize)]
struct FetchParams {
    /// Name of the pulling orderer.
    requester: String,
    /// Height of the block this batch is destined for.
    block_height: u64,
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    if req.jsonrpc != "2.0" {
        return Json(RpcResponse::failure(
            req.id,
            -32600,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ));
    }

    let response = match req.method.as_str() {
        "mempool_submitTransaction" => submit_transaction(&state, req.id, req.params),
        "mempool_fetchTransactions" => fetch_transactions(&state, req.id, req.params),
        other => RpcResponse::failure(req.id, -32601, format!("Method not found: {other}")),
    };
    Json(response)
}

fn submit_transaction(
    state: &AppState,
    id: serde_json::Value,
    params: serde_json::Value,
) -> RpcResponse {
    let params: SubmitParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::failure(id, -32602, format!("Invalid params: {e}")),
    };
    let tx = match hex::decode(&params.tx) {
        Ok(tx) => tx,
        Err(e) => return RpcResponse::failure(id, -32602, format!("Invalid params: tx is not hex: {e}")),
    };

    match state.dispatcher.submit_transaction(&tx, 0) {
        Ok(()) => {
            state.metrics.transactions_submitted_total.inc();
            state.metrics.tx_size_bytes.observe(tx.len() as f64);
            state
                .metrics
                .mempool_size
                .set(state.dispatcher.mempool().size() as i64);
            RpcResponse::success(id, serde_json::json!({ "status": "SUCCESS" }))
        }
        Err(err) => {
            state.metrics.transactions_rejected_total.inc();
            RpcResponse::failure(id, -32003, err.to_string())
        }
    }
}

fn fetch_transactions(
    state: &AppState,
    id: serde_json::Value,
    params: serde_json::Value,
) -> RpcResponse {
    let params: FetchParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::failure(id, -32602, format!("Invalid params: {e}")),
    };

    match state
        .dispatcher
        .fetch_transactions(&params.requester, params.block_height)
    {
        Ok(summary) => {
            state.metrics.batches_fetched_total.inc();
            state
                .metrics
                .mempool_size
                .set(state.dispatcher.mempool().size() as i64);
            RpcResponse::success(
                id,
                serde_json::json!({
                    "tx_num": summary.tx_num,
                    "is_empty": summary.is_empty,
                }),
            )
        }
        Err(err @ DispatchError::UnknownOrderer(_)) => {
            RpcResponse::failure(id, -32000, err.to_string())
        }
        Err(err) => RpcResponse::failure(id, -32603, err.to_string()),
    }
}
