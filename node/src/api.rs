//! Administrative HTTP surface.
//!
//! Live control of the dispatch policies plus accounting views. Everything
//! is JSON over plain HTTP with 200/400 status codes; the surface carries a
//! permissive CORS policy so operator dashboards can call it directly from
//! a browser.
//!
//! | Method | Path              | Effect                                  |
//! |--------|-------------------|-----------------------------------------|
//! | POST   | `/allocation`     | set the fee distribution rule           |
//! | POST   | `/sort`           | set the reap ordering policy            |
//! | POST   | `/capacity`       | set one orderer's batch size            |
//! | GET    | `/orderers`       | list orderers with capacity and reward  |
//! | POST   | `/invoke`         | self-endorse a transaction (test helper)|
//! | GET    | `/orderer/{name}` | accounting summary for one orderer      |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use stagepool::config::DistributionRule;
use stagepool::dispatch::Dispatcher;
use stagepool::wire::{Envelope, Payload};

use crate::metrics::SharedMetrics;

/// Chaincode targeted by the self-invoke helper.
const INVOKE_CHAINCODE: &str = "transfer";

/// Shared state for the admin and RPC routers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// The dispatch core.
    pub dispatcher: Arc<Dispatcher>,
    /// Prometheus handles.
    pub metrics: SharedMetrics,
}

/// Builds the admin router with CORS and request tracing.
pub fn admin_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/allocation", post(set_allocation))
        .route("/sort", post(set_sort))
        .route("/capacity", post(set_capacity))
        .route("/orderers", get(list_orderers))
        .route("/invoke", post(invoke))
        .route("/orderer/{name}", get(orderer_log))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AllocationBody {
    allocation_rule: u8,
}

#[derive(Debug, Deserialize)]
struct SortBody {
    sort_switch: bool,
}

#[derive(Debug, Deserialize)]
struct CapacityBody {
    orderer: String,
    capacity: u32,
}

#[derive(Debug, Deserialize)]
struct InvokeBody {
    fee: u64,
}

#[derive(Debug, Serialize)]
struct OrdererRow {
    orderer: String,
    capacity: u32,
    fee_reward: String,
}

#[derive(Debug, Serialize)]
struct OrderersResponse {
    lists: Vec<OrdererRow>,
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "msg": msg.into() })),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /allocation` — switches the fee distribution rule.
async fn set_allocation(
    State(state): State<AppState>,
    Json(body): Json<AllocationBody>,
) -> impl IntoResponse {
    match DistributionRule::from_code(body.allocation_rule) {
        Some(rule) => {
            state.dispatcher.set_distribution_rule(rule);
            (StatusCode::OK, Json(serde_json::json!({}))).into_response()
        }
        None => bad_request("params not valid").into_response(),
    }
}

/// `POST /sort` — switches the reap ordering policy.
async fn set_sort(State(state): State<AppState>, Json(body): Json<SortBody>) -> impl IntoResponse {
    state.dispatcher.set_sort_fee_priority(body.sort_switch);
    (StatusCode::OK, Json(serde_json::json!({})))
}

/// `POST /capacity` — sets the named orderer's batch size.
async fn set_capacity(
    State(state): State<AppState>,
    Json(body): Json<CapacityBody>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .set_orderer_capacity(&body.orderer, body.capacity)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({}))).into_response(),
        Err(err) => bad_request(err.to_string()).into_response(),
    }
}

/// `GET /orderers` — lists every orderer with its capacity and reward.
async fn list_orderers(State(state): State<AppState>) -> impl IntoResponse {
    let lists = state
        .dispatcher
        .orderer_summaries()
        .into_iter()
        .map(|row| OrdererRow {
            orderer: row.orderer,
            capacity: row.capacity,
            fee_reward: row.fee_reward,
        })
        .collect();
    Json(OrderersResponse { lists })
}

/// `POST /invoke` — endorses a fixed-chaincode transaction with the given
/// fee and submits it. Admin/test helper; real endorsement flows arrive
/// through the RPC gateway.
async fn invoke(State(state): State<AppState>, Json(body): Json<InvokeBody>) -> impl IntoResponse {
    let tx = endorse_invoke(body.fee);
    match state.dispatcher.submit_transaction(&tx, 0) {
        Ok(()) => {
            state.metrics.transactions_submitted_total.inc();
            state.metrics.tx_size_bytes.observe(tx.len() as f64);
            state
                .metrics
                .mempool_size
                .set(state.dispatcher.mempool().size() as i64);
            (
                StatusCode::OK,
                Json(serde_json::json!({ "msg": "operator success" })),
            )
                .into_response()
        }
        Err(err) => {
            state.metrics.transactions_rejected_total.inc();
            bad_request(err.to_string()).into_response()
        }
    }
}

/// `GET /orderer/{name}` — free-text accounting summary.
async fn orderer_log(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.dispatcher.orderer_report(&name) {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({ "msg": "operator success", "data": report })),
        )
            .into_response(),
        Err(err) => bad_request(err.to_string()).into_response(),
    }
}

/// Builds an endorsed envelope for the fixed chaincode with the given fee.
///
/// Identity material and real signing live outside this service; the
/// signature field is left empty, which the pool and orderers accept for
/// staged traffic.
pub fn endorse_invoke(fee: u64) -> Vec<u8> {
    let tx_id = Uuid::new_v4().simple().to_string();
    let data = serde_json::to_vec(&serde_json::json!({
        "chaincode": INVOKE_CHAINCODE,
        "fn": "invoke",
        "args": [fee.to_string()],
    }))
    .expect("static invoke body serializes");
    Envelope::new(&Payload { tx_id, fee, data }, Vec::new()).encode()
}
