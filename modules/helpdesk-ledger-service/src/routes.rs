//! Axum route handlers for the help-desk ledger RPC API.

use crate::config::Config;
use crate::db::{self, Db};
use crate::dialog;
use crate::knowledge::KnowledgeBase;
use crate::ledger::QueryLedger;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use helpdesk_ledger_types::*;
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub struct AppState {
    pub db: Arc<Db>,
    pub ledger: Arc<QueryLedger>,
    pub kb: Arc<KnowledgeBase>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

// =====================================================
// Conversation Endpoints
// =====================================================

// POST /rpc/ask
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> (StatusCode, Json<LexResponse>) {
    // The ledger write runs detached so it can neither delay nor change the answer
    let ledger = state.ledger.clone();
    let query = req.query.clone();
    let user_id = req.user_id.clone();
    let utterance = req.input_transcript.clone().or_else(|| Some(req.query.clone()));
    tokio::spawn(async move {
        ledger
            .record_observation(&query, user_id.as_deref(), utterance.as_deref())
            .await;
    });

    (StatusCode::OK, Json(dialog::answer(&state.kb, &req)))
}

// =====================================================
// Ledger Endpoints
// =====================================================

// POST /rpc/observe
pub async fn observe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ObserveRequest>,
) -> (StatusCode, Json<RpcResponse<LedgerWrite>>) {
    match state
        .ledger
        .try_record_observation(
            &req.search_query,
            req.user_id.as_deref(),
            req.utterance.as_deref(),
        )
        .await
    {
        Ok(w) => (StatusCode::OK, Json(RpcResponse::ok(w))),
        Err(e) => {
            log::error!("[LEDGER] Observation lost: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(RpcResponse::err(e.to_string())))
        }
    }
}

// POST /rpc/query/get
pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetQueryRequest>,
) -> (StatusCode, Json<RpcResponse<Option<QueryRecord>>>) {
    match state.ledger.lookup(&req.search_query).await {
        Ok(r) => (StatusCode::OK, Json(RpcResponse::ok(r))),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(RpcResponse::err(e.to_string()))),
    }
}

// POST /rpc/queries/list
pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListQueriesRequest>,
) -> (StatusCode, Json<RpcResponse<Vec<QueryRecord>>>) {
    let limit = req.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    match db::blocking(&state.db, move |db| db.list_records(limit)).await {
        Ok(r) => (StatusCode::OK, Json(RpcResponse::ok(r))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e.to_string()))),
    }
}

// GET /rpc/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<LedgerStats>>) {
    match db::blocking(&state.db, |db| db.get_stats()).await {
        Ok(s) => (StatusCode::OK, Json(RpcResponse::ok(s))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e.to_string()))),
    }
}

// GET /rpc/status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let stats = db::blocking(&state.db, |db| db.get_stats()).await.ok();
    (
        StatusCode::OK,
        Json(RpcResponse::ok(ServiceStatus {
            running: true,
            uptime_secs: state.start_time.elapsed().as_secs(),
            ledger_enabled: state.ledger.is_enabled(),
            table_name: state.db.table_name().to_string(),
            knowledge_entries: state.kb.len(),
            distinct_queries: stats.as_ref().map(|s| s.distinct_queries).unwrap_or(0),
            total_searches: stats.as_ref().map(|s| s.total_searches).unwrap_or(0),
        })),
    )
}
