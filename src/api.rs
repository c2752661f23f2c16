use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::metrics;
use crate::model::{ErrorRecord, Priority, RemediationLog, StoreStats};
use crate::remediation::RemediationEngine;
use crate::rules::{Rule, RuleEngine};
use crate::store::{ErrorFilter, Store};

/// Hard ceiling on page size, whatever the client asks for.
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 20;

/* ============================= STATE ============================= */

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub rules: Arc<RuleEngine>,
    pub engine: Arc<RemediationEngine>,
    pub broadcaster: Arc<Broadcaster>,
    /// Flips true after the first successful poll.
    pub ready: Arc<AtomicBool>,
}

/* ============================= ROUTER ============================= */

pub fn build_router(state: AppState, base_path: &str) -> Router {
    let routes = Router::new()
        .route("/api/errors", get(list_errors))
        .route("/api/errors/:id", get(get_error))
        .route("/api/rules", get(list_rules))
        .route("/api/rules/test", axum::routing::post(test_pattern))
        .route("/api/remediations", get(list_remediations))
        .route("/api/stats", get(get_stats))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/health", get(|| async { (StatusCode::OK, "OK") }))
        .route("/ready", get(ready_probe))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        routes
    } else {
        Router::new().nest(base, routes)
    }
}

/* ============================= PAGINATION ============================= */

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    #[serde(rename = "pageSize")]
    page_size: Option<usize>,
    namespace: Option<String>,
    pod: Option<String>,
    priority: Option<String>,
    remediated: Option<bool>,
    search: Option<String>,
}

fn page_bounds(page: Option<usize>, page_size: Option<usize>) -> (usize, usize, usize) {
    let page = page.unwrap_or(1).max(1);
    let size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    ((page - 1) * size, size, page)
}

/* ============================= ERROR ENDPOINTS ============================= */

#[derive(Debug, Serialize)]
struct ErrorListResponse {
    errors: Vec<ErrorRecord>,
    total: usize,
    page: usize,
    page_size: usize,
}

async fn list_errors(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let priority = match query.priority.as_deref() {
        Some(raw) => match raw.parse::<Priority>() {
            Ok(p) => Some(p),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: e })).into_response();
            }
        },
        None => None,
    };

    let (offset, limit, page) = page_bounds(query.page, query.page_size);
    let filter = ErrorFilter {
        namespace: query.namespace,
        pod: query.pod,
        priority,
        remediated: query.remediated,
        since: None,
        search: query.search,
    };

    let (errors, total) = state.store.list_errors(&filter, offset, limit);
    Json(ErrorListResponse {
        errors,
        total,
        page,
        page_size: limit,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct ErrorDetailResponse {
    error: ErrorRecord,
    remediations: Vec<RemediationLog>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn get_error(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_error(&id) {
        Some(error) => {
            let remediations = state.store.list_remediations_for_error(&id);
            Json(ErrorDetailResponse {
                error,
                remediations,
            })
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("error {id} not found"),
            }),
        )
            .into_response(),
    }
}

/* ============================= RULE ENDPOINTS ============================= */

async fn list_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.rules.rules().into_iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct PatternTestRequest {
    pattern: String,
    sample: String,
}

#[derive(Debug, Serialize)]
struct PatternTestResponse {
    matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn test_pattern(Json(req): Json<PatternTestRequest>) -> Response {
    match RuleEngine::test_pattern(&req.pattern, &req.sample) {
        Ok(matches) => Json(PatternTestResponse {
            matches,
            error: None,
        })
        .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(PatternTestResponse {
                matches: false,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/* ============================= REMEDIATION & STATS ============================= */

#[derive(Debug, Serialize)]
struct RemediationListResponse {
    remediations: Vec<RemediationLog>,
    total: usize,
    page: usize,
    page_size: usize,
}

async fn list_remediations(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<RemediationListResponse> {
    let (offset, limit, page) = page_bounds(query.page, query.page_size);
    let (remediations, total) = state.store.list_remediations(offset, limit);
    Json(RemediationListResponse {
        remediations,
        total,
        page,
        page_size: limit,
    })
}

async fn get_stats(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.store.stats())
}

/* ============================= SETTINGS ============================= */

#[derive(Debug, Serialize)]
struct SettingsResponse {
    enabled: bool,
    dry_run: bool,
    actions_this_hour: usize,
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    enabled: Option<bool>,
    dry_run: Option<bool>,
}

fn settings_snapshot(engine: &RemediationEngine) -> SettingsResponse {
    SettingsResponse {
        enabled: engine.is_enabled(),
        dry_run: engine.is_dry_run(),
        actions_this_hour: engine.actions_this_hour(),
    }
}

async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(settings_snapshot(&state.engine))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsResponse> {
    if let Some(enabled) = update.enabled {
        state.engine.set_enabled(enabled);
    }
    if let Some(dry_run) = update.dry_run {
        state.engine.set_dry_run(dry_run);
    }
    Json(settings_snapshot(&state.engine))
}

/* ============================= PROBES & METRICS ============================= */

async fn ready_probe(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= WEBSOCKET ============================= */

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward broadcaster events to one websocket until either side goes
/// away, then deregister.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut events) = state.broadcaster.subscribe();
    debug!(subscriber = id, "websocket_subscribed");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.broadcaster.unsubscribe(id);
    debug!(subscriber = id, "websocket_closed");
}

/* ============================= TESTS ============================= */
