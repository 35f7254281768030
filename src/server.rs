//! HTTP control surface
//!
//! A small localhost router over the in-process components: status, config,
//! lifecycle controls, history, health and a server-sent-events log stream.
//! Everything here is a thin view; the engine never depends on it.

use crate::config::Config;
use crate::loghub::LogHub;
use crate::manager::SyncManager;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SyncManager>,
    pub loghub: Arc<LogHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/sync/start", post(start_sync))
        .route("/api/sync/stop", post(stop_sync))
        .route("/api/sync/trigger", post(trigger_sync))
        .route("/api/history", get(get_history))
        .route("/api/health", get(get_health))
        .route("/api/logs/stream", get(stream_logs))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn serve(state: AppState, addr: SocketAddr) -> crate::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control surface listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.status())
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    match Config::load(state.manager.config_path()) {
        Ok(config) => Json(config).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Partial config update; rejected while the engine runs
async fn set_config(
    State(state): State<AppState>,
    Json(updates): Json<serde_json::Value>,
) -> impl IntoResponse {
    if state.manager.running() {
        return error_response(StatusCode::CONFLICT, "Stop sync before changing config");
    }

    let current = match Config::load(state.manager.config_path()) {
        Ok(config) => config,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let mut merged = match serde_json::to_value(&current) {
        Ok(value) => value,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let (Some(merged_map), Some(update_map)) = (merged.as_object_mut(), updates.as_object())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Expected a JSON object");
    };
    for (key, value) in update_map {
        merged_map.insert(key.clone(), value.clone());
    }

    let config: Config = match serde_json::from_value(merged) {
        Ok(config) => config,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid config: {e}"))
        }
    };
    if let Err(e) = config.save(state.manager.config_path()) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    Json(json!({"ok": true})).into_response()
}

async fn start_sync(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.start().await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn stop_sync(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.stop().await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn trigger_sync(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.trigger() {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    Json(state.manager.history().get_history(params.limit, params.offset))
}

async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let local_root = Config::load(state.manager.config_path())
        .map(|c| c.local_folder)
        .unwrap_or_default();
    Json(state.manager.health().report(&local_root))
}

/// Replay the recent log ring, then stream live records
async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.loghub.subscribe();
    let stream = ReceiverStream::new(rx).map(|entry| {
        Ok(Event::default().data(serde_json::to_string(&entry).unwrap_or_default()))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({"ok": false, "error": message}))).into_response()
}
