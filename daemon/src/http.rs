//! HTTP/JSON control surface
//!
//! Thin handlers over the supervisor: the filter vocabulary lives in the log
//! ring and the command guards live in the engine, so this module only maps
//! operations to routes and `CoreError` variants to status codes. Handler
//! panics are caught at the outermost layer, logged to the ring, and rendered
//! as a 500 without taking the daemon down.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use procyon_core::{CoreError, LogRing, Supervisor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// The supervision engine
    pub supervisor: Arc<Supervisor>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    status: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BulkRestartRequest {
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BulkRestartResponse {
    status: &'static str,
    restarted: usize,
    failed: usize,
    message: String,
}

/// Build the daemon router with tracing and panic capture layers
pub fn router(state: AppState) -> Router {
    let ring = state.supervisor.ring().clone();

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/processes", get(get_processes))
        .route("/api/processes/restart-all", post(restart_all))
        .route("/api/processes/restart-selected", post(restart_selected))
        .route("/api/processes/{name}/start", post(start_process))
        .route("/api/processes/{name}/stop", post(stop_process))
        .route("/api/processes/{name}/restart", post(restart_process))
        .route("/api/logs", get(get_logs))
        .route("/api/logs/worker", get(get_worker_logs))
        .route("/api/logs/system", get(get_system_logs))
        .route("/api/logs/worker/{name}", get(get_worker_specific_logs))
        .route("/api/crashes", get(get_crashes))
        .route("/api/crashes/stats", get(get_crash_stats))
        .route("/api/crashes/{name}", get(get_crashes_by_process))
        .route("/api/errors", get(get_errors))
        .route("/api/settings", get(get_settings).post(update_settings))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_responder(ring)))
}

fn error_response(err: &CoreError) -> Response {
    let status = match err {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::AlreadyRunning { .. } | CoreError::NotRunning { .. } => StatusCode::CONFLICT,
        CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.kind().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// Panic handler shared by the router layer and its tests: log to the ring,
/// answer 500 in the standard error shape.
fn panic_responder(
    ring: LogRing,
) -> impl Fn(Box<dyn std::any::Any + Send + 'static>) -> Response + Clone {
    move |panic| {
        let detail = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        ring.error(format!("request handler panicked: {detail}"));

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "panic".to_string(),
                message: detail,
            }),
        )
            .into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ready() -> &'static str {
    "ready"
}

async fn get_processes(State(state): State<AppState>) -> Response {
    Json(state.supervisor.processes()).into_response()
}

async fn start_process(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.start(&name).await {
        Ok(()) => Json(SuccessResponse {
            status: "started",
            message: format!("Process {name} started successfully"),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn stop_process(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.stop(&name).await {
        Ok(()) => Json(SuccessResponse {
            status: "stopped",
            message: format!("Process {name} stopped successfully"),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn restart_process(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.restart(&name).await {
        Ok(()) => Json(SuccessResponse {
            status: "restarted",
            message: format!("Process {name} restarted successfully"),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn restart_all(State(state): State<AppState>) -> Response {
    let (restarted, failed) = state.supervisor.restart_all().await;
    bulk_response(restarted, failed)
}

async fn restart_selected(
    State(state): State<AppState>,
    payload: Result<Json<BulkRestartRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(&CoreError::InvalidRequest(rejection.body_text()));
        }
    };

    if request.names.is_empty() {
        return error_response(&CoreError::InvalidRequest(
            "no processes specified".to_string(),
        ));
    }
    if request.names.iter().any(|n| n.trim().is_empty()) {
        return error_response(&CoreError::InvalidRequest(
            "process names cannot be empty".to_string(),
        ));
    }

    let (restarted, failed) = state.supervisor.restart_selected(&request.names).await;
    bulk_response(restarted, failed)
}

fn bulk_response(restarted: usize, failed: usize) -> Response {
    Json(BulkRestartResponse {
        status: "completed",
        restarted,
        failed,
        message: format!("Restarted {restarted} processes, {failed} failed"),
    })
    .into_response()
}

async fn get_logs(State(state): State<AppState>) -> Response {
    Json(state.supervisor.logs(100)).into_response()
}

async fn get_worker_logs(State(state): State<AppState>) -> Response {
    Json(state.supervisor.worker_logs(200)).into_response()
}

async fn get_system_logs(State(state): State<AppState>) -> Response {
    Json(state.supervisor.system_logs(200)).into_response()
}

async fn get_worker_specific_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    Json(state.supervisor.logs_by_process(&name, 50)).into_response()
}

async fn get_crashes(State(state): State<AppState>) -> Response {
    match state.supervisor.storage().get_crashes(100).await {
        Ok(crashes) => Json(crashes).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_crashes_by_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.supervisor.storage().get_crashes_by_process(&name, 50).await {
        Ok(crashes) => Json(crashes).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_crash_stats(State(state): State<AppState>) -> Response {
    match state.supervisor.storage().get_crash_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_errors(State(state): State<AppState>) -> Response {
    match state.supervisor.storage().get_errors(100).await {
        Ok(errors) => Json(errors).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_settings(State(state): State<AppState>) -> Response {
    match state.supervisor.storage().get_all_settings().await {
        Ok(settings) => {
            let map: BTreeMap<String, String> =
                settings.into_iter().map(|s| (s.key, s.value)).collect();
            Json(map).into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> Response {
    let Json(settings) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(&CoreError::InvalidRequest(rejection.body_text()));
        }
    };

    let store = state.supervisor.storage();
    for (key, value) in &settings {
        if let Err(err) = store.set_setting(key, value).await {
            return error_response(&err);
        }
    }

    Json(SuccessResponse {
        status: "saved",
        message: "Settings saved successfully".to_string(),
    })
    .into_response()
}
