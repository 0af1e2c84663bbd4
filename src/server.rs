use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    registry::TaskRegistry,
    types::{ScanRequest, ServiceInfo, TaskStatus},
};

#[derive(Clone)]
pub struct AppState {
    registry: TaskRegistry,
}

impl AppState {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }
}

/// Routes: `GET /introspect`, `POST /invoke`, `GET /result/{task_id}`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/introspect", get(get_introspect))
        .route("/invoke", post(post_invoke))
        .route("/result/{task_id}", get(get_result))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn spawn_server(bind: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving scan API on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn get_introspect() -> impl IntoResponse {
    Json(ServiceInfo::current())
}

async fn post_invoke(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> Response {
    if req.target.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Target is required" }))).into_response();
    }
    match app.registry.submit(&req.target, req.flags.as_deref()).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "taskId": task_id, "status": "pending", "message": "Nmap scan initiated" })),
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn get_result(State(app): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = app.registry.get(&task_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Task not found" }))).into_response();
    };
    match task.status {
        TaskStatus::Pending => (
            StatusCode::ACCEPTED,
            Json(json!({ "taskId": task.task_id, "status": "pending", "message": "Nmap scan is still in progress." })),
        )
            .into_response(),
        TaskStatus::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "taskId": task.task_id, "status": "failed", "error": task.error })),
        )
            .into_response(),
        TaskStatus::Completed => (
            StatusCode::OK,
            Json(json!({
                "taskId": task.task_id,
                "status": "completed",
                "result": task.result,
                "warning": task.warning,
            })),
        )
            .into_response(),
    }
}
