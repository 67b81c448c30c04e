//! Status server: `/health` and `/status` over axum.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ExecutionMode;
use crate::scheduler::{StatusBoard, TaskStatus};

pub struct AppState {
    pub board: StatusBoard,
    pub mode: ExecutionMode,
    pub started: DateTime<Utc>,
}

impl AppState {
    pub fn new(board: StatusBoard, mode: ExecutionMode) -> Arc<Self> {
        Arc::new(Self { board, mode, started: Utc::now() })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub execution_mode: String,
    pub uptime_secs: i64,
    pub tasks: Vec<TaskStatus>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        execution_mode: state.mode.to_string(),
        uptime_secs: (Utc::now() - state.started).num_seconds(),
        tasks: state.board.snapshot().await,
    })
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind status port {}", port))?;
    info!(%addr, "status server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .wrap_err("status server error")
}
