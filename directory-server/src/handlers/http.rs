//! Optional read-only status endpoint (`PARLOR_STATUS_PORT`).

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use log::info;
use tower_http::trace::TraceLayer;

use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/health", get(|| async { "ok" }))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not found. Use /health or /api/status.") })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn get_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let online_users = state.sessions.read().await.len();
    let registered_users = state.users.read().await.len();
    let connections = state.connections.read().await.len();

    Json(serde_json::json!({
        "connections": connections,
        "online_users": online_users,
        "registered_users": registered_users,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "started_at_utc": state.started_at_utc,
        "lifecycle": state.lifecycle(),
    }))
}

pub async fn serve_status(addr: SocketAddr, state: SharedState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status endpoint on http://{}/api/status", addr);
    axum::serve(listener, router(state)).await
}
