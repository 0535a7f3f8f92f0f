use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "ReetTV Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "runtime": "rust"
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StorageStatus {
    backend: &'static str,
    ok: bool,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    storage: StorageStatus,
    channels: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_run: Option<String>,
}

/// GET /health - Service health with storage status
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let storage_ok = state.backend.ping().await;

    // Storage failures degrade the service but never stop it serving channels
    let status = if storage_ok { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        uptime: state.start_time.elapsed().as_secs(),
        storage: StorageStatus {
            backend: state.backend.name(),
            ok: storage_ok,
        },
        channels: state.channels.read().await.len(),
        health_run: state.active_run(),
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe (for Kubernetes)
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.backend.ping().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready - storage unavailable")
    }
}

/// Liveness probe (for Kubernetes)
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
