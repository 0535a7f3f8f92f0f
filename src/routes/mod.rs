pub mod channels;
pub mod health;
pub mod health_check;
pub mod user_data;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::services::storage::StorageError;
use crate::AppState;

/// Error response shared by the JSON handlers
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn storage_error(e: StorageError) -> ApiError {
    tracing::error!("Storage failure: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Storage unavailable" })),
    )
}

/// Every route of the service, without middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        // Channel endpoints
        .route("/api/channels", get(channels::list_channels))
        .route("/api/channels/healthy", get(channels::healthy_channels))
        .route("/api/playlist/parse", post(channels::parse_playlist))
        // Channel health runs
        .route("/api/health/check", post(health_check::start_check))
        .route("/api/health/stop", post(health_check::stop_check))
        .route("/api/health/records", get(health_check::records))
        .route("/api/health/stream", get(health_check::stream))
        // User data
        .route(
            "/api/favorites",
            get(user_data::get_favorites).put(user_data::put_favorites),
        )
        .route("/api/favorites/:id/toggle", post(user_data::toggle_favorite))
        .route(
            "/api/history",
            get(user_data::get_history)
                .post(user_data::add_history)
                .delete(user_data::clear_history),
        )
        .route(
            "/api/preferences",
            get(user_data::get_preferences).put(user_data::put_preferences),
        )
        .route(
            "/api/stream-health",
            get(user_data::get_stream_health).post(user_data::report_stream_health),
        )
        // Backup and reset
        .route("/api/export", get(user_data::export_data))
        .route("/api/import", post(user_data::import_data))
        .route("/api/data", delete(user_data::clear_all_data))
        .with_state(state)
}
