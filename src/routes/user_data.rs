use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::{Arc, PoisonError};

use crate::models::{StreamHealth, UserPreferences, WatchHistoryItem};
use crate::routes::{storage_error, ApiError};
use crate::AppState;

// Favorites

pub async fn get_favorites(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.user_data.favorites().await)
}

pub async fn put_favorites(
    State(state): State<Arc<AppState>>,
    Json(favorites): Json<Vec<String>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_data
        .save_favorites(&favorites)
        .await
        .map_err(storage_error)?;
    Ok(Json(favorites))
}

/// POST /api/favorites/:id/toggle
pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let favorite = state
        .user_data
        .toggle_favorite(&channel_id)
        .await
        .map_err(storage_error)?;

    Ok(Json(serde_json::json!({
        "channelId": channel_id,
        "favorite": favorite,
    })))
}

// Watch history

pub async fn get_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.user_data.watch_history().await)
}

pub async fn add_history(
    State(state): State<Arc<AppState>>,
    Json(item): Json<WatchHistoryItem>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_data
        .add_to_watch_history(item)
        .await
        .map_err(storage_error)?;
    Ok(Json(state.user_data.watch_history().await))
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state
        .user_data
        .clear_watch_history()
        .await
        .map_err(storage_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// Preferences

pub async fn get_preferences(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.user_data.preferences().await)
}

pub async fn put_preferences(
    State(state): State<Arc<AppState>>,
    Json(preferences): Json<UserPreferences>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_data
        .save_preferences(&preferences)
        .await
        .map_err(storage_error)?;
    Ok(Json(preferences))
}

// Playback health reports

pub async fn get_stream_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.user_data.stream_health().await)
}

pub async fn report_stream_health(
    State(state): State<Arc<AppState>>,
    Json(health): Json<StreamHealth>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_data
        .update_stream_health(health)
        .await
        .map_err(storage_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// Backup and reset

/// GET /api/export - Downloadable backup document
pub async fn export_data(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let body = state.user_data.export_data().await.map_err(storage_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"reettv-backup.json\""),
        ],
        body,
    ))
}

/// POST /api/import - Restore favorites and preferences from a backup
pub async fn import_data(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    if !state.user_data.import_data(&body).await {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid backup document" })),
        ));
    }
    Ok(Json(serde_json::json!({ "imported": true })))
}

/// DELETE /api/data - Remove every persisted slot
pub async fn clear_all_data(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.stop_health_run();
    state.user_data.clear_all_data().await.map_err(storage_error)?;
    state
        .healthy_ids
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    Ok(StatusCode::NO_CONTENT)
}
