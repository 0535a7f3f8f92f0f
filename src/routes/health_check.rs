use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError};
use tokio::sync::broadcast::error::RecvError;

use crate::models::HealthCheckRequest;
use crate::AppState;

/// POST /api/health/check - Start a background health run
pub async fn start_check(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<HealthCheckRequest>>,
) -> impl IntoResponse {
    let batch_size = payload
        .and_then(|Json(req)| req.batch_size)
        .unwrap_or(state.config.health_batch_size)
        .max(1);

    if state.channels.read().await.is_empty() {
        state.load_channels(false).await;
    }

    let started = state.start_health_run(batch_size).await;
    tracing::info!(
        run_id = %started.run_id,
        channels = started.channels,
        batch_size = started.batch_size,
        "Health run requested"
    );

    (StatusCode::ACCEPTED, Json(started))
}

/// POST /api/health/stop - Stop the active run after its current batch
pub async fn stop_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stopped = state.stop_health_run();

    Json(serde_json::json!({
        "stopped": stopped.is_some(),
        "runId": stopped,
    }))
}

/// GET /api/health/records - Persisted verdicts and the latest healthy set
pub async fn records(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.health_checker.store();
    let records = store.load().await;

    let mut healthy_ids: Vec<String> = state
        .healthy_ids
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    healthy_ids.sort();

    Json(serde_json::json!({
        "ttlMs": store.ttl_ms(),
        "records": records,
        "healthyIds": healthy_ids,
        "activeRun": state.active_run(),
    }))
}

/// GET /api/health/stream - Server-sent health updates
pub async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.health_checker.subscribe();

    let updates = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(update) => match Event::default().event("health").json_data(&update) {
                    Ok(event) => yield Ok::<_, Infallible>(event),
                    Err(e) => tracing::warn!("Failed to encode health update: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Health stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(updates).keep_alive(KeepAlive::default())
}
