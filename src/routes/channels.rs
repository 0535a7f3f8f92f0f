use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Channel, ChannelSource, ChannelsQuery, ChannelsResponse};
use crate::services::m3u_parser::{demo_channels, is_demo_set};
use crate::AppState;

/// Parse request: inline playlist text or a playlist URL
#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResponse {
    pub channels: Vec<Channel>,
    pub total: usize,
    pub fallback: bool,
}

/// GET /api/channels - Current channel list (cache, network or demo fallback)
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelsQuery>,
) -> impl IntoResponse {
    let (channels, source) = state.load_channels(query.refresh).await;

    Json(ChannelsResponse {
        total: channels.len(),
        channels,
        source,
        fallback: source == ChannelSource::Fallback,
    })
}

/// GET /api/channels/healthy - Current list with unhealthy channels removed
pub async fn healthy_channels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let channels = state.channels.read().await.clone();
    let store = state.health_checker.store();
    let healthy = store.filter_healthy(&channels).await;

    Json(serde_json::json!({
        "total": healthy.len(),
        "hidden": channels.len() - healthy.len(),
        "policy": format!("{:?}", store.policy()).to_lowercase(),
        "channels": healthy,
    }))
}

/// POST /api/playlist/parse - Parse playlist text, or fetch and parse a URL
pub async fn parse_playlist(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ParseRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let parser = state.ingestor.parser();

    let channels = match (payload.content, payload.url) {
        (Some(content), _) => {
            let parsed = parser.parse_channels(&content);
            if parsed.is_empty() {
                demo_channels()
            } else {
                parsed
            }
        }
        (None, Some(url)) => {
            let valid = url::Url::parse(&url)
                .map(|u| u.scheme() == "http" || u.scheme() == "https")
                .unwrap_or(false);
            if !valid {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "Invalid playlist URL" })),
                ));
            }
            parser.fetch_and_parse(&url).await
        }
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Provide playlist content or url" })),
            ));
        }
    };

    Ok(Json(ParseResponse {
        total: channels.len(),
        fallback: is_demo_set(&channels),
        channels,
    }))
}
