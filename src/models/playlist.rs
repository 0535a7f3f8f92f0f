use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel name for EXTINF lines without a title segment
pub const UNKNOWN_CHANNEL_NAME: &str = "Unknown Channel";

/// Sentinel group for EXTINF lines without `group-title`
pub const DEFAULT_GROUP: &str = "General";

/// Single playable live-TV channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub country: String,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl Channel {
    /// A channel is usable only with non-empty id, name and url
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty() && !self.url.is_empty()
    }
}

/// Persisted playlist cache slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistCacheEntry {
    pub channels: Vec<Channel>,
    /// Capture time (epoch millis)
    pub timestamp: i64,
}

/// Last probe verdict for one channel id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub healthy: bool,
    /// Probe time (epoch millis)
    pub checked_at: i64,
}

impl HealthRecord {
    /// Whether the verdict may still be trusted at `now`
    pub fn is_fresh(&self, now: i64, ttl_ms: i64) -> bool {
        now - self.checked_at < ttl_ms
    }
}

/// Persisted health slot: channel id -> record
pub type HealthRecords = HashMap<String, HealthRecord>;

/// Where a channel listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSource {
    Cache,
    Network,
    Fallback,
}

impl std::fmt::Display for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSource::Cache => write!(f, "cache"),
            ChannelSource::Network => write!(f, "network"),
            ChannelSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// One published health update
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthUpdate {
    pub run_id: String,
    pub healthy_ids: Vec<String>,
    /// Channels resolved so far (reused + probed)
    pub resolved: usize,
    pub total: usize,
    pub done: bool,
}

/// Channel listing response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    pub channels: Vec<Channel>,
    pub total: usize,
    pub source: ChannelSource,
    /// True when the playlist was unreachable and demo data is shown
    pub fallback: bool,
}

/// Query parameters for the channel listing
#[derive(Debug, Default, Deserialize)]
pub struct ChannelsQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Request to start a health run
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Response for a started health run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub run_id: String,
    pub channels: usize,
    pub batch_size: usize,
}
