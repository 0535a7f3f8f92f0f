use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

/// Viewer preferences; missing keys in stored JSON take the defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub theme: Theme,
    pub auto_play: bool,
    pub keyboard_shortcuts: bool,
    pub default_quality: Quality,
    pub volume: f64,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            auto_play: true,
            keyboard_shortcuts: true,
            default_quality: Quality::Auto,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryItem {
    pub channel_id: String,
    pub channel_name: String,
    pub timestamp: i64,
    /// Seconds watched
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Playback-side health report (reported by the player, not the prober)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHealth {
    pub channel_id: String,
    pub is_healthy: bool,
    pub last_checked: i64,
    pub error_count: u32,
}

/// Backup document produced by export
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub favorites: Vec<String>,
    pub watch_history: Vec<WatchHistoryItem>,
    pub preferences: UserPreferences,
    pub exported_at: String,
}

/// Backup document accepted by import; unknown keys are ignored.
///
/// Preferences stay raw JSON so an unreadable preferences block does not
/// take the favorites down with it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBundle {
    #[serde(default)]
    pub favorites: Option<Vec<String>>,
    #[serde(default)]
    pub preferences: Option<serde_json::Value>,
}
