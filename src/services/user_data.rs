use chrono::{SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::models::{ExportBundle, ImportBundle, StreamHealth, UserPreferences, WatchHistoryItem};
use crate::services::cache::PLAYLIST_CACHE_KEY;
use crate::services::clock::Clock;
use crate::services::health_store::HEALTH_KEY;
use crate::services::storage::{KvBackend, StorageError};

pub const FAVORITES_KEY: &str = "iptv_favorites_v2";
pub const WATCH_HISTORY_KEY: &str = "iptv_watch_history_v1";
pub const PREFERENCES_KEY: &str = "iptv_user_preferences_v1";
pub const STREAM_HEALTH_KEY: &str = "iptv_stream_health_v1";
pub const BANDWIDTH_KEY: &str = "iptv_bandwidth_usage_v1";

const MAX_WATCH_HISTORY: usize = 50;
const MAX_STREAM_HEALTH: usize = 100;

/// Every slot removed by a full data reset
const ALL_KEYS: [&str; 7] = [
    FAVORITES_KEY,
    WATCH_HISTORY_KEY,
    PREFERENCES_KEY,
    STREAM_HEALTH_KEY,
    BANDWIDTH_KEY,
    PLAYLIST_CACHE_KEY,
    HEALTH_KEY,
];

/// Viewer data: favorites, watch history, preferences and playback health
#[derive(Clone)]
pub struct UserDataService {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
}

impl UserDataService {
    pub fn new(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Read a slot; missing or unreadable slots yield `None`
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, "Discarding unparsable slot: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, "Failed to read slot: {}", e);
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value)?;
        self.backend.set(key, serialized).await
    }

    // Favorites

    pub async fn favorites(&self) -> Vec<String> {
        self.read(FAVORITES_KEY).await.unwrap_or_default()
    }

    pub async fn save_favorites(&self, favorites: &[String]) -> Result<(), StorageError> {
        self.write(FAVORITES_KEY, favorites).await
    }

    /// Add or remove `channel_id`; returns whether it is now a favorite
    pub async fn toggle_favorite(&self, channel_id: &str) -> Result<bool, StorageError> {
        let mut favorites = self.favorites().await;
        let now_favorite = match favorites.iter().position(|id| id == channel_id) {
            Some(pos) => {
                favorites.remove(pos);
                false
            }
            None => {
                favorites.push(channel_id.to_string());
                true
            }
        };
        self.save_favorites(&favorites).await?;
        Ok(now_favorite)
    }

    // Watch history

    pub async fn watch_history(&self) -> Vec<WatchHistoryItem> {
        self.read(WATCH_HISTORY_KEY).await.unwrap_or_default()
    }

    /// Newest first, one entry per channel
    pub async fn add_to_watch_history(&self, item: WatchHistoryItem) -> Result<(), StorageError> {
        let history = self.watch_history().await;
        let updated: Vec<WatchHistoryItem> = std::iter::once(item.clone())
            .chain(history.into_iter().filter(|h| h.channel_id != item.channel_id))
            .take(MAX_WATCH_HISTORY)
            .collect();
        self.write(WATCH_HISTORY_KEY, &updated).await
    }

    pub async fn clear_watch_history(&self) -> Result<(), StorageError> {
        self.backend.remove(WATCH_HISTORY_KEY).await
    }

    // Preferences

    pub async fn preferences(&self) -> UserPreferences {
        self.read(PREFERENCES_KEY).await.unwrap_or_default()
    }

    pub async fn save_preferences(&self, preferences: &UserPreferences) -> Result<(), StorageError> {
        self.write(PREFERENCES_KEY, preferences).await
    }

    // Playback-side stream health

    pub async fn stream_health(&self) -> Vec<StreamHealth> {
        self.read(STREAM_HEALTH_KEY).await.unwrap_or_default()
    }

    pub async fn update_stream_health(&self, health: StreamHealth) -> Result<(), StorageError> {
        let all = self.stream_health().await;
        let updated: Vec<StreamHealth> = std::iter::once(health.clone())
            .chain(all.into_iter().filter(|h| h.channel_id != health.channel_id))
            .take(MAX_STREAM_HEALTH)
            .collect();
        self.write(STREAM_HEALTH_KEY, &updated).await
    }

    // Backup and reset

    /// Pretty-printed backup of favorites, history and preferences
    pub async fn export_data(&self) -> Result<String, StorageError> {
        let bundle = ExportBundle {
            favorites: self.favorites().await,
            watch_history: self.watch_history().await,
            preferences: self.preferences().await,
            exported_at: self.iso_now(),
        };
        Ok(serde_json::to_string_pretty(&bundle)?)
    }

    /// Restore favorites and preferences from a backup; false on invalid JSON.
    /// Preferences that do not decode are skipped and the current ones kept.
    pub async fn import_data(&self, json: &str) -> bool {
        let bundle: ImportBundle = match serde_json::from_str(json) {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::warn!("Rejected import: {}", e);
                return false;
            }
        };

        if let Some(favorites) = bundle.favorites {
            if let Err(e) = self.save_favorites(&favorites).await {
                tracing::error!("Failed to import favorites: {}", e);
                return false;
            }
        }
        if let Some(raw) = bundle.preferences {
            match serde_json::from_value::<UserPreferences>(raw) {
                Ok(preferences) => {
                    if let Err(e) = self.save_preferences(&preferences).await {
                        tracing::error!("Failed to import preferences: {}", e);
                        return false;
                    }
                }
                // Favorites are already restored; keep the current preferences
                Err(e) => tracing::warn!("Skipping unreadable preferences in import: {}", e),
            }
        }
        true
    }

    /// Remove every persisted slot, cached channels and health records included
    pub async fn clear_all_data(&self) -> Result<(), StorageError> {
        for key in ALL_KEYS {
            self.backend.remove(key).await?;
        }
        tracing::info!("All persisted data cleared");
        Ok(())
    }

    fn iso_now(&self) -> String {
        Utc.timestamp_millis_opt(self.clock.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Quality, Theme};
    use crate::services::clock::ManualClock;
    use crate::services::storage::testing::FailingBackend;
    use crate::services::storage::MemoryBackend;

    fn service() -> (UserDataService, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (UserDataService::new(backend.clone(), clock), backend)
    }

    fn history_item(channel_id: &str, timestamp: i64) -> WatchHistoryItem {
        WatchHistoryItem {
            channel_id: channel_id.to_string(),
            channel_name: format!("Channel {}", channel_id),
            timestamp,
            duration: 60,
            logo: None,
        }
    }

    #[tokio::test]
    async fn test_toggle_favorite() {
        let (svc, _) = service();
        assert!(svc.toggle_favorite("a").await.unwrap());
        assert!(svc.toggle_favorite("b").await.unwrap());
        assert!(!svc.toggle_favorite("a").await.unwrap());
        assert_eq!(svc.favorites().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_watch_history_dedupes_newest_first() {
        let (svc, _) = service();
        svc.add_to_watch_history(history_item("a", 1)).await.unwrap();
        svc.add_to_watch_history(history_item("b", 2)).await.unwrap();
        svc.add_to_watch_history(history_item("a", 3)).await.unwrap();

        let history = svc.watch_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].channel_id, "a");
        assert_eq!(history[0].timestamp, 3);
        assert_eq!(history[1].channel_id, "b");

        svc.clear_watch_history().await.unwrap();
        assert!(svc.watch_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_watch_history_is_capped() {
        let (svc, _) = service();
        for i in 0..60 {
            svc.add_to_watch_history(history_item(&format!("ch{}", i), i))
                .await
                .unwrap();
        }
        let history = svc.watch_history().await;
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].channel_id, "ch59");
        assert_eq!(history[49].channel_id, "ch10");
    }

    #[tokio::test]
    async fn test_stream_health_is_capped() {
        let (svc, _) = service();
        for i in 0..105 {
            svc.update_stream_health(StreamHealth {
                channel_id: format!("ch{}", i),
                is_healthy: i % 2 == 0,
                last_checked: i,
                error_count: 0,
            })
            .await
            .unwrap();
        }
        let all = svc.stream_health().await;
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].channel_id, "ch104");
    }

    #[tokio::test]
    async fn test_preferences_merge_over_defaults() {
        let (svc, backend) = service();
        assert_eq!(svc.preferences().await, UserPreferences::default());

        backend
            .set(PREFERENCES_KEY, r#"{"volume":0.3,"defaultQuality":"720p"}"#.to_string())
            .await
            .unwrap();
        let prefs = svc.preferences().await;
        assert_eq!(prefs.volume, 0.3);
        assert_eq!(prefs.default_quality, Quality::P720);
        assert_eq!(prefs.theme, Theme::Dark);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let (source, _) = service();
        source
            .save_favorites(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        let prefs = UserPreferences {
            theme: Theme::Light,
            volume: 0.4,
            ..Default::default()
        };
        source.save_preferences(&prefs).await.unwrap();
        source.add_to_watch_history(history_item("x", 5)).await.unwrap();

        let exported = source.export_data().await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(doc["exportedAt"], "2023-11-14T22:13:20.000Z");
        assert_eq!(doc["watchHistory"][0]["channelId"], "x");

        let (target, _) = service();
        assert!(target.import_data(&exported).await);
        assert_eq!(target.favorites().await, vec!["x", "y"]);
        assert_eq!(target.preferences().await, prefs);
        // History is not part of an import
        assert!(target.watch_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_json() {
        let (svc, _) = service();
        svc.save_favorites(&["keep".to_string()]).await.unwrap();
        assert!(!svc.import_data("{oops").await);
        assert_eq!(svc.favorites().await, vec!["keep"]);
        // Valid JSON without known keys changes nothing
        assert!(svc.import_data(r#"{"other":1}"#).await);
        assert_eq!(svc.favorites().await, vec!["keep"]);
    }

    #[tokio::test]
    async fn test_import_keeps_favorites_when_preferences_are_unreadable() {
        let (svc, _) = service();
        let backup = r#"{"favorites":["a","b"],"preferences":{"theme":"sepia","volume":0.2}}"#;

        assert!(svc.import_data(backup).await);
        assert_eq!(svc.favorites().await, vec!["a", "b"]);
        assert_eq!(svc.preferences().await, UserPreferences::default());
    }

    #[tokio::test]
    async fn test_clear_all_data() {
        let (svc, backend) = service();
        svc.save_favorites(&["a".to_string()]).await.unwrap();
        backend.set(PLAYLIST_CACHE_KEY, "{}".to_string()).await.unwrap();
        backend.set(HEALTH_KEY, "{}".to_string()).await.unwrap();

        svc.clear_all_data().await.unwrap();

        for key in ALL_KEYS {
            assert_eq!(backend.get(key).await.unwrap(), None, "{}", key);
        }
    }

    #[tokio::test]
    async fn test_broken_storage() {
        let svc = UserDataService::new(Arc::new(FailingBackend), Arc::new(ManualClock::new(0)));
        assert!(svc.favorites().await.is_empty());
        assert_eq!(svc.preferences().await, UserPreferences::default());
        assert!(svc.toggle_favorite("a").await.is_err());
        assert!(!svc.import_data(r#"{"favorites":["a"]}"#).await);
    }
}
