use std::sync::Arc;

use crate::models::{Channel, PlaylistCacheEntry};
use crate::services::clock::Clock;
use crate::services::storage::KvBackend;

pub const PLAYLIST_CACHE_KEY: &str = "iptv_channels_cache_v1";

/// Time-bounded cache of the last successfully ingested channel list.
///
/// Failures never reach callers: a broken slot reads as a miss and a failed
/// write is only logged.
#[derive(Clone)]
pub struct PlaylistCache {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl PlaylistCache {
    pub fn new(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            backend,
            clock,
            ttl_ms,
        }
    }

    /// Cached channels, or `None` when missing, unreadable or expired
    pub async fn get(&self) -> Option<Vec<Channel>> {
        let raw = match self.backend.get(PLAYLIST_CACHE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read playlist cache: {}", e);
                return None;
            }
        };

        let entry: PlaylistCacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding unparsable playlist cache: {}", e);
                return None;
            }
        };

        let age = self.clock.now_ms() - entry.timestamp;
        if age >= self.ttl_ms {
            tracing::debug!(cache_age_ms = age, msg = "playlist cache expired");
            return None;
        }

        Some(entry.channels)
    }

    /// Overwrite the slot with `channels` stamped at the current time
    pub async fn put(&self, channels: &[Channel]) {
        let entry = PlaylistCacheEntry {
            channels: channels.to_vec(),
            timestamp: self.clock.now_ms(),
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to serialize playlist cache: {}", e);
                return;
            }
        };

        if let Err(e) = self.backend.set(PLAYLIST_CACHE_KEY, serialized).await {
            tracing::error!("Failed to cache channels: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::m3u_parser::demo_channels;
    use crate::services::storage::testing::FailingBackend;
    use crate::services::storage::MemoryBackend;

    const HOUR: i64 = 60 * 60 * 1000;
    const MINUTE: i64 = 60 * 1000;

    fn cache_with(backend: Arc<dyn KvBackend>, clock: Arc<ManualClock>) -> PlaylistCache {
        PlaylistCache::new(backend, clock, 6 * HOUR)
    }

    #[tokio::test]
    async fn test_ttl_boundaries() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = cache_with(Arc::new(MemoryBackend::new()), clock.clone());

        assert!(cache.get().await.is_none());
        cache.put(&demo_channels()).await;

        clock.advance(5 * HOUR + 59 * MINUTE);
        assert_eq!(cache.get().await.map(|c| c.len()), Some(3));

        clock.advance(2 * MINUTE);
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_expires_exactly_at_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(Arc::new(MemoryBackend::new()), clock.clone());
        cache.put(&demo_channels()).await;
        clock.set(6 * HOUR);
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_slot_is_a_miss() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(PLAYLIST_CACHE_KEY, "{not json".to_string())
            .await
            .unwrap();
        let cache = cache_with(backend, Arc::new(ManualClock::new(0)));
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_backend_failures_are_swallowed() {
        let cache = cache_with(Arc::new(FailingBackend), Arc::new(ManualClock::new(0)));
        cache.put(&demo_channels()).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(Arc::new(MemoryBackend::new()), clock.clone());
        cache.put(&demo_channels()).await;
        cache.put(&demo_channels()[..1]).await;
        assert_eq!(cache.get().await.map(|c| c.len()), Some(1));
    }
}
