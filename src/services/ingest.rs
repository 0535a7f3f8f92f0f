use crate::models::{Channel, ChannelSource};
use crate::services::cache::PlaylistCache;
use crate::services::m3u_parser::{is_demo_set, M3UParser};
use crate::services::metrics;

/// Loads the channel list: cache first, then the network, then the demo set
pub struct Ingestor {
    parser: M3UParser,
    cache: PlaylistCache,
    playlist_url: String,
}

impl Ingestor {
    pub fn new(parser: M3UParser, cache: PlaylistCache, playlist_url: impl Into<String>) -> Self {
        Self {
            parser,
            cache,
            playlist_url: playlist_url.into(),
        }
    }

    pub fn parser(&self) -> &M3UParser {
        &self.parser
    }

    /// Load channels, bypassing the cache when `force_refresh` is set.
    ///
    /// Only real playlist results are cached; the demo fallback never is, so
    /// the next load retries the network.
    pub async fn load(&self, force_refresh: bool) -> (Vec<Channel>, ChannelSource) {
        if !force_refresh {
            if let Some(channels) = self.cache.get().await {
                tracing::info!(count = channels.len(), "Loaded channels from cache");
                metrics::record_playlist_load(ChannelSource::Cache);
                return (channels, ChannelSource::Cache);
            }
        }

        let channels: Vec<Channel> = self
            .parser
            .fetch_and_parse(&self.playlist_url)
            .await
            .into_iter()
            .filter(Channel::is_complete)
            .collect();

        let source = if is_demo_set(&channels) {
            tracing::warn!(url = %self.playlist_url, "Playlist unavailable, serving demo channels");
            ChannelSource::Fallback
        } else {
            self.cache.put(&channels).await;
            ChannelSource::Network
        };

        metrics::record_playlist_load(source);
        (channels, source)
    }
}
