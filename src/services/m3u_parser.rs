use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::models::{Channel, DEFAULT_GROUP, UNKNOWN_CHANNEL_NAME};
use crate::services::identity::IdScheme;

const EXTINF_PREFIX: &str = "#EXTINF:";

lazy_static! {
    static ref LOGO_REGEX: Regex = Regex::new(r#"tvg-logo="([^"]*)""#).unwrap();
    static ref GROUP_REGEX: Regex = Regex::new(r#"group-title="([^"]*)""#).unwrap();
    static ref LANGUAGE_REGEX: Regex = Regex::new(r#"tvg-language="([^"]*)""#).unwrap();
    static ref COUNTRY_REGEX: Regex = Regex::new(r#"tvg-country="([^"]*)""#).unwrap();
}

/// Errors while downloading a playlist
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Playlist too large: {size_mb:.1}MB (limit {limit_mb}MB)")]
    TooLarge { size_mb: f64, limit_mb: usize },
}

// ============ Field extractors ============

fn capture_non_empty(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `tvg-logo="..."`, empty when absent
pub fn extract_logo(line: &str) -> String {
    capture_non_empty(&LOGO_REGEX, line).unwrap_or_default()
}

/// `group-title="..."`, "General" when absent
pub fn extract_group(line: &str) -> String {
    capture_non_empty(&GROUP_REGEX, line).unwrap_or_else(|| DEFAULT_GROUP.to_string())
}

/// `tvg-language="..."`, empty when absent
pub fn extract_language(line: &str) -> String {
    capture_non_empty(&LANGUAGE_REGEX, line).unwrap_or_default()
}

/// `tvg-country="..."`, empty when absent
pub fn extract_country(line: &str) -> String {
    capture_non_empty(&COUNTRY_REGEX, line).unwrap_or_default()
}

/// Text after the last comma, "Unknown Channel" when absent or blank
pub fn extract_name(line: &str) -> String {
    line.rfind(',')
        .map(|idx| line[idx + 1..].trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_CHANNEL_NAME)
        .to_string()
}

/// Attributes of the EXTINF line awaiting its URL
#[derive(Debug)]
struct PendingChannel {
    name: String,
    logo: String,
    group: String,
    language: String,
    country: String,
}

impl PendingChannel {
    fn from_extinf(line: &str) -> Self {
        Self {
            name: extract_name(line),
            logo: extract_logo(line),
            group: extract_group(line),
            language: extract_language(line),
            country: extract_country(line),
        }
    }

    fn into_channel(self, url: &str, scheme: IdScheme) -> Channel {
        Channel {
            id: scheme.channel_id(&self.name, url),
            name: self.name,
            url: url.to_string(),
            logo: self.logo,
            group: self.group,
            language: self.language,
            country: self.country,
        }
    }
}

/// Ordered, id-keyed accumulator: a colliding id replaces the earlier record
/// in place
#[derive(Default)]
struct ChannelList {
    channels: Vec<Channel>,
    positions: HashMap<String, usize>,
}

impl ChannelList {
    fn insert(&mut self, channel: Channel) {
        match self.positions.get(&channel.id) {
            Some(&idx) => self.channels[idx] = channel,
            None => {
                self.positions.insert(channel.id.clone(), self.channels.len());
                self.channels.push(channel);
            }
        }
    }
}

fn trim_line(line: &str) -> &str {
    line.trim_matches(|c| c == ' ' || c == '\t' || c == '\r')
}

/// Parse playlist text into channels, without the demo fallback.
///
/// Scans with a cursor and looks up each line end, so no vector of all lines
/// is ever built.
pub fn parse_channels(content: &str, scheme: IdScheme) -> Vec<Channel> {
    let mut list = ChannelList::default();
    let mut pending: Option<PendingChannel> = None;
    let mut pos = 0usize;
    let len = content.len();

    while pos < len {
        let eol = content[pos..].find('\n').map(|i| pos + i).unwrap_or(len);
        let line = trim_line(&content[pos..eol]);
        pos = eol + 1;

        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if line.starts_with(EXTINF_PREFIX) {
                pending = Some(PendingChannel::from_extinf(line));
            }
            continue;
        }

        if let Some(extinf) = pending.take() {
            list.insert(extinf.into_channel(line, scheme));
        }
    }

    list.channels
}

/// Parse playlist text; empty or garbled input yields the demo channels
pub fn parse(content: &str) -> Vec<Channel> {
    with_fallback(parse_channels(content, IdScheme::default()))
}

fn with_fallback(channels: Vec<Channel>) -> Vec<Channel> {
    if channels.is_empty() {
        demo_channels()
    } else {
        channels
    }
}

/// Built-in channels shown when no playlist could be loaded
pub fn demo_channels() -> Vec<Channel> {
    let demo = |id: &str, name: &str, url: &str, logo: &str| Channel {
        id: id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        logo: logo.to_string(),
        group: "Demo".to_string(),
        language: "English".to_string(),
        country: String::new(),
    };

    vec![
        demo(
            "demo1",
            "Big Buck Bunny",
            "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8",
            "https://upload.wikimedia.org/wikipedia/commons/thumb/c/c5/Big_buck_bunny_poster_big.jpg/220px-Big_buck_bunny_poster_big.jpg",
        ),
        demo(
            "demo2",
            "Sintel",
            "https://bitdash-a.akamaihd.net/content/sintel/hls/playlist.m3u8",
            "https://upload.wikimedia.org/wikipedia/commons/thumb/e/e0/Sintel.jpg/220px-Sintel.jpg",
        ),
        demo(
            "demo3",
            "Tears of Steel",
            "https://demo.unified-streaming.com/k8s/features/stable/video/tears-of-steel/tears-of-steel.ism/.m3u8",
            "https://upload.wikimedia.org/wikipedia/commons/thumb/2/21/Tos-poster.png/220px-Tos-poster.png",
        ),
    ]
}

/// Whether a channel list is the built-in demo set
pub fn is_demo_set(channels: &[Channel]) -> bool {
    channels.len() == 3 && channels.iter().all(|c| c.id.starts_with("demo"))
}

/// M3U playlist fetcher and parser
pub struct M3UParser {
    client: Client,
    scheme: IdScheme,
    max_retries: u32,
    max_playlist_size_mb: usize,
}

impl M3UParser {
    /// Create a new M3U parser
    pub fn new(
        user_agent: &str,
        timeout_ms: u64,
        max_retries: u32,
        max_playlist_size_mb: usize,
        scheme: IdScheme,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            scheme,
            max_retries,
            max_playlist_size_mb,
        })
    }

    /// Parse text with this parser's id scheme (no fallback)
    pub fn parse_channels(&self, content: &str) -> Vec<Channel> {
        parse_channels(content, self.scheme)
    }

    /// Download the playlist body, retrying network errors and 429s
    pub async fn fetch_playlist(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0u32;

        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if let Some(len) = resp.content_length() {
                            let max_bytes = (self.max_playlist_size_mb as u64) * 1024 * 1024;
                            if len > max_bytes {
                                return Err(FetchError::TooLarge {
                                    size_mb: len as f64 / 1024.0 / 1024.0,
                                    limit_mb: self.max_playlist_size_mb,
                                });
                            }
                        }
                        return Ok(resp.text().await?);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        let backoff_ms = backoff_ms(attempt);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "429", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::Status(status.as_u16()));
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        let backoff_ms = backoff_ms(attempt);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "network", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Fetch and parse a playlist; any failure yields the demo channels
    pub async fn fetch_and_parse(&self, url: &str) -> Vec<Channel> {
        match self.fetch_playlist(url).await {
            Ok(text) => {
                let channels = self.parse_channels(&text);
                tracing::info!("Parsed {} channels from {}", channels.len(), url);
                with_fallback(channels)
            }
            Err(e) => {
                tracing::error!("Failed to fetch playlist {}: {}", url, e);
                demo_channels()
            }
        }
    }
}

fn backoff_ms(attempt: u32) -> u64 {
    (1u64 << attempt.min(16)).saturating_mul(500).min(10_000)
}
