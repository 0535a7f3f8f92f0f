//! Lightweight reachability probe for a single channel.
//!
//! A probe asks for the first KB of the stream and decides from the status,
//! the content type and (for HLS) the body. It never reports an error: a
//! failure of any kind is an unhealthy verdict.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::timeout;

use crate::models::Channel;
use crate::services::metrics;

const HLS_MARKERS: [&str; 2] = ["#EXTM3U", "#EXT-X"];

#[async_trait]
pub trait Prober: Send + Sync {
    /// True when the channel looks playable right now
    async fn probe(&self, channel: &Channel) -> bool;
}

/// Whether the response must carry an HLS manifest body
pub fn expects_hls(content_type: &str, url: &str) -> bool {
    content_type.to_ascii_lowercase().contains("mpegurl") || url.contains(".m3u8")
}

/// Whether a body prefix contains an HLS marker
pub fn is_hls_body(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    HLS_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Direct (non-HLS) streams only need a full or partial content answer
pub fn is_direct_stream_status(status: u16) -> bool {
    status == 200 || status == 206
}

/// HTTP prober with a hard per-probe timeout
pub struct HttpProber {
    client: Client,
    timeout: Duration,
    range_bytes: u64,
}

impl HttpProber {
    pub fn new(user_agent: &str, timeout_ms: u64, range_bytes: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_millis(timeout_ms),
            range_bytes,
        })
    }

    async fn verdict(&self, url: &str) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", self.range_bytes))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(false);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if expects_hls(&content_type, url) {
            let body = read_prefix(response, self.range_bytes as usize + 1).await?;
            return Ok(is_hls_body(&body));
        }

        Ok(is_direct_stream_status(status.as_u16()))
    }
}

/// Read at most `limit` body bytes; servers may ignore the Range header
async fn read_prefix(mut response: Response, limit: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::with_capacity(limit.min(64 * 1024));
    while body.len() < limit {
        match response.chunk().await? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    body.truncate(limit);
    Ok(body)
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, channel: &Channel) -> bool {
        // Dropping the request future on timeout aborts the connection
        let healthy = match timeout(self.timeout, self.verdict(&channel.url)).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                tracing::debug!(channel_id = %channel.id, error = %e, "probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(channel_id = %channel.id, "probe timed out");
                false
            }
        };

        metrics::record_probe(healthy);
        healthy
    }
}
