use std::env;
use std::str::FromStr;

use crate::services::health_store::HealthPolicy;
use crate::services::identity::IdScheme;

/// Which persistence backend holds the key-value slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Redis,
    Memory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Ingestion
    pub playlist_url: String,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub max_playlist_size_mb: usize,
    pub playlist_cache_ttl_ms: i64,
    pub id_scheme: IdScheme,

    // Health
    pub health_ttl_ms: i64,
    pub probe_timeout_ms: u64,
    pub probe_range_bytes: u64,
    pub health_batch_size: usize,
    pub health_batch_delay_ms: u64,
    pub health_policy: HealthPolicy,
    pub auto_health_check: bool,

    // Storage
    pub storage: StorageKind,
    pub data_dir: String,
    pub redis_url: String,

    // Misc
    pub user_agent: String,
}

/// Read `key` and parse it, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env_or("PORT", 3001),

            // Ingestion
            playlist_url: env::var("PLAYLIST_URL")
                .unwrap_or_else(|_| "https://iptv-org.github.io/iptv/index.m3u".to_string()),
            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", 30_000),
            max_retries: env_or("MAX_RETRIES", 2),
            max_playlist_size_mb: env_or("MAX_PLAYLIST_SIZE_MB", 100),
            playlist_cache_ttl_ms: env_or("PLAYLIST_CACHE_TTL_MS", 6 * 60 * 60 * 1000), // 6 hours
            id_scheme: env_or("ID_SCHEME", IdScheme::Legacy32),

            // Health
            health_ttl_ms: env_or("HEALTH_TTL_MS", 2 * 60 * 60 * 1000), // 2 hours
            probe_timeout_ms: env_or("PROBE_TIMEOUT_MS", 5_000),
            probe_range_bytes: env_or("PROBE_RANGE_BYTES", 1024),
            health_batch_size: env_or("HEALTH_BATCH_SIZE", 10usize).max(1),
            health_batch_delay_ms: env_or("HEALTH_BATCH_DELAY_MS", 200),
            health_policy: env_or("HEALTH_POLICY", HealthPolicy::Optimistic),
            auto_health_check: env_or("AUTO_HEALTH_CHECK", true),

            // Storage
            storage: env_or("STORAGE_BACKEND", StorageKind::File),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| ".reettv-data".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            // Misc - Use VLC user agent to avoid IPTV server blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
