mod config;
mod models;
mod routes;
mod services;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, StorageKind};
use crate::models::{Channel, ChannelSource, HealthCheckResponse};
use crate::services::{
    cache::PlaylistCache,
    clock::{Clock, SystemClock},
    health_checker::HealthChecker,
    health_store::HealthStore,
    ingest::Ingestor,
    m3u_parser::M3UParser,
    metrics,
    prober::{HttpProber, Prober},
    redis::RedisBackend,
    storage::{FileBackend, KvBackend, MemoryBackend},
    user_data::UserDataService,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn KvBackend>,
    pub ingestor: Ingestor,
    pub health_checker: Arc<HealthChecker>,
    pub user_data: UserDataService,
    /// Latest loaded channel list
    pub channels: RwLock<Vec<Channel>>,
    /// Healthy ids reported by the latest batch of the current run
    pub healthy_ids: Mutex<HashSet<String>>,
    /// Run id and stop token of the active health run
    pub health_run: Mutex<Option<(String, CancellationToken)>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
        prober: Arc<dyn Prober>,
    ) -> anyhow::Result<Self> {
        let parser = M3UParser::new(
            &config.user_agent,
            config.fetch_timeout_ms,
            config.max_retries,
            config.max_playlist_size_mb,
            config.id_scheme,
        )?;
        let cache = PlaylistCache::new(backend.clone(), clock.clone(), config.playlist_cache_ttl_ms);
        let ingestor = Ingestor::new(parser, cache, config.playlist_url.clone());

        let store = HealthStore::new(
            backend.clone(),
            clock.clone(),
            config.health_ttl_ms,
            config.health_policy,
        );
        let health_checker = Arc::new(HealthChecker::new(
            store,
            prober,
            Duration::from_millis(config.health_batch_delay_ms),
        ));
        let user_data = UserDataService::new(backend.clone(), clock);

        Ok(Self {
            config,
            backend,
            ingestor,
            health_checker,
            user_data,
            channels: RwLock::new(Vec::new()),
            healthy_ids: Mutex::new(HashSet::new()),
            health_run: Mutex::new(None),
            start_time: Instant::now(),
        })
    }

    /// Load channels through the ingestor and remember them
    pub async fn load_channels(&self, force_refresh: bool) -> (Vec<Channel>, ChannelSource) {
        let (channels, source) = self.ingestor.load(force_refresh).await;
        *self.channels.write().await = channels.clone();
        (channels, source)
    }

    /// Start a background health run over the current channel list.
    ///
    /// A run that is still going is asked to stop first.
    pub async fn start_health_run(self: &Arc<Self>, batch_size: usize) -> HealthCheckResponse {
        let channels = self.channels.read().await.clone();
        let run_id = uuid::Uuid::new_v4().to_string();
        let stop = CancellationToken::new();

        let previous = self
            .health_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((run_id.clone(), stop.clone()));
        if let Some((previous_id, previous_stop)) = previous {
            tracing::info!(run_id = %previous_id, "Superseding health run");
            previous_stop.cancel();
        }

        metrics::record_health_run();
        let response = HealthCheckResponse {
            run_id: run_id.clone(),
            channels: channels.len(),
            batch_size,
        };

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let checker = Arc::clone(&state.health_checker);
            checker
                .run(
                    &run_id,
                    &channels,
                    |ids| {
                        // A stopped or superseded run no longer owns the snapshot
                        let slot = state.health_run.lock().unwrap_or_else(PoisonError::into_inner);
                        if slot.as_ref().is_some_and(|(id, _)| *id == run_id) {
                            *state.healthy_ids.lock().unwrap_or_else(PoisonError::into_inner) =
                                ids.clone();
                        }
                    },
                    batch_size,
                    &stop,
                )
                .await;

            let mut slot = state.health_run.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|(id, _)| *id == run_id) {
                *slot = None;
            }
        });

        response
    }

    /// Ask the active run to stop after its current batch
    pub fn stop_health_run(&self) -> Option<String> {
        let active = self
            .health_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        active.map(|(run_id, stop)| {
            stop.cancel();
            tracing::info!(run_id = %run_id, "Health run stop requested");
            run_id
        })
    }

    pub fn active_run(&self) -> Option<String> {
        self.health_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(id, _)| id.clone())
    }
}

async fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn KvBackend>> {
    let backend: Arc<dyn KvBackend> = match config.storage {
        StorageKind::File => Arc::new(FileBackend::new(&config.data_dir).await?),
        StorageKind::Redis => Arc::new(RedisBackend::new(&config.redis_url).await?),
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reettv_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting ReetTV Server v{}", env!("CARGO_PKG_VERSION"));

    let backend = build_backend(&config).await?;
    tracing::info!("Storage backend: {}", backend.name());

    let prober = HttpProber::new(
        &config.user_agent,
        config.probe_timeout_ms,
        config.probe_range_bytes,
    )?;

    let state = Arc::new(AppState::new(
        config,
        backend,
        Arc::new(SystemClock),
        Arc::new(prober),
    )?);

    // Warm the channel list before accepting requests
    let (channels, source) = state.load_channels(false).await;
    tracing::info!("Loaded {} channels ({})", channels.len(), source);

    if state.config.auto_health_check {
        let started = state.start_health_run(state.config.health_batch_size).await;
        tracing::info!(run_id = %started.run_id, "Startup health run started");
    }

    let app = routes::build_router(state)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
