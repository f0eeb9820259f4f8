use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use dotenvy::dotenv;
use stream_relay::app_state::AppState;
use stream_relay::config::{Args, Settings};
use stream_relay::db::Db;
use stream_relay::debrid::DebridHttp;
use stream_relay::indexers::IndexerClients;
use stream_relay::kv::KvCache;
use stream_relay::metadata::{MetadataProvidersStack, cinemeta::CinemetaApi, tmdb::TmdbApi};
use stream_relay::server::app_router;
use stream_relay::torrent_processor::TorrentProcessor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Daily sweep of expired API keys.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(args.log_level.as_deref().unwrap_or("info"))
            }),
        )
        .init();

    if let Ok(path) = dotenv() {
        tracing::info!("Loaded env variables from: {}", path.display());
    }

    let settings: &'static Settings = Box::leak(Box::new(Settings::from_env(&args)));

    let db = match Db::connect(&settings.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database: {e}");
            return;
        }
    };

    let kv = match KvCache::connect(&settings.redis_url).await {
        Ok(kv) => kv,
        Err(e) => {
            tracing::error!("Failed to connect to redis at {}: {e}", settings.redis_url);
            return;
        }
    };

    let tmdb = settings
        .tmdb_api_key
        .clone()
        .map(TmdbApi::new);
    if tmdb.is_none() {
        tracing::warn!("No TMDB api key configured; metadata falls back to Cinemeta");
    }
    let providers_stack: &'static MetadataProvidersStack = Box::leak(Box::new(MetadataProvidersStack::new(
        CinemetaApi::new(),
        tmdb,
    )));

    let indexer_clients: &'static IndexerClients = Box::leak(Box::new(IndexerClients::from_settings(settings)));

    let debrid_http = match DebridHttp::new(settings.playback_proxy_url.as_deref()) {
        Ok(http) => Box::leak(Box::new(http)) as &'static DebridHttp,
        Err(e) => {
            tracing::error!("Failed to build debrid http client: {e}");
            return;
        }
    };

    let playback_client = {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(50);
        if let Some(proxy_url) = &settings.playback_proxy_url {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => {
                    tracing::error!("Invalid playback proxy url: {e}");
                    return;
                }
            }
        }
        builder.build().expect("playback client to build")
    };

    let cancellation_token = CancellationToken::new();
    let app_state = AppState {
        settings,
        db: db.clone(),
        kv,
        providers_stack,
        indexer_clients,
        debrid_http,
        torrent_processor: Arc::new(TorrentProcessor::new(settings.worker_pool_width)),
        playback_client,
        cancellation_token: cancellation_token.clone(),
    };

    {
        let db = db.clone();
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = db.delete_expired_keys().await {
                            tracing::error!("API key maintenance failed: {e}");
                        }
                    }
                    _ = cancellation_token.cancelled() => break,
                }
            }
        });
    }

    let app = app_router(app_state);
    let addr = settings.listen_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {addr}: {e}");
            return;
        }
    };
    tracing::info!("Starting server on port {}", settings.port);

    {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(cancellation_token.cancelled_owned())
            .await
            .unwrap();
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }
    tracing::info!("Gracefully shut down");
}
