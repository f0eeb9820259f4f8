use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

/// Stub video served while a debrid download is still warming up. The player
/// keeps polling HEAD and switches to the real file once it is cached.
pub const NO_CACHE_VIDEO_URL: &str =
    "https://github.com/aymene69/stremio-jackett/raw/main/source/videos/nocache.mp4";

#[derive(Debug, Parser)]
#[command(name = "stream-relay")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Sqlite database location
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Redis connection url
    #[arg(long)]
    pub redis_url: Option<String>,
    /// Log level (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Process-level settings. Read once at startup from environment variables
/// (with CLI overrides) and injected through [crate::app_state::AppState];
/// tests construct their own instance.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub database_path: PathBuf,
    pub redis_url: String,

    pub public_cache_url: Option<String>,
    pub dmm_url: Option<String>,
    pub yggflix_url: Option<String>,
    pub sharewood_url: Option<String>,
    pub jackett_url: Option<String>,
    pub jackett_api_key: Option<String>,
    pub tmdb_api_key: Option<String>,

    /// Outbound proxy for playback traffic only (http/https/socks5/socks5h/socks4).
    pub playback_proxy_url: Option<String>,
    /// When set, resolved links are streamed through this process instead of
    /// redirecting the player to the provider URL.
    pub proxied_link: bool,

    /// Shared "unique account" tokens. When one of these is set, every user
    /// of this deployment goes through the same provider account and the
    /// playback proxy must be on.
    pub rd_unique_token: Option<String>,
    pub ad_unique_token: Option<String>,
    pub tb_unique_token: Option<String>,
    /// Premiumize only joins the availability sweep; it has no playback path.
    pub pm_api_key: Option<String>,

    /// Provider used for `service = "DL"` pre-caching requests.
    pub download_service: crate::user_config::ServiceTag,
    pub no_cache_video_url: String,

    /// Results below this seeder count are dropped by the indexer adapters.
    pub min_seeders: u32,
    /// Width of per-adapter inner fan-outs.
    pub worker_pool_width: usize,
    /// TTL of the per-user filtered stream cache.
    pub stream_cache_ttl: Duration,
    /// TTL of the shareable unfiltered search cache.
    pub search_cache_ttl: Duration,
}

impl Settings {
    pub fn from_env(args: &Args) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let port = args
            .port
            .or_else(|| env("PORT").and_then(|p| p.parse().ok()))
            .unwrap_or(8080);
        let database_path = args
            .database
            .clone()
            .or_else(|| env("DATABASE_PATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("stream-relay.sqlite"));
        let redis_url = args
            .redis_url
            .clone()
            .or_else(|| env("REDIS_URL"))
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let rd_unique_token = env("RD_TOKEN");
        let ad_unique_token = env("AD_TOKEN");
        let tb_unique_token = env("TB_TOKEN");
        // A shared provider account without the proxy would leak one user's
        // account to every player; force the safe default on.
        let proxied_link = env("PROXIED_LINK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(
                rd_unique_token.is_some()
                    || ad_unique_token.is_some()
                    || tb_unique_token.is_some(),
            );

        let download_service = env("DOWNLOAD_SERVICE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::user_config::ServiceTag::Tb);

        Self {
            port,
            database_path,
            redis_url,
            public_cache_url: env("PUBLIC_CACHE_URL"),
            dmm_url: env("ZILEAN_URL"),
            yggflix_url: env("YGGFLIX_URL"),
            sharewood_url: env("SHAREWOOD_URL"),
            jackett_url: env("JACKETT_URL"),
            jackett_api_key: env("JACKETT_API_KEY"),
            tmdb_api_key: env("TMDB_API_KEY"),
            playback_proxy_url: env("PLAYBACK_PROXY_URL"),
            proxied_link,
            rd_unique_token,
            ad_unique_token,
            tb_unique_token,
            pm_api_key: env("PM_API_KEY"),
            download_service,
            no_cache_video_url: env("NO_CACHE_VIDEO_URL")
                .unwrap_or_else(|| NO_CACHE_VIDEO_URL.to_string()),
            min_seeders: env("MIN_SEEDERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            worker_pool_width: env("WORKER_POOL_WIDTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            stream_cache_ttl: Duration::from_secs(
                env("STREAM_CACHE_TTL")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1200),
            ),
            search_cache_ttl: Duration::from_secs(
                env("SEARCH_CACHE_TTL")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(86400),
            ),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[cfg(test)]
impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: PathBuf::from(":memory:"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            public_cache_url: None,
            dmm_url: None,
            yggflix_url: None,
            sharewood_url: None,
            jackett_url: None,
            jackett_api_key: None,
            tmdb_api_key: None,
            playback_proxy_url: None,
            proxied_link: true,
            rd_unique_token: None,
            ad_unique_token: None,
            tb_unique_token: None,
            pm_api_key: None,
            download_service: crate::user_config::ServiceTag::Tb,
            no_cache_video_url: NO_CACHE_VIDEO_URL.to_string(),
            min_seeders: 5,
            worker_pool_width: 4,
            stream_cache_ttl: Duration::from_secs(1200),
            search_cache_ttl: Duration::from_secs(86400),
        }
    }
}
