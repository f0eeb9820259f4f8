use std::{net::SocketAddr, str::FromStr};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    app_state::{AppError, AppState},
    media::MediaKind,
    playback,
    search,
    streams::SearchResponse,
    user_config::UserConfig,
};

/// `GET /{config}/stream/{stream_type}/{stream_id}`: the player's stream
/// list for one movie or episode.
pub async fn stream_search(
    State(state): State<AppState>,
    Path((config_b64, stream_type, stream_id)): Path<(String, String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<SearchResponse>, AppError> {
    let started = std::time::Instant::now();
    let config = UserConfig::parse(&config_b64)?;
    let kind = MediaKind::from_str(&stream_type)
        .map_err(|_| AppError::bad_request(format!("unknown stream type: {stream_type}")))?;
    let streams = search::search(&state, &config, kind, &stream_id, Some(addr.ip())).await?;
    tracing::info!(took = ?started.elapsed(), "Search request completed");
    Ok(Json(SearchResponse { streams }))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/{config}/stream/{stream_type}/{stream_id}",
            get(stream_search),
        )
        .route(
            "/playback/{config}/{query}",
            get(playback::get_playback).head(playback::head_playback),
        )
        .layer(cors)
        .with_state(state)
}
