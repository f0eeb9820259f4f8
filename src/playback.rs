use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    app_state::{AppError, AppState},
    debrid::get_debrid_service,
    kv::{DOWNLOAD_IN_PROGRESS, cache_key},
    torrent_item::StreamQuery,
    user_config::{ServiceTag, UserConfig, decode_b64},
};

const LOCK_LEASE: Duration = Duration::from_secs(60);
const LINK_TTL: Duration = Duration::from_secs(3600);
const DOWNLOAD_MARKER_TTL: Duration = Duration::from_secs(600);
const CACHE_POLL_ATTEMPTS: u32 = 30;
const CACHE_POLL_INTERVAL: Duration = Duration::from_secs(1);

const PROXY_BUFFER_SIZE: usize = 2 * 1024 * 1024;
const PROXY_CHUNK_SIZE: usize = 8 * 1024;
const PROXY_MAX_RETRIES: u32 = 3;

struct PlaybackRequest {
    config: UserConfig,
    query: StreamQuery,
    /// Decoded query JSON, part of every cache key so distinct selections
    /// never collide.
    query_json: String,
    client_ip: String,
}

impl PlaybackRequest {
    async fn parse(
        state: &AppState,
        config_b64: &str,
        query_b64: &str,
        addr: &SocketAddr,
    ) -> Result<Self, AppError> {
        let config = UserConfig::parse(config_b64)?;
        state.db.check_key(&config.api_key).await?;
        if query_b64.is_empty() {
            return Err(AppError::bad_request("query required"));
        }
        let query_json = String::from_utf8(decode_b64(query_b64)?)
            .map_err(|_| AppError::bad_request("query is not valid utf-8"))?;
        let query: StreamQuery = serde_json::from_str(&query_json)?;
        Ok(Self {
            config,
            query,
            query_json,
            client_ip: addr.ip().to_string(),
        })
    }

    fn link_key(&self) -> String {
        cache_key(
            "stream_link",
            &[&self.config.api_key, &self.query_json, &self.client_ip],
        )
    }

    fn lock_key(&self) -> String {
        cache_key(
            "stream_link_lock",
            &[&self.config.api_key, &self.query_json, &self.client_ip],
        )
    }
}

/// `GET /playback/{config}/{query}`: resolve the selection to a direct URL
/// and either redirect the player or proxy the bytes.
pub async fn get_playback(
    State(state): State<AppState>,
    Path((config_b64, query_b64)): Path<(String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request = PlaybackRequest::parse(&state, &config_b64, &query_b64, &addr).await?;

    if request.query.service == ServiceTag::Download {
        return start_background_download(&state, &request).await;
    }

    let link = resolve_stream_link(&state, &request).await?;
    if link == state.settings.no_cache_video_url {
        // Not cached yet; the stub keeps the player happy while HEAD polls.
        return Ok(Redirect::temporary(&link).into_response());
    }
    if !state.settings.proxied_link {
        return Ok(moved_permanently(&link)?);
    }
    proxy_response(&state, &link, &headers).await
}

/// `HEAD /playback/{config}/{query}`: readiness probe. 200 once a link is
/// cached, 202 while a download or resolution is still in flight.
pub async fn head_playback(
    State(state): State<AppState>,
    Path((config_b64, query_b64)): Path<(String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, AppError> {
    let request = PlaybackRequest::parse(&state, &config_b64, &query_b64, &addr).await?;
    let link_key = request.link_key();

    if request.query.service == ServiceTag::Download {
        if let Some(value) = state.kv.get_string(&link_key).await {
            if value == DOWNLOAD_IN_PROGRESS {
                return Ok(StatusCode::ACCEPTED.into_response());
            }
        }
    }

    for attempt in 0..CACHE_POLL_ATTEMPTS {
        if let Some(link) = cached_link(&state, &link_key).await {
            return head_ok(&state, &link).await;
        }
        if attempt + 1 < CACHE_POLL_ATTEMPTS {
            tokio::time::sleep(CACHE_POLL_INTERVAL).await;
        }
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Direct-link mode hands the provider URL to the player with a plain 301.
fn moved_permanently(link: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(link)
        .map_err(|_| AppError::internal_error("resolved link is not a valid header value"))?;
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location);
    Ok((StatusCode::MOVED_PERMANENTLY, response_headers).into_response())
}

async fn head_ok(state: &AppState, link: &str) -> Result<Response, AppError> {
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if state.settings.proxied_link {
        // The proxy serves the bytes; forward the length it would serve.
        if let Ok(upstream) = state.playback_client.head(link).send().await {
            if let Some(length) = upstream.headers().get(header::CONTENT_LENGTH) {
                response_headers.insert(header::CONTENT_LENGTH, length.clone());
            }
        }
    }
    Ok((StatusCode::OK, response_headers).into_response())
}

/// The `service = "DL"` path: mark the query as downloading, kick the debrid
/// off in the background, and point the player at the stub video.
async fn start_background_download(
    state: &AppState,
    request: &PlaybackRequest,
) -> Result<Response, AppError> {
    let link_key = request.link_key();
    state
        .kv
        .set_string(&link_key, DOWNLOAD_IN_PROGRESS, Some(DOWNLOAD_MARKER_TTL))
        .await;

    let provider = get_debrid_service(
        state.settings,
        state.debrid_http,
        &state.kv,
        &request.config,
        ServiceTag::Download,
    )?;
    let query = request.query.clone();
    let client_ip = request.client_ip.parse().ok();
    tokio::spawn(async move {
        if let Err(e) = provider
            .add_magnet_or_torrent_and_select(&query, client_ip)
            .await
        {
            tracing::error!("Background download failed to start: {e}");
        }
    });

    tracing::info!("Download started, redirecting to the caching stub");
    Ok(Redirect::temporary(&state.settings.no_cache_video_url).into_response())
}

async fn cached_link(state: &AppState, link_key: &str) -> Option<String> {
    state
        .kv
        .get_string(link_key)
        .await
        .filter(|value| !value.is_empty() && value != DOWNLOAD_IN_PROGRESS)
}

/// Single-flight link resolution: the lock holder asks the debrid, everyone
/// else polls the cache for the holder's answer.
async fn resolve_stream_link(
    state: &AppState,
    request: &PlaybackRequest,
) -> Result<String, AppError> {
    let link_key = request.link_key();
    if let Some(link) = cached_link(state, &link_key).await {
        tracing::info!("Stream link served from cache");
        return Ok(link);
    }

    match state.kv.lock(&request.lock_key(), LOCK_LEASE).await? {
        Some(lock) => {
            let result = resolve_via_provider(state, request, &link_key).await;
            lock.release().await;
            result
        }
        None => {
            // A peer with the same (key, query, ip) is already resolving.
            for _ in 0..CACHE_POLL_ATTEMPTS {
                tokio::time::sleep(CACHE_POLL_INTERVAL).await;
                if let Some(link) = cached_link(state, &link_key).await {
                    tracing::info!("Stream link resolved by a concurrent request");
                    return Ok(link);
                }
            }
            Err(AppError::unavailable(
                "Stream link is being resolved, try again",
            ))
        }
    }
}

async fn resolve_via_provider(
    state: &AppState,
    request: &PlaybackRequest,
    link_key: &str,
) -> Result<String, AppError> {
    // Covers the window between the first cache check and the lock grant.
    if let Some(link) = cached_link(state, link_key).await {
        return Ok(link);
    }
    let provider = get_debrid_service(
        state.settings,
        state.debrid_http,
        &state.kv,
        &request.config,
        request.query.service,
    )?;
    let client_ip = request.client_ip.parse().ok();
    let link = provider.get_stream_link(&request.query, client_ip).await?;
    if link != state.settings.no_cache_video_url {
        state
            .kv
            .set_string(link_key, &link, Some(LINK_TTL))
            .await;
        tracing::info!("Stream link resolved and cached");
    }
    Ok(link)
}

/// Builds the streaming response: an upstream HEAD fills in the status and
/// headers, then the body streams through the buffer.
async fn proxy_response(
    state: &AppState,
    link: &str,
    request_headers: &HeaderMap,
) -> Result<Response, AppError> {
    let range = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut probe = state.playback_client.head(link);
    if let Some(range) = &range {
        probe = probe.header(header::RANGE, range.as_str());
    }
    let upstream = probe.send().await?;

    let status = if upstream.status() == StatusCode::PARTIAL_CONTENT {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    if status == StatusCode::PARTIAL_CONTENT {
        if let Some(content_range) = upstream.headers().get(header::CONTENT_RANGE) {
            response_headers.insert(header::CONTENT_RANGE, content_range.clone());
        }
    }
    if let Some(length) = upstream.headers().get(header::CONTENT_LENGTH) {
        response_headers.insert(header::CONTENT_LENGTH, length.clone());
    }

    let body = proxy_body(state.playback_client.clone(), link.to_string(), range);
    Ok((status, response_headers, body).into_response())
}

fn proxy_body(client: reqwest::Client, url: String, range: Option<String>) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(64);
    tokio::spawn(pump_upstream(client, url, range, tx));
    Body::from_stream(ReceiverStream::new(rx))
}

/// Re-anchors a Range header after `delivered` bytes already reached the
/// client, so a reconnect resumes instead of replaying.
fn advance_range(range: Option<&str>, delivered: u64) -> Option<String> {
    if delivered == 0 {
        return range.map(str::to_string);
    }
    match range.and_then(parse_range_start_end) {
        Some((start, Some(end))) => Some(format!("bytes={}-{end}", start + delivered)),
        Some((start, None)) => Some(format!("bytes={}-", start + delivered)),
        None => Some(format!("bytes={delivered}-")),
    }
}

fn parse_range_start_end(range: &str) -> Option<(u64, Option<u64>)> {
    let spec = range.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = end.parse().ok();
    Some((start, end))
}

/// Streams upstream bytes into the channel: ~2 MiB internal buffer, 8 KiB
/// chunks out. Transient upstream errors reconnect (up to 3 attempts) with
/// exponential backoff, resuming where the client left off. A closed
/// receiver (client disconnect) drops the upstream response immediately.
async fn pump_upstream(
    client: reqwest::Client,
    url: String,
    range: Option<String>,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut delivered: u64 = 0;
    for attempt in 0..PROXY_MAX_RETRIES {
        let mut request = client.get(&url);
        if let Some(range) = advance_range(range.as_deref(), delivered) {
            request = request.header(header::RANGE, range);
        }
        let mut upstream = match request.send().await {
            Ok(upstream) if upstream.status().is_success() => upstream,
            Ok(upstream) => {
                tracing::warn!(status = upstream.status().as_u16(), "Upstream refused the stream");
                break;
            }
            Err(e) => {
                tracing::warn!(attempt, "Upstream connect failed: {e}");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
        };

        let mut buffer = BytesMut::with_capacity(PROXY_BUFFER_SIZE);
        loop {
            match upstream.chunk().await {
                Ok(Some(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    if buffer.len() >= PROXY_BUFFER_SIZE
                        && flush_buffer(&mut buffer, &tx, &mut delivered).await.is_err()
                    {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = flush_buffer(&mut buffer, &tx, &mut delivered).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, "Chunk read failed: {e}");
                    if flush_buffer(&mut buffer, &tx, &mut delivered).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    break;
                }
            }
        }
    }
    let _ = tx
        .send(Err(std::io::Error::other("upstream stream failed")))
        .await;
}

/// Drains the buffer into 8 KiB chunks. Errors mean the client went away.
async fn flush_buffer(
    buffer: &mut BytesMut,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    delivered: &mut u64,
) -> Result<(), ()> {
    while !buffer.is_empty() {
        let take = buffer.len().min(PROXY_CHUNK_SIZE);
        let chunk = buffer.split_to(take).freeze();
        *delivered += chunk.len() as u64;
        if tx.send(Ok(chunk)).await.is_err() {
            tracing::debug!("Client disconnected, releasing upstream");
            return Err(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing_handles_open_and_closed_ranges() {
        assert_eq!(parse_range_start_end("bytes=0-"), Some((0, None)));
        assert_eq!(parse_range_start_end("bytes=100-200"), Some((100, Some(200))));
        assert_eq!(parse_range_start_end("chunks=1-2"), None);
    }

    #[test]
    fn range_is_forwarded_verbatim_until_bytes_flow() {
        assert_eq!(advance_range(Some("bytes=0-"), 0).as_deref(), Some("bytes=0-"));
        assert_eq!(advance_range(None, 0), None);
    }

    #[test]
    fn reconnects_resume_where_the_client_left_off() {
        assert_eq!(
            advance_range(Some("bytes=100-"), 50).as_deref(),
            Some("bytes=150-")
        );
        assert_eq!(
            advance_range(Some("bytes=0-999"), 500).as_deref(),
            Some("bytes=500-999")
        );
        assert_eq!(advance_range(None, 300).as_deref(), Some("bytes=300-"));
    }
}
