use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::{Client, Proxy, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::{app_state::AppError, rate_limit::SlidingWindow};

const MAX_ATTEMPTS: u32 = 5;

/// Shared HTTP plumbing for every debrid provider: one connection pool, the
/// two process-wide sliding windows, retry with backoff on 429/5xx, and the
/// optional outbound proxy.
#[derive(Debug)]
pub struct DebridHttp {
    client: Client,
    global_window: SlidingWindow,
    torrents_window: SlidingWindow,
}

impl DebridHttp {
    pub fn new(proxy_url: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(60));
        if let Some(proxy_url) = proxy_url {
            builder = builder.proxy(Proxy::all(proxy_url).context("invalid proxy url")?);
        }
        Ok(Self {
            client: builder.build().context("build debrid http client")?,
            global_window: SlidingWindow::per_minute_250(),
            torrents_window: SlidingWindow::per_second_1(),
        })
    }

    /// Request builders for provider modules. All requests built here share
    /// the pool and the proxy.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn json<T>(&self, request: RequestBuilder) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_with_retries(request).await?;
        let url = response.url().to_string();
        response.json().await.map_err(|e| {
            tracing::error!(url, "Failed to deserialize debrid response: {e}");
            AppError::internal_error("failed to deserialize debrid response")
        })
    }

    pub async fn bytes(&self, request: RequestBuilder) -> Result<Bytes, AppError> {
        let response = self.send_with_retries(request).await?;
        Ok(response.bytes().await?)
    }

    /// Sends with the provider budget applied: both windows are honoured
    /// (`torrents` subpaths take the strict one), 429 and 5xx retry with
    /// exponential backoff, other 4xx fail immediately.
    async fn send_with_retries(&self, request: RequestBuilder) -> Result<Response, AppError> {
        let Some(probe) = request.try_clone() else {
            // Streaming bodies (multipart uploads) cannot be replayed.
            return self.send_once(request).await;
        };
        let probe = probe.build().map_err(anyhow::Error::from)?;
        let is_torrents_path = probe.url().path().contains("torrent");

        let mut last_error: Option<AppError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            let Some(attempt_request) = request.try_clone() else {
                return Err(AppError::internal_error("debrid request is not retryable"));
            };
            self.global_window.acquire().await;
            if is_torrents_path {
                self.torrents_window.acquire().await;
            }
            match attempt_request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let wait = Duration::from_secs(1 + 2u64.pow(attempt));
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            "Debrid request throttled, backing off {wait:?}"
                        );
                        last_error = Some(AppError::unavailable(format!(
                            "debrid responded with {status}"
                        )));
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(AppError::internal_error(format!(
                        "debrid responded with {status}"
                    )));
                }
                Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                    let wait = Duration::from_secs(1 + 2u64.pow(attempt));
                    tracing::warn!(attempt, "Debrid request failed ({e}), retrying in {wait:?}");
                    last_error = Some(e.into());
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error.unwrap_or_else(|| AppError::unavailable("debrid retries exhausted")))
    }

    async fn send_once(&self, request: RequestBuilder) -> Result<Response, AppError> {
        self.global_window.acquire().await;
        self.torrents_window.acquire().await;
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(AppError::internal_error(format!(
            "debrid responded with {status}"
        )))
    }

    /// Downloads a `.torrent` body for re-upload to a provider.
    pub async fn download_torrent_file(&self, url: &str) -> Result<Bytes, AppError> {
        self.bytes(self.client.get(url)).await
    }
}
