use std::{sync::Arc, time::Duration};

use anyhow::Context;
use reqwest::{Client, Request, Response};
use serde::de::DeserializeOwned;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::app_state::AppError;

/// One queued request with the channel its caller is waiting on.
#[derive(Debug)]
struct QueuedRequest {
    request: Request,
    respond_to: oneshot::Sender<reqwest::Result<Response>>,
    /// Dropped callers flip this token so their request never leaves the
    /// queue. Axum drops handler futures on client disconnect, and a request
    /// nobody is waiting for should not spend a rate-limit slot.
    cancellation_token: CancellationToken,
}

/// Rate limited HTTP client. `limit` requests may be in flight per `period`;
/// clones share the same limit.
#[derive(Debug, Clone)]
pub struct LimitedRequestClient {
    queue_tx: mpsc::Sender<QueuedRequest>,
}

impl LimitedRequestClient {
    pub fn new(client: Client, limit: usize, period: Duration) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::channel::<QueuedRequest>(100);
        tokio::spawn(async move {
            let slots = Arc::new(Semaphore::new(limit));
            while let Some(queued) = queue_rx.recv().await {
                let slots = slots.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    let QueuedRequest {
                        request,
                        respond_to,
                        cancellation_token,
                    } = queued;
                    let permit = tokio::select! {
                        biased;
                        _ = cancellation_token.cancelled() => return,
                        permit = slots.acquire() => permit.expect("semaphore never closes"),
                    };
                    tokio::select! {
                        response = client.execute(request) => {
                            if respond_to.send(response).is_err() {
                                tracing::trace!("Request caller went away before the response");
                            }
                        }
                        _ = cancellation_token.cancelled() => {}
                    }
                    // Hold the slot for the rest of the period so the limit
                    // is a true requests-per-window bound.
                    tokio::time::sleep(period).await;
                    drop(permit);
                });
            }
        });
        Self { queue_tx }
    }

    pub async fn request<T>(&self, request: Request) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let url = request.url().to_string();
        let response = self.request_raw(request).await?;
        match response.json().await {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                tracing::error!(url, "Failed to deserialize response body: {e}");
                Err(AppError::internal_error(
                    "failed to deserialize response json body",
                ))
            }
        }
    }

    pub async fn request_raw(&self, request: Request) -> Result<Response, AppError> {
        let (respond_to, response_rx) = oneshot::channel();
        let cancellation_token = CancellationToken::new();
        let _guard = cancellation_token.clone().drop_guard();
        let url = request.url().to_string();
        self.queue_tx
            .send(QueuedRequest {
                request,
                respond_to,
                cancellation_token,
            })
            .await
            .context("request queue is closed")?;
        let response = response_rx
            .await
            .map_err(|_| anyhow::anyhow!("request worker dropped the response"))?
            .map_err(|e| {
                tracing::error!("Request to {url} failed: {e}");
                anyhow::anyhow!("request failed: {e}")
            })?;
        tracing::trace!(status = response.status().as_u16(), url, "Upstream response");
        match response.status().as_u16() {
            200..=299 => Ok(response),
            404 => Err(AppError::not_found("upstream responded with 404")),
            status => Err(anyhow::anyhow!("upstream responded with status {status}").into()),
        }
    }
}
