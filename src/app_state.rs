use std::{error::Error, fmt::Display, sync::Arc};

use axum::{Json, http::StatusCode, response::IntoResponse};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    db::Db,
    debrid::DebridHttp,
    indexers::IndexerClients,
    kv::KvCache,
    metadata::MetadataProvidersStack,
    torrent_processor::TorrentProcessor,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: &'static Settings,
    pub db: Db,
    pub kv: KvCache,
    pub providers_stack: &'static MetadataProvidersStack,
    pub indexer_clients: &'static IndexerClients,
    pub debrid_http: &'static DebridHttp,
    pub torrent_processor: Arc<TorrentProcessor>,
    /// Client used only for proxied playback traffic. May be routed through
    /// an outbound proxy while the rest of the process talks directly.
    pub playback_client: reqwest::Client,
    pub cancellation_token: CancellationToken,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AppError {
    pub message: String,
    #[serde(skip)]
    pub kind: AppErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    ServiceUnavailable,
    InternalError,
}

impl Error for AppError {}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AppErrorKind::BadRequest => write!(f, "Bad Request: {}", self.message),
            AppErrorKind::Unauthorized => write!(f, "Unauthorized: {}", self.message),
            AppErrorKind::NotFound => write!(f, "Not Found: {}", self.message),
            AppErrorKind::ServiceUnavailable => {
                write!(f, "Service Unavailable: {}", self.message)
            }
            AppErrorKind::InternalError => write!(f, "Internal Error: {}", self.message),
        }
    }
}

impl From<AppErrorKind> for StatusCode {
    fn from(val: AppErrorKind) -> Self {
        match val {
            AppErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            AppErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            AppErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::RowNotFound => AppError {
                message: "Database row not found".to_string(),
                kind: AppErrorKind::NotFound,
            },
            rest => AppError {
                message: rest.to_string(),
                kind: AppErrorKind::InternalError,
            },
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError {
            message: value.to_string(),
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError {
            message: value.to_string(),
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(value: redis::RedisError) -> Self {
        AppError {
            message: value.to_string(),
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError {
            message: value.to_string(),
            kind: AppErrorKind::BadRequest,
        }
    }
}

impl AppError {
    pub fn new(message: impl AsRef<str>, kind: AppErrorKind) -> Self {
        Self {
            message: message.as_ref().into(),
            kind,
        }
    }

    pub fn bad_request(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::BadRequest)
    }

    pub fn unauthorized(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::Unauthorized)
    }

    pub fn not_found(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::NotFound)
    }

    pub fn unavailable(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::ServiceUnavailable)
    }

    pub fn internal_error(msg: impl AsRef<str>) -> AppError {
        Self::new(msg, AppErrorKind::InternalError)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status: StatusCode = self.kind.clone().into();
        (status, Json(self)).into_response()
    }
}
