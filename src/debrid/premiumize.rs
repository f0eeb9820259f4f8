use std::net::IpAddr;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    torrent_item::{ProviderTag, StreamQuery},
};

use super::{AvailabilityResponse, DebridHttp, DebridProvider};

const BASE_URL: &str = "https://www.premiumize.me/api";

/// Availability-only provider: the cache check endpoint answers with a
/// positional boolean list. Playback resolution is not offered.
#[derive(Debug)]
pub struct Premiumize {
    http: &'static DebridHttp,
    api_key: String,
}

impl Premiumize {
    pub fn new(http: &'static DebridHttp, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl DebridProvider for Premiumize {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Premiumize
    }

    async fn bulk_availability(
        &self,
        hashes: &[String],
        _ip: Option<IpAddr>,
    ) -> Result<AvailabilityResponse, AppError> {
        if hashes.is_empty() {
            return Ok(AvailabilityResponse::Premiumize {
                hashes: Vec::new(),
                cached: Vec::new(),
            });
        }
        let mut pairs: Vec<(&str, &str)> = hashes
            .iter()
            .map(|hash| ("items[]", hash.as_str()))
            .collect();
        pairs.push(("apikey", self.api_key.as_str()));
        let response: PmCacheResponse = self
            .http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/cache/check"))
                    .query(&pairs),
            )
            .await?;
        if response.status != "success" {
            return Err(AppError::internal_error(format!(
                "Premiumize cache check failed with status {}",
                response.status
            )));
        }
        Ok(AvailabilityResponse::Premiumize {
            hashes: hashes.to_vec(),
            cached: response.response,
        })
    }

    async fn add_magnet_or_torrent_and_select(
        &self,
        _query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<(), AppError> {
        Err(AppError::bad_request(
            "Premiumize does not support download pre-caching here",
        ))
    }

    async fn get_stream_link(
        &self,
        _query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<String, AppError> {
        Err(AppError::bad_request(
            "Premiumize playback resolution is not supported",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PmCacheResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    response: Vec<bool>,
}
