use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    media::Media,
    metadata::LimitedRequestClient,
    torrent_item::{Privacy, TorrentItem},
};

use super::{IndexerAdapter, apply_seeder_cutoff, lenient_u32, lenient_u64};

const VIDEO_CATEGORY: u32 = 1;

/// Passkey-scoped tracker API, hard limited to one request per second per
/// deployment.
#[derive(Debug)]
pub struct SharewoodApi {
    client: LimitedRequestClient,
    base_url: Url,
}

impl SharewoodApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = LimitedRequestClient::new(Client::new(), 1, Duration::from_secs(1));
        let mut base_url = Url::parse(base_url)?;
        base_url.path_segments_mut().unwrap().push("api");
        Ok(Self { client, base_url })
    }

    pub async fn search(&self, passkey: &str, query: &str) -> Result<Vec<SharewoodRow>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().unwrap().push(passkey).push("search");
        url.query_pairs_mut()
            .append_pair("name", query)
            .append_pair("category", &VIDEO_CATEGORY.to_string());
        self.client.request(Request::new(Method::GET, url)).await
    }

    pub fn download_url(&self, passkey: &str, torrent_id: u64) -> String {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push(passkey)
            .push(&torrent_id.to_string())
            .push("download");
        url.to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct SharewoodRow {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub seeders: u32,
}

pub struct SharewoodAdapter {
    pub api: &'static SharewoodApi,
    pub passkey: String,
    pub min_seeders: u32,
}

impl SharewoodAdapter {
    pub fn new(
        api: &'static SharewoodApi,
        passkey: String,
        min_seeders: u32,
    ) -> Result<Self, AppError> {
        if passkey.len() != 32 {
            return Err(AppError::bad_request(
                "Sharewood passkey must be 32 characters long",
            ));
        }
        Ok(Self {
            api,
            passkey,
            min_seeders,
        })
    }
}

#[async_trait]
impl IndexerAdapter for SharewoodAdapter {
    fn name(&self) -> &'static str {
        "Sharewood"
    }

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError> {
        let rows = self.api.search(&self.passkey, media.primary_title()).await?;
        let items = rows
            .into_iter()
            .filter(|row| !row.name.is_empty())
            .map(|row| {
                TorrentItem::new(
                    row.name,
                    row.size,
                    None,
                    Some(self.api.download_url(&self.passkey, row.id)),
                    row.seeders,
                    self.name().to_string(),
                    media.kind,
                    Privacy::Private,
                )
            })
            .collect();
        Ok(apply_seeder_cutoff(items, self.min_seeders))
    }
}
