use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
    metadata::LimitedRequestClient,
    torrent_item::{Privacy, TorrentItem},
};

use super::{IndexerAdapter, apply_seeder_cutoff, lenient_u32, lenient_u64};

/// TMDB-id keyed tracker front. Only usable when the request resolved its
/// metadata through TMDB, since the endpoints are `/movie/{tmdb_id}/…`.
#[derive(Debug)]
pub struct YggflixApi {
    client: LimitedRequestClient,
    base_url: Url,
}

impl YggflixApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = LimitedRequestClient::new(Client::new(), 10, Duration::from_secs(1));
        let mut base_url = Url::parse(base_url)?;
        base_url.path_segments_mut().unwrap().push("api");
        Ok(Self { client, base_url })
    }

    pub async fn movie_torrents(&self, tmdb_id: u64) -> Result<Vec<YggflixRow>, AppError> {
        self.torrents("movie", tmdb_id).await
    }

    pub async fn tvshow_torrents(&self, tmdb_id: u64) -> Result<Vec<YggflixRow>, AppError> {
        self.torrents("tvshow", tmdb_id).await
    }

    async fn torrents(&self, segment: &str, tmdb_id: u64) -> Result<Vec<YggflixRow>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push(segment)
            .push(&tmdb_id.to_string())
            .push("torrents");
        self.client.request(Request::new(Method::GET, url)).await
    }

    /// `.torrent` download URL for a result row. The body itself is fetched
    /// by the torrent post-processor under its Yggflix policy.
    pub fn download_url(&self, torrent_id: u64) -> String {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("torrent")
            .push(&torrent_id.to_string())
            .push("download");
        url.to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct YggflixRow {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub seeders: u32,
}

pub struct YggflixAdapter {
    pub api: &'static YggflixApi,
    pub min_seeders: u32,
}

#[async_trait]
impl IndexerAdapter for YggflixAdapter {
    fn name(&self) -> &'static str {
        "Yggflix"
    }

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError> {
        let Some(tmdb_id) = media.tmdb_id else {
            tracing::warn!("Yggflix search needs TMDB metadata, skipping");
            return Ok(Vec::new());
        };
        let rows = match media.kind {
            MediaKind::Movie => self.api.movie_torrents(tmdb_id).await?,
            MediaKind::Series => self.api.tvshow_torrents(tmdb_id).await?,
        };
        let items = rows
            .into_iter()
            .filter(|row| !row.title.is_empty())
            .map(|row| {
                TorrentItem::new(
                    row.title,
                    row.size,
                    None,
                    Some(self.api.download_url(row.id)),
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
