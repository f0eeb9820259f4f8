use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
};

use super::{LimitedRequestClient, MetadataProvider, StreamId};

/// Public catalogue every player install can reach. Serves one localisation,
/// so the media carries a single title.
#[derive(Debug)]
pub struct CinemetaApi {
    client: LimitedRequestClient,
    base_url: Url,
}

impl Default for CinemetaApi {
    fn default() -> Self {
        Self::new()
    }
}

impl CinemetaApi {
    pub fn new() -> Self {
        let client = LimitedRequestClient::new(Client::new(), 20, Duration::from_secs(1));
        let base_url = Url::parse("https://v3-cinemeta.strem.io").unwrap();
        Self { client, base_url }
    }

    async fn meta(&self, kind: MediaKind, imdb_id: &str) -> Result<CinemetaMeta, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("meta")
            .push(&kind.to_string())
            .push(&format!("{imdb_id}.json"));
        let response: CinemetaResponse = self.client.request(Request::new(Method::GET, url)).await?;
        Ok(response.meta)
    }
}

#[async_trait]
impl MetadataProvider for CinemetaApi {
    fn identifier(&self) -> &'static str {
        "cinemeta"
    }

    async fn metadata(
        &self,
        stream_id: &StreamId,
        kind: MediaKind,
        languages: &[String],
    ) -> Result<Media, AppError> {
        let meta = self.meta(kind, &stream_id.imdb_id).await?;
        let year = meta
            .year
            .as_deref()
            .map(|year| year.chars().take(4).collect::<String>())
            .filter(|year| !year.is_empty());
        Ok(Media {
            kind,
            imdb_id: stream_id.imdb_id.clone(),
            tmdb_id: None,
            titles: vec![meta.name],
            year: match kind {
                MediaKind::Movie => year,
                MediaKind::Series => None,
            },
            season: stream_id.season.map(Media::season_tag),
            episode: stream_id.episode.map(Media::episode_tag),
            languages: languages.to_vec(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CinemetaResponse {
    meta: CinemetaMeta,
}

#[derive(Debug, Deserialize)]
struct CinemetaMeta {
    name: String,
    /// `"2010"` for movies, `"2008-2013"` for shows.
    year: Option<String>,
}
