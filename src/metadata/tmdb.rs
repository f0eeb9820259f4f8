use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
};

use super::{LimitedRequestClient, MetadataProvider, StreamId};

/// TMDB lookup by IMDb id. Queried once per preferred language so the media
/// carries every localised title; the first language wins the year and the
/// TMDB id that downstream indexers key on.
#[derive(Debug)]
pub struct TmdbApi {
    client: LimitedRequestClient,
    base_url: Url,
}

impl TmdbApi {
    const API_URL: &'static str = "https://api.themoviedb.org/3";
    const RATE_LIMIT: usize = 50;

    pub fn new(api_key: String) -> Self {
        let client = LimitedRequestClient::new(
            Client::new(),
            Self::RATE_LIMIT,
            Duration::from_secs(1),
        );
        let base_url =
            Url::parse_with_params(Self::API_URL, [("api_key", api_key)]).expect("url to parse");
        Self { client, base_url }
    }

    async fn find(&self, imdb_id: &str, language: &str) -> Result<TmdbFindResponse, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("find")
            .push(imdb_id);
        url.query_pairs_mut()
            .append_pair("external_source", "imdb_id")
            .append_pair("language", language);
        self.client.request(Request::new(Method::GET, url)).await
    }
}

#[async_trait]
impl MetadataProvider for TmdbApi {
    fn identifier(&self) -> &'static str {
        "tmdb"
    }

    async fn metadata(
        &self,
        stream_id: &StreamId,
        kind: MediaKind,
        languages: &[String],
    ) -> Result<Media, AppError> {
        let mut titles: Vec<String> = Vec::new();
        let mut tmdb_id = None;
        let mut year = None;

        let fallback = ["en".to_string()];
        let languages: &[String] = if languages.is_empty() {
            &fallback
        } else {
            languages
        };
        for (index, language) in languages.iter().enumerate() {
            let found = match self.find(&stream_id.imdb_id, language).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(language, "TMDB localisation lookup failed: {e}");
                    continue;
                }
            };
            let entry = match kind {
                MediaKind::Movie => found.movie_results.into_iter().next().map(|m| {
                    (m.id, m.title, m.release_date)
                }),
                MediaKind::Series => found.tv_results.into_iter().next().map(|s| {
                    (s.id, s.name, s.first_air_date)
                }),
            };
            let Some((id, title, date)) = entry else {
                continue;
            };
            if index == 0 || tmdb_id.is_none() {
                tmdb_id = Some(id);
                year = date
                    .as_deref()
                    .map(|d| d.chars().take(4).collect::<String>())
                    .filter(|y| !y.is_empty());
            }
            let title = clean_title(&title);
            if !titles.iter().any(|t| t.eq_ignore_ascii_case(&title)) {
                titles.push(title);
            }
        }

        if titles.is_empty() {
            return Err(AppError::not_found(format!(
                "TMDB has no {kind} for {}",
                stream_id.imdb_id
            )));
        }

        Ok(Media {
            kind,
            imdb_id: stream_id.imdb_id.clone(),
            tmdb_id,
            titles,
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

/// Strips characters that never survive into release names so the title
/// comparison downstream works on common ground.
fn clean_title(title: &str) -> String {
    let filtered: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\u{2122}' | '\u{ae}'
            | '\u{a9}' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    movie_results: Vec<TmdbMovieResult>,
    #[serde(default)]
    tv_results: Vec<TmdbTvResult>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieResult {
    id: u64,
    title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbTvResult {
    id: u64,
    name: String,
    first_air_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::clean_title;

    #[test]
    fn cleans_titles_like_release_names() {
        assert_eq!(clean_title("Mission: Impossible"), "Mission Impossible");
        assert_eq!(clean_title("WALL·E"), "WALL·E");
        assert_eq!(clean_title("What/If"), "What If");
    }
}
