use async_trait::async_trait;

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
    user_config::MetadataProviderKind,
};

pub mod cinemeta;
pub mod request_client;
pub mod tmdb;

pub use request_client::LimitedRequestClient;

/// Identifier the player hands us: `tt1375666` for a movie,
/// `tt0903747:3:7` for a series episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamId {
    pub imdb_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl StreamId {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim_end_matches(".json");
        let mut parts = raw.split(':');
        let imdb_id = parts
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::bad_request("empty stream id"))?
            .to_string();
        let season = parts.next().and_then(|s| s.parse().ok());
        let episode = parts.next().and_then(|e| e.parse().ok());
        Ok(Self {
            imdb_id,
            season,
            episode,
        })
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn identifier(&self) -> &'static str;

    async fn metadata(
        &self,
        stream_id: &StreamId,
        kind: MediaKind,
        languages: &[String],
    ) -> Result<Media, AppError>;
}

/// The configured metadata providers. TMDB is optional (needs an API key);
/// Cinemeta always works and is the fallback.
#[derive(Debug, Default)]
pub struct MetadataProvidersStack {
    cinemeta: Option<cinemeta::CinemetaApi>,
    tmdb: Option<tmdb::TmdbApi>,
}

impl MetadataProvidersStack {
    pub fn new(cinemeta: cinemeta::CinemetaApi, tmdb: Option<tmdb::TmdbApi>) -> Self {
        Self {
            cinemeta: Some(cinemeta),
            tmdb,
        }
    }

    pub fn provider(
        &self,
        kind: MetadataProviderKind,
    ) -> Result<&(dyn MetadataProvider), AppError> {
        match kind {
            MetadataProviderKind::Tmdb => {
                if let Some(tmdb) = &self.tmdb {
                    return Ok(tmdb);
                }
                tracing::warn!("TMDB metadata requested but no api key is configured");
                self.cinemeta_provider()
            }
            MetadataProviderKind::Cinemeta => self.cinemeta_provider(),
        }
    }

    fn cinemeta_provider(&self) -> Result<&(dyn MetadataProvider), AppError> {
        self.cinemeta
            .as_ref()
            .map(|c| c as &dyn MetadataProvider)
            .ok_or_else(|| AppError::internal_error("no metadata provider configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movie_and_series_stream_ids() {
        let movie = StreamId::parse("tt1375666.json").unwrap();
        assert_eq!(movie.imdb_id, "tt1375666");
        assert_eq!(movie.season, None);

        let episode = StreamId::parse("tt0903747:3:7").unwrap();
        assert_eq!(episode.imdb_id, "tt0903747");
        assert_eq!(episode.season, Some(3));
        assert_eq!(episode.episode, Some(7));
    }

    #[test]
    fn rejects_empty_stream_id() {
        assert!(StreamId::parse("").is_err());
    }
}
