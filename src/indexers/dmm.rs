use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
    metadata::LimitedRequestClient,
    torrent_item::{Privacy, TorrentItem},
};

use super::{IndexerAdapter, lenient_u64};

/// Words that add nothing to an indexed-corpus keyword query.
const STOP_WORDS: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "du", "de", "au", "aux", "the", "a", "an", "some",
    "of", "to", "at", "in", "on", "for", "il", "elle", "nous", "vous", "ils", "elles", "je", "tu",
];

/// Debrid-media-manager indexed corpus (a Zilean deployment). Two query
/// modes: free-text keyword search and a filtered lookup by IMDb id.
#[derive(Debug)]
pub struct DmmApi {
    http: Client,
    client: LimitedRequestClient,
    base_url: Url,
}

impl DmmApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = Client::new();
        let client = LimitedRequestClient::new(http.clone(), 10, Duration::from_secs(1));
        Ok(Self {
            http,
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    pub async fn keyword_search(&self, query: &str) -> Result<Vec<DmmEntry>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().unwrap().push("dmm").push("search");
        let request = self
            .http
            .post(url)
            .json(&DmmQueryRequest {
                query_text: query.to_string(),
            })
            .build()
            .map_err(anyhow::Error::from)?;
        self.client.request(request).await
    }

    pub async fn filtered_search(&self, filter: &DmmFilter<'_>) -> Result<Vec<DmmEntry>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().unwrap().push("dmm").push("filtered");
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(query) = filter.query {
                pairs.append_pair("Query", query);
            }
            if let Some(season) = filter.season {
                pairs.append_pair("Season", &season.to_string());
            }
            if let Some(episode) = filter.episode {
                pairs.append_pair("Episode", &episode.to_string());
            }
            if let Some(year) = filter.year {
                pairs.append_pair("Year", year);
            }
            if let Some(language) = filter.language {
                pairs.append_pair("Language", language);
            }
            if let Some(resolution) = filter.resolution {
                pairs.append_pair("Resolution", resolution);
            }
            if let Some(imdb_id) = filter.imdb_id {
                pairs.append_pair("ImdbId", imdb_id);
            }
        }
        let request = self
            .http
            .get(url)
            .build()
            .map_err(anyhow::Error::from)?;
        self.client.request(request).await
    }
}

#[derive(Debug, Serialize)]
struct DmmQueryRequest {
    #[serde(rename = "queryText")]
    query_text: String,
}

#[derive(Debug, Default)]
pub struct DmmFilter<'a> {
    pub query: Option<&'a str>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<&'a str>,
    pub language: Option<&'a str>,
    pub resolution: Option<&'a str>,
    pub imdb_id: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmmEntry {
    #[serde(default)]
    pub info_hash: Option<String>,
    #[serde(default)]
    pub raw_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
}

pub struct DmmAdapter {
    pub api: &'static DmmApi,
    /// Width of the inner keyword fan-out.
    pub pool_width: usize,
}

impl DmmAdapter {
    fn queries_for(&self, media: &Media) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queries = Vec::new();
        for title in &media.titles {
            let cleaned = clean_query(title);
            if cleaned.is_empty() || !seen.insert(cleaned.to_lowercase()) {
                continue;
            }
            queries.push(cleaned);
        }
        if media.kind == MediaKind::Series {
            if let (Some(season), Some(episode)) = (&media.season, &media.episode) {
                for query in queries.clone() {
                    queries.push(format!("{query} {season}{episode}"));
                }
            }
        }
        queries
    }
}

#[async_trait]
impl IndexerAdapter for DmmAdapter {
    fn name(&self) -> &'static str {
        "DMM"
    }

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError> {
        let mut join_set: JoinSet<Vec<DmmEntry>> = JoinSet::new();
        let slots = Arc::new(Semaphore::new(self.pool_width.max(1)));

        for query in self.queries_for(media) {
            let api = self.api;
            let slots = slots.clone();
            join_set.spawn(async move {
                let _permit = slots.acquire().await.expect("semaphore never closes");
                match api.keyword_search(&query).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(query, "DMM keyword search failed: {e}");
                        Vec::new()
                    }
                }
            });
        }
        {
            let api = self.api;
            let imdb_id = media.imdb_id.clone();
            let season = media.season_number();
            let episode = media.episode_number();
            let year = media.year.clone();
            join_set.spawn(async move {
                let filter = DmmFilter {
                    imdb_id: Some(&imdb_id),
                    season,
                    episode,
                    year: year.as_deref(),
                    ..Default::default()
                };
                match api.filtered_search(&filter).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!("DMM filtered search failed: {e}");
                        Vec::new()
                    }
                }
            });
        }

        let mut seen_hashes = HashSet::new();
        let mut items = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let entries = match joined {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("DMM search task panicked: {e}");
                    continue;
                }
            };
            for entry in entries {
                let Some(hash) = entry.info_hash.as_deref().map(str::to_lowercase) else {
                    continue;
                };
                if hash.len() != 40 || !seen_hashes.insert(hash.clone()) {
                    continue;
                }
                let Some(raw_title) = entry.raw_title.filter(|t| !t.is_empty()) else {
                    continue;
                };
                let magnet =
                    torrent::MagnetLink::new(hash.clone(), Some(raw_title.clone()), []).to_string();
                let mut item = TorrentItem::new(
                    raw_title,
                    entry.size,
                    Some(hash),
                    Some(magnet.clone()),
                    // The corpus is an index of debrid caches, not a live
                    // tracker scrape; it carries no seeder counts.
                    0,
                    self.name().to_string(),
                    media.kind,
                    Privacy::Public,
                );
                item.magnet = Some(magnet);
                items.push(item);
            }
        }
        Ok(items)
    }
}

/// Normalises a title into corpus keywords: punctuation goes, stop words and
/// articles go, whitespace collapses.
fn clean_query(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_cleaning_strips_stop_words_and_punctuation() {
        assert_eq!(clean_query("The Lord of the Rings"), "lord rings");
        assert_eq!(clean_query("Amélie: le fabuleux destin"), "amélie fabuleux destin");
        assert_eq!(clean_query("..."), "");
    }
}
