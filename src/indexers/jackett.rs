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

const MOVIE_CATEGORY: &str = "2000";
const TV_CATEGORY: &str = "5000";

/// Jackett aggregates many heterogenous indexers behind one Torznab-style
/// endpoint; result rows carry whichever of magnet/link/hash the upstream
/// indexer knows.
#[derive(Debug)]
pub struct JackettApi {
    client: LimitedRequestClient,
    base_url: Url,
    api_key: String,
}

impl JackettApi {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let client = LimitedRequestClient::new(Client::new(), 5, Duration::from_secs(1));
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            api_key,
        })
    }

    pub async fn search(&self, query: &str, kind: MediaKind) -> Result<Vec<JackettRow>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("api")
            .push("v2.0")
            .push("indexers")
            .push("all")
            .push("results");
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("Query", query)
            .append_pair(
                "Category[]",
                match kind {
                    MediaKind::Movie => MOVIE_CATEGORY,
                    MediaKind::Series => TV_CATEGORY,
                },
            );
        let response: JackettResponse =
            self.client.request(Request::new(Method::GET, url)).await?;
        Ok(response.results)
    }
}

#[derive(Debug, Deserialize)]
struct JackettResponse {
    #[serde(rename = "Results", default)]
    results: Vec<JackettRow>,
}

#[derive(Debug, Deserialize)]
pub struct JackettRow {
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Size", default, deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(rename = "Seeders", default, deserialize_with = "lenient_u32")]
    pub seeders: u32,
    #[serde(rename = "MagnetUri", default)]
    pub magnet_uri: Option<String>,
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
    #[serde(rename = "InfoHash", default)]
    pub info_hash: Option<String>,
    #[serde(rename = "Tracker", default)]
    pub tracker: String,
    #[serde(rename = "TrackerType", default)]
    pub tracker_type: String,
}

pub struct JackettAdapter {
    pub api: &'static JackettApi,
    pub min_seeders: u32,
}

impl JackettAdapter {
    fn query_for(&self, media: &Media) -> String {
        let title = media.primary_title();
        match media.kind {
            MediaKind::Movie => match &media.year {
                Some(year) => format!("{title} {year}"),
                None => title.to_string(),
            },
            MediaKind::Series => match (&media.season, &media.episode) {
                (Some(season), Some(episode)) => format!("{title} {season}{episode}"),
                _ => title.to_string(),
            },
        }
    }
}

#[async_trait]
impl IndexerAdapter for JackettAdapter {
    fn name(&self) -> &'static str {
        "Jackett"
    }

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError> {
        let rows = self.api.search(&self.query_for(media), media.kind).await?;
        let items = rows
            .into_iter()
            .filter(|row| !row.title.is_empty())
            .filter_map(|row| {
                // A row is only usable with a fetchable link or a magnet.
                let link = row.magnet_uri.clone().or(row.link.clone())?;
                let privacy = if row.tracker_type.eq_ignore_ascii_case("private") {
                    Privacy::Private
                } else {
                    Privacy::Public
                };
                let mut item = TorrentItem::new(
                    row.title,
                    row.size,
                    row.info_hash.filter(|h| h.len() == 40),
                    Some(link),
                    row.seeders,
                    if row.tracker.is_empty() {
                        self.name().to_string()
                    } else {
                        row.tracker
                    },
                    media.kind,
                    privacy,
                );
                item.magnet = row.magnet_uri;
                Some(item)
            })
            .collect();
        Ok(apply_seeder_cutoff(items, self.min_seeders))
    }
}
