use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::{
    app_state::AppError,
    media::{Media, MediaKind},
    metadata::LimitedRequestClient,
    torrent_item::{Privacy, TorrentItem},
};

use super::{IndexerAdapter, lenient_u32, lenient_u64};

/// Private trackers whose rows must never be pushed back into the shared
/// public cache, even when a source mislabels their privacy.
const EXCLUDED_TRACKERS: &[&str] = &[
    "AlphaRatio", "AnimeBytes", "AnimeTorrents", "BeyondHD", "BIT-HDTV", "Bibliotik", "Blutopia",
    "BroadcasTheNet", "BTNext", "CHDBits", "Cinemageddon", "DanishBytes", "Demonoid", "DigitalCore",
    "Empornium", "FileList", "FunFile", "Fuzer", "GazelleGames", "HD-Olimpo", "HD-Only", "HD-Space",
    "HD-Torrents", "HDBits", "Hebits", "IPTorrents", "JPopsuki", "Karagarga", "M-Team - TP",
    "MyAnonamouse", "nCore", "Nebulance", "NorBits", "Orpheus", "PassThePopcorn", "PornoLab",
    "PreToMe", "PrivateHD", "Redacted", "RevolutionTT", "RuTracker", "SceneTime", "Sharewood",
    "Sharewood API", "SpeedApp", "Superbits", "TorrentDay", "TorrentLeech", "TorrentSeeds",
    "ToTheGlory", "UHDBits", "YGGtorrent", "Zamunda.net",
];

/// Community cache of already-resolved public torrents. Rows come back with
/// a magnet and a hash, so they skip the `.torrent` fetch entirely.
#[derive(Debug)]
pub struct PublicCacheApi {
    http: Client,
    client: LimitedRequestClient,
    base_url: Url,
}

impl PublicCacheApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = Client::new();
        let client = LimitedRequestClient::new(http.clone(), 10, Duration::from_secs(1));
        Ok(Self {
            http,
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    async fn get_results(&self, media: &Media) -> Result<Vec<CachedRow>, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("getResult")
            .push(&media.kind.to_string())
            .push("");
        let request = self
            .http
            .get(url)
            .json(&CacheSearchPayload::from_media(media))
            .build()
            .map_err(anyhow::Error::from)?;
        self.client.request(request).await
    }

    /// Best-effort write-back of public results. Errors are logged, never
    /// surfaced; the search result does not depend on it.
    pub async fn push_results(&self, items: &[TorrentItem], media: &Media) {
        let rows: Vec<CachePushRow> = items
            .iter()
            .filter(|item| item.privacy == Privacy::Public)
            .filter(|item| !EXCLUDED_TRACKERS.contains(&item.indexer.as_str()))
            .filter_map(|item| CachePushRow::from_item(item, media))
            .collect();
        if rows.is_empty() {
            return;
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .unwrap()
            .push("pushResult")
            .push(&media.kind.to_string());
        let count = rows.len();
        let request = match self.http.post(url).json(&rows).build() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Failed to build public cache push request: {e}");
                return;
            }
        };
        match self.client.request_raw(request).await {
            Ok(_) => tracing::info!("Pushed {count} public results to the community cache"),
            Err(e) => tracing::error!("Public cache push failed: {e}"),
        }
    }
}

pub struct PublicCacheAdapter {
    pub api: &'static PublicCacheApi,
}

#[async_trait]
impl IndexerAdapter for PublicCacheAdapter {
    fn name(&self) -> &'static str {
        "Public Cache"
    }

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError> {
        let rows = self.api.get_results(media).await?;
        let items = rows
            .into_iter()
            .filter(|row| row.hash.len() == 40 && !row.title.is_empty())
            .map(|row| {
                let mut item = TorrentItem::new(
                    row.title,
                    row.size,
                    Some(row.hash),
                    Some(row.magnet.clone()),
                    row.seeders,
                    self.name().to_string(),
                    media.kind,
                    Privacy::Public,
                );
                item.magnet = Some(row.magnet);
                if !row.language.is_empty() {
                    item.languages = row
                        .language
                        .split(';')
                        .map(str::to_string)
                        .filter(|l| !l.is_empty())
                        .collect();
                }
                item
            })
            .collect();
        Ok(items)
    }
}

#[derive(Debug, Serialize)]
struct CacheSearchPayload {
    title: String,
    language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode: Option<String>,
}

impl CacheSearchPayload {
    fn from_media(media: &Media) -> Self {
        Self {
            title: media.primary_title().to_string(),
            language: media.primary_language().to_string(),
            year: media.year.clone(),
            season: media.season.clone(),
            episode: media.episode.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CachedRow {
    title: String,
    magnet: String,
    #[serde(default)]
    hash: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    seeders: u32,
    #[serde(default, deserialize_with = "lenient_u64")]
    size: u64,
    #[serde(default)]
    language: String,
}

#[derive(Debug, Serialize)]
struct CachePushRow {
    title: String,
    magnet: String,
    hash: String,
    indexer: String,
    quality: String,
    #[serde(rename = "qualitySpec")]
    quality_spec: String,
    seeders: u32,
    size: u64,
    language: String,
    #[serde(rename = "type")]
    kind: String,
    availability: bool,
    trackers: String,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seasonfile: Option<bool>,
}

impl CachePushRow {
    fn from_item(item: &TorrentItem, media: &Media) -> Option<Self> {
        let hash = item.info_hash.clone()?;
        let magnet = item.magnet.clone()?;
        Some(Self {
            title: item.raw_title.clone(),
            magnet,
            hash,
            indexer: item.indexer.clone(),
            quality: item
                .parsed_data
                .resolution
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            quality_spec: item.parsed_data.quality.clone().unwrap_or_default(),
            seeders: item.seeders,
            size: item.size,
            language: item.languages.join(";"),
            kind: media.kind.to_string(),
            availability: false,
            trackers: item.trackers.join("tracker:"),
            files: Vec::new(),
            year: match media.kind {
                MediaKind::Movie => media.year.clone(),
                MediaKind::Series => None,
            },
            season: media.season.clone(),
            episode: media.episode.clone(),
            seasonfile: matches!(media.kind, MediaKind::Series).then_some(false),
        })
    }
}
