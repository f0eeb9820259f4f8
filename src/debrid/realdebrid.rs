use std::{collections::HashMap, net::IpAddr, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::Settings,
    kv::KvCache,
    parser,
    torrent_item::{ProviderTag, StreamQuery},
    user_config::UserConfig,
};

use super::{
    AvailabilityResponse, DebridHttp, DebridProvider, ensure_proxied,
    token_manager::RdTokenManager,
};

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";
const LINK_WAIT: Duration = Duration::from_secs(20);
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(5);
const UNRESTRICT_ATTEMPTS: u32 = 3;
const UNRESTRICT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Torrents with more files than this are treated as season packs.
const SEASON_PACK_THRESHOLD: usize = 5;

#[derive(Debug)]
enum RdAuth {
    /// Deployment-wide shared account token.
    Shared(String),
    /// Per-user oauth credentials refreshed through the KV store.
    Oauth(RdTokenManager),
}

#[derive(Debug)]
pub struct RealDebrid {
    http: &'static DebridHttp,
    auth: RdAuth,
    no_cache_video_url: String,
}

impl RealDebrid {
    pub fn new(
        settings: &'static Settings,
        http: &'static DebridHttp,
        kv: KvCache,
        config: &UserConfig,
    ) -> Result<Self, AppError> {
        let auth = match &settings.rd_unique_token {
            Some(token) => {
                ensure_proxied(settings, "RealDebrid")?;
                RdAuth::Shared(token.clone())
            }
            None => {
                let oauth = config.rd_token.clone().ok_or_else(|| {
                    AppError::unauthorized("RealDebrid oauth credentials are missing")
                })?;
                RdAuth::Oauth(RdTokenManager::new(kv, oauth))
            }
        };
        Ok(Self {
            http,
            auth,
            no_cache_video_url: settings.no_cache_video_url.clone(),
        })
    }

    async fn bearer(&self) -> Result<String, AppError> {
        match &self.auth {
            RdAuth::Shared(token) => Ok(token.clone()),
            RdAuth::Oauth(manager) => manager.access_token().await,
        }
    }

    async fn torrents_list(&self) -> Result<Vec<RdTorrentRow>, AppError> {
        let token = self.bearer().await?;
        self.http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/torrents"))
                    .bearer_auth(token),
            )
            .await
    }

    async fn torrent_info(&self, torrent_id: &str) -> Result<RdTorrentInfo, AppError> {
        let token = self.bearer().await?;
        self.http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/torrents/info/{torrent_id}"))
                    .bearer_auth(token),
            )
            .await
    }

    async fn add_magnet(&self, magnet: &str) -> Result<RdAddResponse, AppError> {
        let token = self.bearer().await?;
        self.http
            .json(
                self.http
                    .client()
                    .post(format!("{BASE_URL}/torrents/addMagnet"))
                    .bearer_auth(token)
                    .form(&[("magnet", magnet)]),
            )
            .await
    }

    async fn add_torrent_file(&self, body: bytes::Bytes) -> Result<RdAddResponse, AppError> {
        let token = self.bearer().await?;
        self.http
            .json(
                self.http
                    .client()
                    .put(format!("{BASE_URL}/torrents/addTorrent"))
                    .bearer_auth(token)
                    .body(body),
            )
            .await
    }

    async fn select_files(&self, torrent_id: &str, file_ids: &str) -> Result<(), AppError> {
        let token = self.bearer().await?;
        let request = self
            .http
            .client()
            .post(format!("{BASE_URL}/torrents/selectFiles/{torrent_id}"))
            .bearer_auth(token)
            .form(&[("files", file_ids)]);
        self.http.bytes(request).await?;
        Ok(())
    }

    async fn unrestrict(&self, link: &str) -> Result<String, AppError> {
        for attempt in 0..UNRESTRICT_ATTEMPTS {
            let token = self.bearer().await?;
            let result: Result<RdUnrestrictResponse, AppError> = self
                .http
                .json(
                    self.http
                        .client()
                        .post(format!("{BASE_URL}/unrestrict/link"))
                        .bearer_auth(token)
                        .form(&[("link", link)]),
                )
                .await;
            match result {
                Ok(response) if !response.download.is_empty() => return Ok(response.download),
                Ok(_) => tracing::warn!("RealDebrid unrestrict returned no download url"),
                Err(e) => tracing::warn!(attempt, "RealDebrid unrestrict failed: {e}"),
            }
            if attempt + 1 < UNRESTRICT_ATTEMPTS {
                tokio::time::sleep(UNRESTRICT_RETRY_DELAY).await;
            }
        }
        Ok(self.no_cache_video_url.clone())
    }

    /// Ids of already-added torrents sharing this infohash.
    async fn cached_torrent_ids(&self, info_hash: &str) -> Result<Vec<String>, AppError> {
        let torrents = self.torrents_list().await?;
        Ok(torrents
            .into_iter()
            .filter(|torrent| torrent.hash.eq_ignore_ascii_case(info_hash))
            .map(|torrent| torrent.id)
            .collect())
    }

    /// Whether an already-added torrent has the file we need selected.
    fn torrent_contains_file(info: &RdTorrentInfo, query: &StreamQuery) -> bool {
        match query.kind {
            crate::media::MediaKind::Movie => info.files.iter().any(|file| file.is_selected()),
            crate::media::MediaKind::Series => {
                if let Some(file_index) = query.file_index {
                    return info
                        .files
                        .iter()
                        .any(|file| file.id as usize == file_index && file.is_selected());
                }
                match (query.season_number(), query.episode_number()) {
                    (Some(season), Some(episode)) => info.files.iter().any(|file| {
                        file.is_selected()
                            && parser::season_episode_in_filename(&file.path, season, episode)
                    }),
                    _ => false,
                }
            }
        }
    }

    async fn find_reusable_torrent(
        &self,
        info_hash: &str,
        query: &StreamQuery,
    ) -> Result<Option<RdTorrentInfo>, AppError> {
        for torrent_id in self.cached_torrent_ids(info_hash).await? {
            let info = self.torrent_info(&torrent_id).await?;
            if Self::torrent_contains_file(&info, query) {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    async fn add_magnet_or_torrent(&self, query: &StreamQuery) -> Result<RdTorrentInfo, AppError> {
        let added = match &query.torrent_download {
            Some(torrent_url) => {
                tracing::info!("RealDebrid: uploading torrent file");
                let body = self.http.download_torrent_file(torrent_url).await?;
                self.add_torrent_file(body).await?
            }
            None => {
                let magnet = query
                    .magnet
                    .as_deref()
                    .ok_or_else(|| AppError::bad_request("query carries no magnet"))?;
                tracing::info!("RealDebrid: adding magnet");
                self.add_magnet(magnet).await?
            }
        };
        self.torrent_info(&added.id).await
    }

    /// Adds and selects files. Season packs (> 5 files) select every video
    /// file so sibling episodes cache along with the requested one.
    async fn add_and_select(&self, query: &StreamQuery) -> Result<String, AppError> {
        let info = self.add_magnet_or_torrent(query).await?;
        let is_season_pack = query.kind == crate::media::MediaKind::Series
            && info.files.len() > SEASON_PACK_THRESHOLD;
        if is_season_pack {
            let video_ids: Vec<String> = info
                .files
                .iter()
                .filter(|file| parser::is_video_file(&file.path))
                .map(|file| file.id.to_string())
                .collect();
            if video_ids.is_empty() {
                tracing::warn!("RealDebrid: season pack has no video files");
            } else {
                tracing::info!(
                    "RealDebrid: selecting {} video files from season pack",
                    video_ids.len()
                );
                self.select_files(&info.id, &video_ids.join(",")).await?;
            }
            return Ok(info.id);
        }

        if let Some(file_index) = query.file_index {
            self.select_files(&info.id, &file_index.to_string()).await?;
            return Ok(info.id);
        }
        let selected = match query.kind {
            crate::media::MediaKind::Movie => {
                info.files.iter().max_by_key(|file| file.bytes).map(|f| f.id)
            }
            crate::media::MediaKind::Series => {
                let (season, episode) = match (query.season_number(), query.episode_number()) {
                    (Some(season), Some(episode)) => (season, episode),
                    _ => return Err(AppError::bad_request("series query without season/episode")),
                };
                info.files
                    .iter()
                    .filter(|file| {
                        parser::season_episode_in_filename(&file.path, season, episode)
                    })
                    .max_by_key(|file| file.bytes)
                    .map(|file| file.id)
            }
        };
        match selected {
            Some(file_id) => {
                self.select_files(&info.id, &file_id.to_string()).await?;
                Ok(info.id)
            }
            None => {
                tracing::warn!("RealDebrid: no matching file inside the torrent");
                Ok(info.id)
            }
        }
    }

    async fn wait_for_links(&self, torrent_id: &str) -> Result<Option<Vec<String>>, AppError> {
        let deadline = tokio::time::Instant::now() + LINK_WAIT;
        loop {
            let info = self.torrent_info(torrent_id).await?;
            if !info.links.is_empty() {
                return Ok(Some(info.links));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
    }

    /// Maps the selected file to its slot in the returned link list; link
    /// ordering follows selected-file ordering. Falls back to the largest
    /// match, then to the first link.
    fn pick_link(info: &RdTorrentInfo, links: &[String], query: &StreamQuery) -> Option<String> {
        if links.len() == 1 {
            return links.first().cloned();
        }
        let mut selected: Vec<&RdTorrentFile> =
            info.files.iter().filter(|file| file.is_selected()).collect();
        if selected.is_empty() {
            selected = info.files.iter().max_by_key(|file| file.bytes).into_iter().collect();
        }
        let slot = if let Some(file_index) = query.file_index {
            selected
                .iter()
                .position(|file| file.id as usize == file_index)
        } else if let (Some(season), Some(episode)) =
            (query.season_number(), query.episode_number())
        {
            selected
                .iter()
                .enumerate()
                .filter(|(_, file)| {
                    parser::season_episode_in_filename(&file.path, season, episode)
                })
                .max_by_key(|(_, file)| file.bytes)
                .map(|(slot, _)| slot)
        } else {
            selected
                .iter()
                .enumerate()
                .max_by_key(|(_, file)| file.bytes)
                .map(|(slot, _)| slot)
        };
        match slot {
            Some(slot) if slot < links.len() => links.get(slot).cloned(),
            _ => {
                tracing::warn!("RealDebrid: no link slot matched, using the first link");
                links.first().cloned()
            }
        }
    }
}

#[async_trait]
impl DebridProvider for RealDebrid {
    fn tag(&self) -> ProviderTag {
        ProviderTag::RealDebrid
    }

    async fn bulk_availability(
        &self,
        hashes: &[String],
        _ip: Option<IpAddr>,
    ) -> Result<AvailabilityResponse, AppError> {
        if hashes.is_empty() {
            return Ok(AvailabilityResponse::RealDebrid(HashMap::new()));
        }
        let token = self.bearer().await?;
        let url = format!(
            "{BASE_URL}/torrents/instantAvailability/{}",
            hashes.join("/")
        );
        let raw: HashMap<String, serde_json::Value> = self
            .http
            .json(self.http.client().get(url).bearer_auth(token))
            .await?;
        // Hashes with no cache data come back as empty arrays instead of
        // objects; parse tolerantly per entry.
        let mut entries = HashMap::new();
        for (hash, value) in raw {
            match serde_json::from_value::<RdHashEntry>(value) {
                Ok(entry) if !entry.rd.is_empty() => {
                    entries.insert(hash.to_lowercase(), entry);
                }
                _ => {}
            }
        }
        Ok(AvailabilityResponse::RealDebrid(entries))
    }

    async fn add_magnet_or_torrent_and_select(
        &self,
        query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<(), AppError> {
        self.add_and_select(query).await.map(|_| ())
    }

    async fn get_stream_link(
        &self,
        query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<String, AppError> {
        let info_hash = query
            .info_hash()
            .ok_or_else(|| AppError::bad_request("query magnet carries no infohash"))?;
        tracing::info!(info_hash, "RealDebrid: resolving stream link");

        let torrent_id = match self.find_reusable_torrent(&info_hash, query).await? {
            Some(info) => {
                tracing::info!(torrent_id = info.id, "RealDebrid: reusing cached torrent");
                info.id
            }
            None => self.add_and_select(query).await?,
        };

        let Some(links) = self.wait_for_links(&torrent_id).await? else {
            tracing::warn!("RealDebrid: links not ready, returning the caching stub");
            return Ok(self.no_cache_video_url.clone());
        };
        let info = self.torrent_info(&torrent_id).await?;
        let link = Self::pick_link(&info, &links, query)
            .ok_or_else(|| AppError::internal_error("RealDebrid returned no links"))?;
        self.unrestrict(&link).await
    }
}

#[derive(Debug, Deserialize)]
struct RdAddResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RdUnrestrictResponse {
    #[serde(default)]
    download: String,
}

#[derive(Debug, Deserialize)]
struct RdTorrentRow {
    id: String,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentInfo {
    pub id: String,
    #[serde(default)]
    pub files: Vec<RdTorrentFile>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentFile {
    pub id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub selected: u8,
}

impl RdTorrentFile {
    pub fn is_selected(&self) -> bool {
        self.selected == 1
    }
}

/// One hash's entry in the instant-availability manifest: cached variants,
/// each mapping file index to file details.
#[derive(Debug, Clone, Deserialize)]
pub struct RdHashEntry {
    #[serde(default)]
    pub rd: Vec<HashMap<String, RdVariantFile>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdVariantFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::user_config::ServiceTag;

    fn info(files: &[(u64, &str, u64, u8)], links: &[&str]) -> RdTorrentInfo {
        RdTorrentInfo {
            id: "torrent1".to_string(),
            files: files
                .iter()
                .map(|(id, path, bytes, selected)| RdTorrentFile {
                    id: *id,
                    path: path.to_string(),
                    bytes: *bytes,
                    selected: *selected,
                })
                .collect(),
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn series_query() -> StreamQuery {
        StreamQuery {
            magnet: None,
            kind: MediaKind::Series,
            file_index: None,
            season: Some("S03".to_string()),
            episode: Some("E07".to_string()),
            torrent_download: None,
            service: ServiceTag::Rd,
        }
    }

    #[test]
    fn picks_link_for_matching_episode_slot() {
        let info = info(
            &[
                (1, "Show.S03E06.mkv", 700, 1),
                (2, "Show.S03E07.mkv", 800, 1),
                (3, "Show.S03E08.mkv", 900, 1),
            ],
            &["https://rd/link6", "https://rd/link7", "https://rd/link8"],
        );
        let link = RealDebrid::pick_link(&info, &info.links, &series_query()).unwrap();
        assert_eq!(link, "https://rd/link7");
    }

    #[test]
    fn falls_back_to_first_link_when_nothing_matches() {
        let info = info(
            &[(1, "Show.S01E01.mkv", 700, 1)],
            &["https://rd/a", "https://rd/b"],
        );
        let link = RealDebrid::pick_link(&info, &info.links, &series_query()).unwrap();
        assert_eq!(link, "https://rd/a");
    }

    #[test]
    fn selected_file_check_covers_episode_queries() {
        let selected = info(&[(2, "Show.S03E07.mkv", 800, 1)], &[]);
        assert!(RealDebrid::torrent_contains_file(&selected, &series_query()));
        let unselected = info(&[(2, "Show.S03E07.mkv", 800, 0)], &[]);
        assert!(!RealDebrid::torrent_contains_file(
            &unselected,
            &series_query()
        ));
    }
}
