use std::{collections::HashMap, net::IpAddr, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::Settings,
    media::MediaKind,
    parser,
    torrent_item::{ProviderTag, StreamQuery},
    user_config::UserConfig,
};

use super::{AvailabilityResponse, DebridHttp, DebridProvider, ensure_proxied};

const BASE_URL: &str = "https://api.torbox.app/v1/api";
/// The availability endpoint rejects oversized hash batches.
const AVAILABILITY_CHUNK: usize = 50;
const READY_WAIT: Duration = Duration::from_secs(60);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const READY_STATES: &[&str] = &["uploading", "completed", "cached"];

#[derive(Debug)]
pub struct Torbox {
    http: &'static DebridHttp,
    token: String,
    no_cache_video_url: String,
}

impl Torbox {
    pub fn new(
        settings: &'static Settings,
        http: &'static DebridHttp,
        config: &UserConfig,
    ) -> Result<Self, AppError> {
        let token = match &settings.tb_unique_token {
            Some(token) => {
                ensure_proxied(settings, "Torbox")?;
                token.clone()
            }
            None => config
                .tb_token
                .clone()
                .ok_or_else(|| AppError::unauthorized("Torbox token is missing"))?,
        };
        Ok(Self {
            http,
            token,
            no_cache_video_url: settings.no_cache_video_url.clone(),
        })
    }

    async fn my_torrents(&self) -> Result<Vec<TbTorrent>, AppError> {
        let response: TbResponse<Vec<TbTorrent>> = self
            .http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/torrents/mylist"))
                    .bearer_auth(&self.token),
            )
            .await?;
        Ok(response.data.unwrap_or_default())
    }

    async fn torrent_by_id(&self, torrent_id: u64) -> Result<Option<TbTorrent>, AppError> {
        let response: TbResponse<TbTorrent> = self
            .http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/torrents/mylist"))
                    .query(&[("id", torrent_id.to_string())])
                    .bearer_auth(&self.token),
            )
            .await?;
        Ok(response.data)
    }

    async fn create_torrent(&self, query: &StreamQuery) -> Result<TbTorrent, AppError> {
        let response: TbResponse<TbTorrent> = match &query.torrent_download {
            Some(torrent_url) => {
                tracing::info!("Torbox: uploading torrent file");
                let body = self.http.download_torrent_file(torrent_url).await?;
                let part = reqwest::multipart::Part::bytes(body.to_vec())
                    .file_name(format!("{}.torrent", uuid::Uuid::new_v4()))
                    .mime_str("application/x-bittorrent")
                    .map_err(anyhow::Error::from)?;
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("seed", "1")
                    .text("allow_zip", "true");
                self.http
                    .json(
                        self.http
                            .client()
                            .post(format!("{BASE_URL}/torrents/createtorrent"))
                            .bearer_auth(&self.token)
                            .multipart(form),
                    )
                    .await?
            }
            None => {
                let magnet = query
                    .magnet
                    .as_deref()
                    .ok_or_else(|| AppError::bad_request("query carries no magnet"))?;
                tracing::info!("Torbox: adding magnet");
                self.http
                    .json(
                        self.http
                            .client()
                            .post(format!("{BASE_URL}/torrents/createtorrent"))
                            .bearer_auth(&self.token)
                            .form(&[("magnet", magnet), ("seed", "1"), ("allow_zip", "true")]),
                    )
                    .await?
            }
        };
        response
            .data
            .ok_or_else(|| AppError::internal_error("Torbox did not register the torrent"))
    }

    async fn find_existing(&self, info_hash: &str) -> Result<Option<TbTorrent>, AppError> {
        Ok(self
            .my_torrents()
            .await?
            .into_iter()
            .find(|torrent| torrent.hash.eq_ignore_ascii_case(info_hash)))
    }

    async fn wait_until_ready(&self, torrent_id: u64) -> Result<Option<TbTorrent>, AppError> {
        let deadline = tokio::time::Instant::now() + READY_WAIT;
        loop {
            if let Some(torrent) = self.torrent_by_id(torrent_id).await? {
                if READY_STATES.contains(&torrent.download_state.as_str()) {
                    return Ok(Some(torrent));
                }
                tracing::debug!(state = torrent.download_state, "Torbox: torrent not ready");
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn select_file(torrent: &TbTorrent, query: &StreamQuery) -> Option<u64> {
        if let Some(file_index) = query.file_index {
            return Some(file_index as u64);
        }
        match query.kind {
            MediaKind::Movie => torrent
                .files
                .iter()
                .max_by_key(|file| file.size)
                .map(|file| file.id),
            MediaKind::Series => {
                let (season, episode) = (query.season_number()?, query.episode_number()?);
                torrent
                    .files
                    .iter()
                    .filter(|file| {
                        parser::is_video_file(&file.name)
                            && parser::season_episode_in_filename(&file.name, season, episode)
                    })
                    .max_by_key(|file| file.size)
                    .map(|file| file.id)
            }
        }
    }

    async fn request_download_link(
        &self,
        torrent_id: u64,
        file_id: u64,
    ) -> Result<Option<String>, AppError> {
        let response: TbResponse<String> = self
            .http
            .json(
                self.http
                    .client()
                    .get(format!("{BASE_URL}/torrents/requestdl"))
                    .query(&[
                        ("torrent_id", torrent_id.to_string()),
                        ("file_id", file_id.to_string()),
                        ("zip_link", "false".to_string()),
                    ])
                    .bearer_auth(&self.token),
            )
            .await?;
        Ok(response.data)
    }
}

#[async_trait]
impl DebridProvider for Torbox {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Torbox
    }

    async fn bulk_availability(
        &self,
        hashes: &[String],
        _ip: Option<IpAddr>,
    ) -> Result<AvailabilityResponse, AppError> {
        let mut entries: HashMap<String, TbCachedEntry> = HashMap::new();
        for chunk in hashes.chunks(AVAILABILITY_CHUNK) {
            let response: TbResponse<HashMap<String, TbCachedEntry>> = self
                .http
                .json(
                    self.http
                        .client()
                        .get(format!("{BASE_URL}/torrents/checkcached"))
                        .query(&[
                            ("hash", chunk.join(",")),
                            ("format", "object".to_string()),
                            ("list_files", "true".to_string()),
                        ])
                        .bearer_auth(&self.token),
                )
                .await?;
            for (hash, entry) in response.data.unwrap_or_default() {
                entries.insert(hash.to_lowercase(), entry);
            }
        }
        Ok(AvailabilityResponse::Torbox(entries))
    }

    async fn add_magnet_or_torrent_and_select(
        &self,
        query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<(), AppError> {
        // Torbox downloads the whole torrent; nothing to select.
        self.create_torrent(query).await.map(|_| ())
    }

    async fn get_stream_link(
        &self,
        query: &StreamQuery,
        _ip: Option<IpAddr>,
    ) -> Result<String, AppError> {
        let info_hash = query
            .info_hash()
            .ok_or_else(|| AppError::bad_request("query magnet carries no infohash"))?;
        tracing::info!(info_hash, "Torbox: resolving stream link");

        let torrent = match self.find_existing(&info_hash).await? {
            Some(torrent) => {
                tracing::info!(torrent_id = torrent.id, "Torbox: reusing existing torrent");
                torrent
            }
            None => self.create_torrent(query).await?,
        };

        let Some(ready) = self.wait_until_ready(torrent.id).await? else {
            tracing::warn!("Torbox: torrent not ready, caching in progress");
            return Ok(self.no_cache_video_url.clone());
        };

        let Some(file_id) = Self::select_file(&ready, query) else {
            tracing::warn!("Torbox: no matching file in the torrent");
            return Ok(self.no_cache_video_url.clone());
        };

        match self.request_download_link(ready.id, file_id).await? {
            Some(link) => Ok(link),
            None => {
                tracing::error!("Torbox: download link request returned nothing");
                Ok(self.no_cache_video_url.clone())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TbResponse<T> {
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TbTorrent {
    pub id: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub download_state: String,
    #[serde(default)]
    pub files: Vec<TbTorrentFile>,
}

#[derive(Debug, Deserialize)]
pub struct TbTorrentFile {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// One hash's entry in the cached-check manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct TbCachedEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub files: Vec<TbCachedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TbCachedFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_config::ServiceTag;

    fn torrent(files: &[(u64, &str, u64)]) -> TbTorrent {
        TbTorrent {
            id: 9,
            hash: "a".repeat(40),
            download_state: "completed".to_string(),
            files: files
                .iter()
                .map(|(id, name, size)| TbTorrentFile {
                    id: *id,
                    name: name.to_string(),
                    size: *size,
                })
                .collect(),
        }
    }

    #[test]
    fn selects_largest_matching_episode_file() {
        let torrent = torrent(&[
            (1, "Show.S02E03.480p.mkv", 100),
            (2, "Show.S02E03.1080p.mkv", 900),
            (3, "Show.S02E04.1080p.mkv", 950),
        ]);
        let query = StreamQuery {
            magnet: None,
            kind: MediaKind::Series,
            file_index: None,
            season: Some("S02".to_string()),
            episode: Some("E03".to_string()),
            torrent_download: None,
            service: ServiceTag::Tb,
        };
        assert_eq!(Torbox::select_file(&torrent, &query), Some(2));
    }

    #[test]
    fn explicit_file_index_wins() {
        let torrent = torrent(&[(1, "Movie.mkv", 100)]);
        let query = StreamQuery {
            magnet: None,
            kind: MediaKind::Movie,
            file_index: Some(7),
            season: None,
            episode: None,
            torrent_download: None,
            service: ServiceTag::Tb,
        };
        assert_eq!(Torbox::select_file(&torrent, &query), Some(7));
    }
}
