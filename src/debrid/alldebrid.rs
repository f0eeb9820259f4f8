use std::{net::IpAddr, time::Duration};

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

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "stream-relay";
const READY_WAIT: Duration = Duration::from_secs(30);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct AllDebrid {
    http: &'static DebridHttp,
    token: String,
    no_cache_video_url: String,
}

impl AllDebrid {
    pub fn new(
        settings: &'static Settings,
        http: &'static DebridHttp,
        config: &UserConfig,
    ) -> Result<Self, AppError> {
        let token = match &settings.ad_unique_token {
            Some(token) => {
                ensure_proxied(settings, "AllDebrid")?;
                token.clone()
            }
            None => config
                .ad_token
                .clone()
                .ok_or_else(|| AppError::unauthorized("AllDebrid token is missing"))?,
        };
        Ok(Self {
            http,
            token,
            no_cache_video_url: settings.no_cache_video_url.clone(),
        })
    }

    fn url(&self, path: &str, ip: Option<IpAddr>) -> String {
        let mut url = format!("{BASE_URL}/{path}?agent={AGENT}");
        if let Some(ip) = ip {
            url.push_str(&format!("&ip={ip}"));
        }
        url
    }

    async fn upload_magnet(&self, magnet: &str, ip: Option<IpAddr>) -> Result<u64, AppError> {
        let response: AdResponse<AdUploadData> = self
            .http
            .json(
                self.http
                    .client()
                    .post(self.url("magnet/upload", ip))
                    .bearer_auth(&self.token)
                    .form(&[("magnets[]", magnet)]),
            )
            .await?;
        let data = response.into_data("magnet upload")?;
        data.magnets
            .first()
            .map(|magnet| magnet.id)
            .ok_or_else(|| AppError::internal_error("AllDebrid accepted no magnet"))
    }

    async fn upload_torrent_file(
        &self,
        torrent_url: &str,
        ip: Option<IpAddr>,
    ) -> Result<u64, AppError> {
        let body = self.http.download_torrent_file(torrent_url).await?;
        let part = reqwest::multipart::Part::bytes(body.to_vec())
            .file_name(format!("{}.torrent", uuid::Uuid::new_v4()))
            .mime_str("application/x-bittorrent")
            .map_err(anyhow::Error::from)?;
        let form = reqwest::multipart::Form::new().part("files[]", part);
        let response: AdResponse<AdUploadFileData> = self
            .http
            .json(
                self.http
                    .client()
                    .post(self.url("magnet/upload/file", ip))
                    .bearer_auth(&self.token)
                    .multipart(form),
            )
            .await?;
        let data = response.into_data("torrent upload")?;
        data.files
            .first()
            .map(|file| file.id)
            .ok_or_else(|| AppError::internal_error("AllDebrid accepted no torrent file"))
    }

    async fn magnet_status(&self, magnet_id: u64, ip: Option<IpAddr>) -> Result<AdMagnetStatus, AppError> {
        let url = format!("{}&id={magnet_id}", self.url("magnet/status", ip));
        let response: AdResponse<AdStatusData> = self
            .http
            .json(self.http.client().get(url).bearer_auth(&self.token))
            .await?;
        Ok(response.into_data("magnet status")?.magnets)
    }

    async fn unlock(&self, link: &str, ip: Option<IpAddr>) -> Result<String, AppError> {
        let url = format!(
            "{}&link={}",
            self.url("link/unlock", ip),
            urlencode(link)
        );
        let response: AdResponse<AdUnlockData> = self
            .http
            .json(self.http.client().get(url).bearer_auth(&self.token))
            .await?;
        Ok(response.into_data("link unlock")?.link)
    }

    async fn add_magnet_or_torrent(
        &self,
        query: &StreamQuery,
        ip: Option<IpAddr>,
    ) -> Result<u64, AppError> {
        match &query.torrent_download {
            Some(torrent_url) => {
                tracing::info!("AllDebrid: uploading torrent file");
                self.upload_torrent_file(torrent_url, ip).await
            }
            None => {
                let magnet = query
                    .magnet
                    .as_deref()
                    .ok_or_else(|| AppError::bad_request("query carries no magnet"))?;
                tracing::info!("AllDebrid: adding magnet");
                self.upload_magnet(magnet, ip).await
            }
        }
    }

    async fn wait_until_ready(&self, magnet_id: u64, ip: Option<IpAddr>) -> Result<bool, AppError> {
        let deadline = tokio::time::Instant::now() + READY_WAIT;
        loop {
            let status = self.magnet_status(magnet_id, ip).await?;
            if status.status == "Ready" {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl DebridProvider for AllDebrid {
    fn tag(&self) -> ProviderTag {
        ProviderTag::AllDebrid
    }

    async fn bulk_availability(
        &self,
        hashes: &[String],
        ip: Option<IpAddr>,
    ) -> Result<AvailabilityResponse, AppError> {
        if hashes.is_empty() {
            return Ok(AvailabilityResponse::AllDebrid(Vec::new()));
        }
        let pairs: Vec<(&str, &str)> = hashes
            .iter()
            .map(|hash| ("magnets[]", hash.as_str()))
            .collect();
        let response: AdResponse<AdInstantData> = self
            .http
            .json(
                self.http
                    .client()
                    .post(self.url("magnet/instant", ip))
                    .bearer_auth(&self.token)
                    .form(&pairs),
            )
            .await?;
        Ok(AvailabilityResponse::AllDebrid(
            response.into_data("instant availability")?.magnets,
        ))
    }

    async fn add_magnet_or_torrent_and_select(
        &self,
        query: &StreamQuery,
        ip: Option<IpAddr>,
    ) -> Result<(), AppError> {
        // AllDebrid fetches every file of a magnet; there is no selection
        // step to perform.
        self.add_magnet_or_torrent(query, ip).await.map(|_| ())
    }

    async fn get_stream_link(
        &self,
        query: &StreamQuery,
        ip: Option<IpAddr>,
    ) -> Result<String, AppError> {
        let magnet_id = self.add_magnet_or_torrent(query, ip).await?;
        tracing::info!(magnet_id, "AllDebrid: waiting for the magnet to be ready");
        if !self.wait_until_ready(magnet_id, ip).await? {
            tracing::warn!("AllDebrid: magnet not ready, caching in progress");
            return Ok(self.no_cache_video_url.clone());
        }
        let status = self.magnet_status(magnet_id, ip).await?;

        let link = match query.kind {
            MediaKind::Movie => status
                .links
                .iter()
                .max_by_key(|link| link.size)
                .map(|link| link.link.clone()),
            MediaKind::Series => {
                let (season, episode) = match (query.season_number(), query.episode_number()) {
                    (Some(season), Some(episode)) => (season, episode),
                    _ => return Err(AppError::bad_request("series query without season/episode")),
                };
                let matching: Vec<&AdLink> = status
                    .links
                    .iter()
                    .filter(|link| {
                        parser::season_episode_in_filename(&link.filename, season, episode)
                    })
                    .collect();
                if matching.is_empty() {
                    return Err(AppError::not_found(format!(
                        "no file for S{season:02}E{episode:02} in the torrent"
                    )));
                }
                matching
                    .into_iter()
                    .max_by_key(|link| link.size)
                    .map(|link| link.link.clone())
            }
        };
        let Some(link) = link else {
            tracing::warn!("AllDebrid: magnet is ready but has no links");
            return Ok(self.no_cache_video_url.clone());
        };
        let unlocked = self.unlock(&link, ip).await?;
        tracing::info!("AllDebrid: unrestricted link ready");
        Ok(unlocked)
    }
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            byte => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[derive(Debug, Deserialize)]
struct AdResponse<T> {
    #[serde(default)]
    status: String,
    data: Option<T>,
}

impl<T> AdResponse<T> {
    fn into_data(self, operation: &str) -> Result<T, AppError> {
        if self.status != "success" {
            return Err(AppError::internal_error(format!(
                "AllDebrid {operation} failed with status {}",
                self.status
            )));
        }
        self.data
            .ok_or_else(|| AppError::internal_error(format!("AllDebrid {operation} had no data")))
    }
}

#[derive(Debug, Deserialize)]
struct AdUploadData {
    #[serde(default)]
    magnets: Vec<AdUploadedMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdUploadedMagnet {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AdUploadFileData {
    #[serde(default)]
    files: Vec<AdUploadedMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdStatusData {
    magnets: AdMagnetStatus,
}

#[derive(Debug, Deserialize)]
pub struct AdMagnetStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub links: Vec<AdLink>,
}

#[derive(Debug, Deserialize)]
pub struct AdLink {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct AdUnlockData {
    #[serde(default)]
    link: String,
}

#[derive(Debug, Deserialize)]
struct AdInstantData {
    #[serde(default)]
    magnets: Vec<AdMagnet>,
}

/// One magnet's entry in the instant-availability manifest. `files` is a
/// folder tree: entries with `e` children are folders.
#[derive(Debug, Clone, Deserialize)]
pub struct AdMagnet {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub instant: bool,
    #[serde(default)]
    pub files: Vec<AdFileNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdFileNode {
    /// File or folder name.
    #[serde(default)]
    pub n: String,
    /// File size; absent on folders.
    #[serde(default)]
    pub s: Option<u64>,
    /// Folder children.
    #[serde(default)]
    pub e: Option<Vec<AdFileNode>>,
}
